//! Supply Scanner - circulating supply and large transfer discovery
//!
//! Tokens are scanned concurrently; the chains of one token are scanned in
//! order so each chain's rate limit is hit predictably. A failing token or
//! chain is logged and skipped, the pass itself always runs to the end.

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Chain, Config, Token};
use crate::error::{FetchResult, PersistenceError};
use crate::log_skip;
use crate::modules::WhaleRegistry;
use crate::utils::decoder::{decode, is_large, NormalizedTransfer};
use crate::utils::explorer::TxQuery;
use crate::utils::snapshot::write_snapshot;
use crate::utils::{ChainExplorer, DatabaseService, MetricsService, RateLimiter, SupplySource};

/// Outcome for one token in a pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenReport {
    pub symbol: String,
    pub supply: f64,
    pub recorded: usize,
    pub failed_chains: Vec<Chain>,
}

/// Outcome of a full supply pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupplyPassReport {
    pub tokens: Vec<TokenReport>,
    pub snapshot_rows: usize,
}

pub struct SupplyScanner {
    config: Config,
    explorer: Arc<dyn ChainExplorer>,
    supply: Arc<dyn SupplySource>,
    limiter: RateLimiter,
    registry: Arc<WhaleRegistry>,
    database: Arc<DatabaseService>,
    metrics: Arc<MetricsService>,
}

impl SupplyScanner {
    pub fn new(
        config: Config,
        explorer: Arc<dyn ChainExplorer>,
        supply: Arc<dyn SupplySource>,
        limiter: RateLimiter,
        registry: Arc<WhaleRegistry>,
        database: Arc<DatabaseService>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self {
            config,
            explorer,
            supply,
            limiter,
            registry,
            database,
            metrics,
        }
    }

    /// Run one pass over every configured token, then export the snapshot
    pub async fn run_pass(&self) -> Result<SupplyPassReport, PersistenceError> {
        let since = Utc::now().timestamp() - self.config.update_interval.as_secs() as i64;

        info!(
            target: "SUPPLY_SCANNER",
            tokens = self.config.tokens.len(),
            "Starting supply pass"
        );

        let results = join_all(
            self.config
                .tokens
                .iter()
                .map(|token| self.scan_token(token, since)),
        )
        .await;

        let mut report = SupplyPassReport::default();
        let mut failure = None;
        for result in results {
            match result {
                Ok(token_report) => report.tokens.push(token_report),
                Err(e) => {
                    error!(target: "SUPPLY_SCANNER", "Registry update failed: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            self.metrics.record_pass("supply_scanner", false);
            return Err(e);
        }

        let rows = self.registry.export_snapshot(self.config.snapshot_min_volume);
        if let Err(e) = write_snapshot(&self.config.snapshot_path, &rows) {
            self.metrics.record_pass("supply_scanner", false);
            return Err(e);
        }
        report.snapshot_rows = rows.len();

        self.metrics.whales_tracked.set(self.registry.len() as f64);
        self.metrics.record_pass("supply_scanner", true);

        info!(
            target: "SUPPLY_SCANNER",
            whales = self.registry.len(),
            snapshot_rows = rows.len(),
            "Supply pass complete"
        );
        Ok(report)
    }

    async fn scan_token(&self, token: &Token, since: i64) -> Result<TokenReport, PersistenceError> {
        let supply = self.supply.get_supply(token).await;
        self.metrics.set_supply(&token.symbol, supply);
        if let Err(e) = self.database.save_supply(&token.symbol, supply) {
            warn!(target: "SUPPLY_SCANNER", token = %token.symbol, "Failed to store supply: {}", e);
        }
        info!(target: "SUPPLY_SCANNER", token = %token.symbol, "Total Supply: {:.2}", supply);

        let mut report = TokenReport {
            symbol: token.symbol.clone(),
            supply,
            ..Default::default()
        };

        for chain in Chain::ALL {
            let Some(contract) = token.contract(chain) else {
                continue;
            };

            let transfers = match self.large_transfers(token, chain, contract, since).await {
                Ok(transfers) => transfers,
                Err(e) => {
                    log_skip!(
                        "SUPPLY_SCANNER",
                        token = %token.symbol,
                        chain = %chain,
                        "Skipping chain: {}",
                        e
                    );
                    report.failed_chains.push(chain);
                    continue;
                }
            };

            if transfers.is_empty() {
                info!(
                    target: "SUPPLY_SCANNER",
                    token = %token.symbol,
                    chain = %chain,
                    "No large transactions in the last {} minutes",
                    self.config.update_interval.as_secs() / 60
                );
            }

            for transfer in &transfers {
                self.registry.record_transfer(transfer)?;
                self.metrics
                    .record_large_transfer(chain, &token.symbol, transfer.amount);
                report.recorded += 1;

                info!(
                    target: "SUPPLY_SCANNER",
                    token = %token.symbol,
                    chain = %chain,
                    from = %transfer.from,
                    to = %transfer.to,
                    tx_hash = %transfer.tx_hash,
                    "Large transfer: {:.2}",
                    transfer.amount
                );
            }
        }

        Ok(report)
    }

    /// Newest transfers of `token` on `chain` above the large-transfer
    /// threshold, largest first
    async fn large_transfers(
        &self,
        token: &Token,
        chain: Chain,
        contract: &str,
        since: i64,
    ) -> FetchResult<Vec<NormalizedTransfer>> {
        let query = TxQuery::TokenTransfers {
            contract: contract.to_string(),
        };
        let mut found = Vec::new();

        for page in 1..=self.config.pages_per_chain {
            self.limiter.wait(chain).await;

            let txs = match self
                .explorer
                .get_transactions_page(chain, &query, page, self.config.page_size)
                .await
            {
                Ok(txs) => txs,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!(
                        target: "SUPPLY_SCANNER",
                        token = %token.symbol,
                        chain = %chain,
                        page,
                        "Keeping earlier pages after fetch failure: {}",
                        e
                    );
                    break;
                }
            };

            let last_page = txs.len() < self.config.page_size as usize;
            let mut reached_window_start = false;

            for raw in &txs {
                let Some(transfer) = decode(raw, token, chain) else {
                    continue;
                };
                if transfer.timestamp < since {
                    reached_window_start = true;
                    continue;
                }
                if is_large(transfer.amount, self.config.large_tx_threshold) {
                    found.push(transfer);
                }
            }

            if last_page || reached_window_start {
                break;
            }
        }

        found.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found.truncate(self.config.top_transfers);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::utils::explorer::testing::{token_transfer, FakeExplorer};
    use crate::utils::snapshot::load_snapshot;
    use crate::utils::supply::testing::FixedSupply;
    use std::collections::HashMap;

    const USDT_ETH: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
    const USDT_BSC: &str = "0x55d398326f99059fF775485246999027B3197955";

    struct Harness {
        scanner: SupplyScanner,
        explorer: Arc<FakeExplorer>,
        registry: Arc<WhaleRegistry>,
        database: Arc<DatabaseService>,
        config: Config,
    }

    fn harness(name: &str) -> Harness {
        let mut config = Config::for_tests();
        config.tokens.retain(|t| t.symbol == "USDT");
        config.page_size = 3;
        config.top_transfers = 2;
        config.snapshot_path = std::env::temp_dir()
            .join(format!("stablewatch-supply-{}-{}", std::process::id(), name))
            .join("whale_summary.csv");

        let explorer = Arc::new(FakeExplorer::default());
        let database = Arc::new(DatabaseService::in_memory().unwrap());
        let registry = Arc::new(WhaleRegistry::open(Arc::clone(&database), 100).unwrap());
        let supply = FixedSupply(HashMap::from([("USDT".to_string(), 110e9)]));

        let scanner = SupplyScanner::new(
            config.clone(),
            explorer.clone(),
            Arc::new(supply),
            RateLimiter::from_config(&config),
            Arc::clone(&registry),
            Arc::clone(&database),
            Arc::new(MetricsService::new().unwrap()),
        );

        Harness {
            scanner,
            explorer,
            registry,
            database,
            config,
        }
    }

    fn usdt(from: &str, to: &str, whole: u64, hash: &str) -> crate::utils::explorer::RawTransaction {
        let raw = format!("{}000000", whole);
        token_transfer(from, to, &raw, 6, Utc::now().timestamp(), hash)
    }

    #[tokio::test]
    async fn test_failing_chain_does_not_block_sibling() {
        let h = harness("isolation");
        h.explorer.set_page(
            Chain::Ethereum,
            USDT_ETH,
            1,
            Ok(vec![usdt("0xa", "0xb", 5_000_000, "0x1")]),
        );
        h.explorer
            .fail_chain(Chain::Bsc, FetchError::Unavailable("bscscan down".to_string()));

        let report = h.scanner.run_pass().await.unwrap();

        assert_eq!(report.tokens.len(), 1);
        assert_eq!(report.tokens[0].recorded, 1);
        assert_eq!(report.tokens[0].failed_chains, vec![Chain::Bsc]);
        assert_eq!(report.tokens[0].supply, 110e9);
        assert!(h.registry.get("0xa").is_some());
        assert!(h.registry.get("0xb").is_some());

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_threshold_sort_and_top_k() {
        let h = harness("topk");
        h.explorer.set_page(
            Chain::Ethereum,
            USDT_ETH,
            1,
            Ok(vec![
                usdt("0x1", "0x9", 1_000_000, "exact-threshold"),
                usdt("0x2", "0x9", 3_000_000, "mid"),
                usdt("0x3", "0x9", 500, "small"),
            ]),
        );
        h.explorer.set_page(
            Chain::Ethereum,
            USDT_ETH,
            2,
            Ok(vec![usdt("0x4", "0x9", 9_000_000, "big")]),
        );
        h.explorer.set_page(
            Chain::Bsc,
            USDT_BSC,
            1,
            Ok(vec![usdt("0x5", "0x9", 2_000_000, "bsc")]),
        );

        h.scanner.run_pass().await.unwrap();

        // Strictly above threshold only, top 2 per chain
        assert!(h.registry.get("0x1").is_none());
        assert!(h.registry.get("0x3").is_none());
        assert!(h.registry.get("0x2").is_some());
        assert!(h.registry.get("0x4").is_some());
        assert!(h.registry.get("0x5").is_some());

        let receiver = h.registry.get("0x9").unwrap();
        assert_eq!(receiver.total_transactions, 3);
        // Recorded largest first within a chain
        assert_eq!(receiver.transactions[0].tx_hash, "big");

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_pages_requested_sequentially_until_short_page() {
        let h = harness("paging");
        let full_page = vec![
            usdt("0xa", "0xb", 1, "p1"),
            usdt("0xa", "0xb", 1, "p2"),
            usdt("0xa", "0xb", 1, "p3"),
        ];
        h.explorer.set_page(Chain::Ethereum, USDT_ETH, 1, Ok(full_page));

        h.scanner.run_pass().await.unwrap();

        let pages: Vec<u32> = h
            .explorer
            .calls
            .lock()
            .iter()
            .filter(|(chain, _, _)| *chain == Chain::Ethereum)
            .map(|(_, _, page)| *page)
            .collect();
        assert_eq!(pages, vec![1, 2]);

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_old_transfers_are_ignored() {
        let h = harness("window");
        let stale = token_transfer("0xold", "0xb", "7000000000000", 6, 1_000, "stale");
        h.explorer
            .set_page(Chain::Ethereum, USDT_ETH, 1, Ok(vec![stale]));

        h.scanner.run_pass().await.unwrap();
        assert!(h.registry.get("0xold").is_none());

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_pass_exports_snapshot_and_supply() {
        let h = harness("export");
        h.explorer.set_page(
            Chain::Ethereum,
            USDT_ETH,
            1,
            Ok(vec![
                usdt("0xa", "0xb", 2_000_000, "0x1"),
                usdt("0xc", "0xd", 4_000_000, "0x2"),
            ]),
        );

        let report = h.scanner.run_pass().await.unwrap();
        assert_eq!(report.snapshot_rows, 4);

        let rows = load_snapshot(&h.config.snapshot_path, 0.0).unwrap();
        let volumes: Vec<f64> = rows.iter().map(|r| r.total_volume).collect();
        assert_eq!(volumes, vec![4_000_000.0, 4_000_000.0, 2_000_000.0, 2_000_000.0]);
        assert_eq!(rows[0].active_chains, "ethereum");

        let supply = h.database.latest_supply().unwrap();
        assert_eq!(supply[0].symbol, "USDT");

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_registry_write_failure_fails_pass_without_export() {
        let h = harness("persist-fail");
        h.explorer.set_page(
            Chain::Ethereum,
            USDT_ETH,
            1,
            Ok(vec![
                usdt("0xa", "0xb", 5_000_000, "0x1"),
                usdt("0xc", "0xd", 2_000_000, "0x2"),
            ]),
        );
        h.database.execute_batch("DROP TABLE whales").unwrap();

        let result = h.scanner.run_pass().await;

        assert!(matches!(result, Err(PersistenceError::Sqlite(_))));
        // The token stopped at its first transfer
        assert!(h.registry.is_empty());
        assert!(!h.config.snapshot_path.exists());

        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }
}
