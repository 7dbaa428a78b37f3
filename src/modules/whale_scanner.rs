//! Whale Scanner - incremental block-range scans of registered whales
//!
//! Each pass reloads the whale universe from the snapshot, then walks every
//! chain from its cursor to the current head. A chain's cursor only moves
//! once every whale on it has been visited, and never past a block some
//! whale's history was cut short at.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Chain, Config};
use crate::error::PersistenceError;
use crate::log_skip;
use crate::modules::CursorStore;
use crate::scheduler::Shutdown;
use crate::utils::alerts::WhaleAlert;
use crate::utils::decoder::{decode, is_large};
use crate::utils::explorer::{RawTransaction, TxQuery};
use crate::utils::snapshot::{load_snapshot, SnapshotRow};
use crate::utils::{AlertService, ChainExplorer, MetricsService, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Uninitialized,
    Scanning,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchedWhale {
    pub address: String,
    pub label: String,
}

/// Outcome of one chain in a pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainReport {
    pub chain: Option<Chain>,
    pub head: Option<u64>,
    pub whales: usize,
    pub failed_addresses: Vec<String>,
    /// Addresses whose history stops short of the head
    pub incomplete_addresses: Vec<String>,
    pub alerts: usize,
    pub advanced_to: Option<u64>,
    pub interrupted: bool,
}

/// Transactions fetched for one address
struct AddressHistory {
    txs: Vec<RawTransaction>,
    /// Every transaction up to this block is in `txs`
    covered_to: u64,
}

fn block_of(raw: &RawTransaction) -> Option<u64> {
    raw.block_number.parse().ok()
}

/// Group snapshot rows by the chains they were active on
pub fn universe_from_rows(rows: &[SnapshotRow]) -> HashMap<Chain, Vec<WatchedWhale>> {
    let mut universe: HashMap<Chain, Vec<WatchedWhale>> = HashMap::new();

    for row in rows {
        let short: String = row.address.chars().take(8).collect();
        let label = format!("Whale {} ({})", short, row.tokens_traded);

        for name in row.active_chains.split(',') {
            let Ok(chain) = name.trim().parse::<Chain>() else {
                debug!(target: "WHALE_SCANNER", chain = name.trim(), "Ignoring unknown chain in snapshot");
                continue;
            };
            universe.entry(chain).or_default().push(WatchedWhale {
                address: row.address.to_lowercase(),
                label: label.clone(),
            });
        }
    }

    universe
}

pub struct WhaleScanner {
    config: Config,
    explorer: Arc<dyn ChainExplorer>,
    limiter: RateLimiter,
    cursors: Arc<CursorStore>,
    alerts: AlertService,
    metrics: Arc<MetricsService>,
    phases: DashMap<Chain, ScanPhase>,
    shutdown: Shutdown,
    whales_watched: AtomicU64,
    alerts_sent: AtomicU64,
}

impl WhaleScanner {
    pub fn new(
        config: Config,
        explorer: Arc<dyn ChainExplorer>,
        limiter: RateLimiter,
        cursors: Arc<CursorStore>,
        alerts: AlertService,
        metrics: Arc<MetricsService>,
        shutdown: Shutdown,
    ) -> Self {
        let phases = DashMap::new();
        for chain in Chain::ALL {
            let phase = if cursors.get(chain).is_some() {
                ScanPhase::Idle
            } else {
                ScanPhase::Uninitialized
            };
            phases.insert(chain, phase);
        }

        Self {
            config,
            explorer,
            limiter,
            cursors,
            alerts,
            metrics,
            phases,
            shutdown,
            whales_watched: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
        }
    }

    /// Run one pass over every chain
    pub async fn run_pass(&self) -> Result<Vec<ChainReport>, PersistenceError> {
        let rows = match load_snapshot(&self.config.snapshot_path, self.config.whale_min_volume) {
            Ok(rows) => rows,
            Err(e) => {
                self.metrics.record_pass("whale_scanner", false);
                return Err(e);
            }
        };
        let universe = universe_from_rows(&rows);
        self.whales_watched.store(rows.len() as u64, Ordering::Relaxed);

        info!(
            target: "WHALE_SCANNER",
            whales = rows.len(),
            "Starting whale pass"
        );

        let mut reports = Vec::new();
        for chain in Chain::ALL {
            if self.shutdown.is_triggered() {
                info!(target: "WHALE_SCANNER", "Shutdown requested, ending pass early");
                break;
            }

            let whales = universe.get(&chain).map(Vec::as_slice).unwrap_or_default();
            match self.scan_chain(chain, whales).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    self.phases.insert(chain, ScanPhase::Idle);
                    self.metrics.record_pass("whale_scanner", false);
                    return Err(e);
                }
            }
        }

        self.metrics.record_pass("whale_scanner", true);
        Ok(reports)
    }

    async fn scan_chain(
        &self,
        chain: Chain,
        whales: &[WatchedWhale],
    ) -> Result<ChainReport, PersistenceError> {
        let mut report = ChainReport {
            chain: Some(chain),
            whales: whales.len(),
            ..Default::default()
        };

        self.limiter.wait(chain).await;
        let head = match self.explorer.get_current_block(chain).await {
            Ok(head) => head,
            Err(e) => {
                log_skip!("WHALE_SCANNER", chain = %chain, "Skipping chain, head unavailable: {}", e);
                return Ok(report);
            }
        };
        report.head = Some(head);

        let cursor = self
            .cursors
            .get_or_initialize(chain, head, self.config.lookback_blocks)?;
        self.metrics.set_cursor(chain, cursor);

        if head <= cursor {
            debug!(target: "WHALE_SCANNER", chain = %chain, head, cursor, "No new blocks");
            self.phases.insert(chain, ScanPhase::Idle);
            return Ok(report);
        }

        self.phases.insert(chain, ScanPhase::Scanning);
        info!(
            target: "WHALE_SCANNER",
            chain = %chain,
            from_block = cursor + 1,
            to_block = head,
            whales = whales.len(),
            "Scanning block range"
        );

        // Alerts wait until the chain's advance height is known
        let mut pending: Vec<(u64, WhaleAlert)> = Vec::new();
        let mut advance_to = head;

        for whale in whales {
            if self.shutdown.is_triggered() {
                info!(target: "WHALE_SCANNER", chain = %chain, "Shutdown mid-chain, cursor not advanced");
                report.interrupted = true;
                self.phases.insert(chain, ScanPhase::Idle);
                return Ok(report);
            }

            let history = match self.address_transactions(chain, &whale.address, cursor + 1, head).await {
                Some(history) => history,
                None => {
                    report.failed_addresses.push(whale.address.clone());
                    continue;
                }
            };

            if history.covered_to < head {
                report.incomplete_addresses.push(whale.address.clone());
                advance_to = advance_to.min(history.covered_to);
            }

            for raw in &history.txs {
                if let Some(alert) = self.classify(chain, whale, raw) {
                    pending.push((block_of(raw).unwrap_or(cursor + 1), alert));
                }
            }
        }

        // Anything above the advance height is scanned again next pass
        for (_, alert) in pending.into_iter().filter(|(block, _)| *block <= advance_to) {
            self.metrics.record_whale_alert(chain, &alert.token);
            self.alerts.notify_whale(alert);
            self.alerts_sent.fetch_add(1, Ordering::Relaxed);
            report.alerts += 1;
        }

        self.cursors.advance(chain, advance_to)?;
        self.metrics.set_cursor(chain, advance_to);
        self.phases.insert(chain, ScanPhase::Idle);
        report.advanced_to = Some(advance_to);

        info!(
            target: "WHALE_SCANNER",
            chain = %chain,
            cursor = advance_to,
            alerts = report.alerts,
            failed = report.failed_addresses.len(),
            incomplete = report.incomplete_addresses.len(),
            "Chain scan complete"
        );
        Ok(report)
    }

    /// Transactions of `address` in `[start, end]`. `None` means the first
    /// page could not be fetched.
    ///
    /// Pages run until a short page. When `max_pages_per_address` full pages
    /// come back, the query restarts from the last block seen so the cap
    /// bounds one request window rather than the history. A single block
    /// holding more than a window stops the address just below that block.
    async fn address_transactions(
        &self,
        chain: Chain,
        address: &str,
        start_block: u64,
        end_block: u64,
    ) -> Option<AddressHistory> {
        let mut txs = Vec::new();
        let mut window_start = start_block;

        loop {
            let query = TxQuery::AccountTransactions {
                address: address.to_string(),
                start_block: window_start,
                end_block,
            };
            let mut window = Vec::new();
            let mut complete = false;

            for page in 1..=self.config.max_pages_per_address {
                self.limiter.wait(chain).await;

                match self
                    .explorer
                    .get_transactions_page(chain, &query, page, self.config.page_size)
                    .await
                {
                    Ok(batch) => {
                        complete = batch.len() < self.config.page_size as usize;
                        window.extend(batch);
                        if complete {
                            break;
                        }
                    }
                    Err(e) if page == 1 && window_start == start_block => {
                        log_skip!(
                            "WHALE_SCANNER",
                            chain = %chain,
                            address,
                            "Skipping address: {}",
                            e
                        );
                        return None;
                    }
                    Err(e) => {
                        warn!(
                            target: "WHALE_SCANNER",
                            chain = %chain,
                            address,
                            from_block = window_start,
                            page,
                            "Keeping earlier pages after fetch failure: {}",
                            e
                        );
                        complete = true;
                        break;
                    }
                }
            }

            if complete {
                txs.extend(window);
                return Some(AddressHistory {
                    txs,
                    covered_to: end_block,
                });
            }

            match window.last().and_then(block_of) {
                Some(last) if last > window_start => {
                    // The last block may continue past the cap, so fetch it whole next window
                    txs.extend(
                        window
                            .into_iter()
                            .filter(|raw| block_of(raw).is_some_and(|block| block < last)),
                    );
                    debug!(
                        target: "WHALE_SCANNER",
                        chain = %chain,
                        address,
                        from_block = last,
                        "Page cap reached, continuing"
                    );
                    window_start = last;
                }
                _ => {
                    log_skip!(
                        "WHALE_SCANNER",
                        chain = %chain,
                        address,
                        block = window_start,
                        "Page cap reached inside one block, address covered only below it"
                    );
                    return Some(AddressHistory {
                        txs,
                        covered_to: window_start - 1,
                    });
                }
            }
        }
    }

    fn classify(&self, chain: Chain, whale: &WatchedWhale, raw: &RawTransaction) -> Option<WhaleAlert> {
        let token = self.config.token_by_contract(chain, &raw.to)?;
        let transfer = decode(raw, token, chain)?;
        if !is_large(transfer.amount, self.config.whale_alert_threshold) {
            return None;
        }

        Some(WhaleAlert {
            whale_label: whale.label.clone(),
            token: transfer.token,
            chain,
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            tx_hash: transfer.tx_hash,
            timestamp: transfer.timestamp,
        })
    }

    pub fn phases(&self) -> HashMap<Chain, ScanPhase> {
        self.phases.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    pub fn whales_watched(&self) -> u64 {
        self.whales_watched.load(Ordering::Relaxed)
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::scheduler::{shutdown_channel, ShutdownTrigger};
    use crate::utils::explorer::testing::{erc20_call, erc20_call_at, FakeExplorer};
    use crate::utils::snapshot::write_snapshot;
    use crate::utils::DatabaseService;

    const USDT_ETH: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
    const WHALE: &str = "0x28c6c06298d514db089934071355e5743bf21d60";
    const OTHER: &str = "0x21a31ee1afc51d94c2efccaa2092ad1028285549";

    struct Harness {
        scanner: WhaleScanner,
        explorer: Arc<FakeExplorer>,
        cursors: Arc<CursorStore>,
        alerts: AlertService,
        trigger: ShutdownTrigger,
        config: Config,
    }

    fn row(address: &str, chains: &str, volume: f64) -> SnapshotRow {
        SnapshotRow {
            address: address.to_string(),
            total_transactions: 3,
            active_chains: chains.to_string(),
            tokens_traded: "USDT".to_string(),
            last_active: "2024-05-01T00:00:00+00:00".to_string(),
            total_volume: volume,
            average_transaction_size: volume / 3.0,
        }
    }

    fn harness(name: &str, rows: &[SnapshotRow]) -> Harness {
        harness_with(name, rows, Config::for_tests())
    }

    fn harness_with(name: &str, rows: &[SnapshotRow], mut config: Config) -> Harness {
        config.snapshot_path = std::env::temp_dir()
            .join(format!("stablewatch-whale-{}-{}", std::process::id(), name))
            .join("whale_summary.csv");
        write_snapshot(&config.snapshot_path, rows).unwrap();

        let database = Arc::new(DatabaseService::in_memory().unwrap());
        let cursors = Arc::new(CursorStore::load(Arc::clone(&database)).unwrap());
        let alerts = AlertService::new(Arc::clone(&database));
        let explorer = Arc::new(FakeExplorer::default());
        let (trigger, shutdown) = shutdown_channel();

        let scanner = WhaleScanner::new(
            config.clone(),
            explorer.clone(),
            RateLimiter::from_config(&config),
            Arc::clone(&cursors),
            alerts.clone(),
            Arc::new(MetricsService::new().unwrap()),
            shutdown,
        );

        Harness {
            scanner,
            explorer,
            cursors,
            alerts,
            trigger,
            config,
        }
    }

    fn cleanup(h: &Harness) {
        let _ = std::fs::remove_dir_all(h.config.snapshot_path.parent().unwrap());
    }

    fn account_queries(h: &Harness, chain: Chain) -> Vec<(String, u64, u64, u32)> {
        h.explorer
            .calls
            .lock()
            .iter()
            .filter(|(c, _, _)| *c == chain)
            .filter_map(|(_, query, page)| match query {
                TxQuery::AccountTransactions {
                    address,
                    start_block,
                    end_block,
                } => Some((address.clone(), *start_block, *end_block, *page)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_universe_from_rows() {
        let rows = vec![
            row("0xABCDEF0123456789", "ethereum, bsc", 5e6),
            row("0x1111111111", "bsc", 2e6),
        ];
        let universe = universe_from_rows(&rows);

        assert_eq!(universe[&Chain::Ethereum].len(), 1);
        assert_eq!(universe[&Chain::Bsc].len(), 2);
        assert_eq!(universe[&Chain::Ethereum][0].address, "0xabcdef0123456789");
        assert_eq!(universe[&Chain::Ethereum][0].label, "Whale 0xABCDEF (USDT)");
    }

    #[tokio::test]
    async fn test_scan_emits_alert_and_advances_cursor() {
        let h = harness("e2e", &[row(WHALE, "ethereum", 5e6)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));
        h.explorer.set_head(Chain::Bsc, Ok(500));
        h.explorer.set_page(
            Chain::Ethereum,
            WHALE,
            1,
            Ok(vec![erc20_call(USDT_ETH, WHALE, 2_000_000_000_000, 1_714_000_000, "0xbig")]),
        );
        let mut live = h.alerts.subscribe();

        let reports = h.scanner.run_pass().await.unwrap();

        assert_eq!(reports[0].alerts, 1);
        assert_eq!(reports[0].advanced_to, Some(1000));
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(1000));
        assert_eq!(
            account_queries(&h, Chain::Ethereum),
            vec![(WHALE.to_string(), 901, 1000, 1)]
        );

        let alert = live.try_recv().unwrap();
        assert_eq!(alert.token, "USDT");
        assert_eq!(alert.amount, 2_000_000.0);
        assert_eq!(alert.tx_hash, "0xbig");
        assert_eq!(h.alerts.get_recent_alerts(10).len(), 1);
        assert_eq!(h.scanner.alerts_sent(), 1);

        // No whales on bsc, but its cursor is still initialized and advanced
        assert_eq!(h.cursors.get(Chain::Bsc), Some(500));
        assert_eq!(h.scanner.phases()[&Chain::Ethereum], ScanPhase::Idle);

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_below_threshold_and_foreign_contract_ignored() {
        let h = harness("noop", &[row(WHALE, "ethereum", 5e6)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));
        h.explorer.set_page(
            Chain::Ethereum,
            WHALE,
            1,
            Ok(vec![
                erc20_call(USDT_ETH, WHALE, 1_000_000_000_000, 1_714_000_000, "0xexact"),
                erc20_call("0x000000000000000000000000000000000000dead", WHALE, 9_000_000_000_000, 1_714_000_000, "0xother"),
            ]),
        );

        let reports = h.scanner.run_pass().await.unwrap();

        assert_eq!(reports[0].alerts, 0);
        assert!(h.alerts.get_recent_alerts(10).is_empty());
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(1000));

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_uninitialized_cursor_uses_lookback() {
        let h = harness("lookback", &[row(WHALE, "ethereum", 5e6)]);
        h.explorer.set_head(Chain::Ethereum, Ok(50_000));
        assert_eq!(h.scanner.phases()[&Chain::Ethereum], ScanPhase::Uninitialized);

        h.scanner.run_pass().await.unwrap();

        assert_eq!(
            account_queries(&h, Chain::Ethereum),
            vec![(WHALE.to_string(), 49_001, 50_000, 1)]
        );
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(50_000));

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_address_failure_still_advances() {
        let h = harness("addr-fail", &[row(WHALE, "bsc", 5e6), row(OTHER, "bsc", 3e6)]);
        h.cursors.advance(Chain::Bsc, 100).unwrap();
        h.explorer.set_head(Chain::Bsc, Ok(200));
        h.explorer
            .set_page(Chain::Bsc, WHALE, 1, Err(FetchError::RateLimited));

        let reports = h.scanner.run_pass().await.unwrap();
        let bsc = reports.iter().find(|r| r.chain == Some(Chain::Bsc)).unwrap();

        assert_eq!(bsc.failed_addresses, vec![WHALE.to_string()]);
        assert_eq!(bsc.advanced_to, Some(200));
        assert_eq!(h.cursors.get(Chain::Bsc), Some(200));
        // Both whales were attempted
        assert_eq!(account_queries(&h, Chain::Bsc).len(), 2);

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_head_failure_keeps_cursor() {
        let h = harness("head-fail", &[row(WHALE, "ethereum", 5e6)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(
            Chain::Ethereum,
            Err(FetchError::Unavailable("timeout".to_string())),
        );
        h.explorer.set_head(Chain::Bsc, Ok(300));

        let reports = h.scanner.run_pass().await.unwrap();

        assert_eq!(reports[0].head, None);
        assert_eq!(reports[0].advanced_to, None);
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(900));
        assert!(account_queries(&h, Chain::Ethereum).is_empty());
        // The other chain still ran
        assert_eq!(h.cursors.get(Chain::Bsc), Some(300));

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_advance() {
        let h = harness("shutdown", &[row(WHALE, "ethereum", 5e6)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));
        h.trigger.trigger();

        let reports = h.scanner.run_pass().await.unwrap();

        assert!(reports.is_empty());
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(900));
        assert!(h.explorer.calls.lock().is_empty());

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_low_volume_rows_not_watched() {
        let h = harness("min-volume", &[row(WHALE, "ethereum", 1_000_000.0)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));

        h.scanner.run_pass().await.unwrap();

        assert_eq!(h.scanner.whales_watched(), 0);
        assert!(account_queries(&h, Chain::Ethereum).is_empty());
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(1000));

        cleanup(&h);
    }

    fn small_pages() -> Config {
        let mut config = Config::for_tests();
        config.page_size = 1;
        config.max_pages_per_address = 2;
        config
    }

    #[tokio::test]
    async fn test_history_beyond_page_cap_is_scanned() {
        let h = harness_with("page-cap", &[row(WHALE, "ethereum", 5e6)], small_pages());
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));
        h.explorer.set_account_history(
            Chain::Ethereum,
            WHALE,
            vec![
                erc20_call_at(910, USDT_ETH, WHALE, 5_000_000, "0x910"),
                erc20_call_at(920, USDT_ETH, WHALE, 5_000_000, "0x920"),
                erc20_call_at(930, USDT_ETH, WHALE, 2_000_000_000_000, "0xbig"),
            ],
        );

        let reports = h.scanner.run_pass().await.unwrap();

        assert_eq!(reports[0].alerts, 1);
        assert!(reports[0].incomplete_addresses.is_empty());
        assert_eq!(h.alerts.get_recent_alerts(10)[0].tx_hash, "0xbig");
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(1000));

        let windows: Vec<(u64, u32)> = account_queries(&h, Chain::Ethereum)
            .into_iter()
            .map(|(_, start, _, page)| (start, page))
            .collect();
        assert_eq!(
            windows,
            vec![(901, 1), (901, 2), (920, 1), (920, 2), (930, 1), (930, 2)]
        );

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_overfull_block_holds_cursor_below_it() {
        let h = harness_with(
            "overfull",
            &[row(WHALE, "ethereum", 5e6), row(OTHER, "ethereum", 3e6)],
            small_pages(),
        );
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));
        h.explorer.set_account_history(
            Chain::Ethereum,
            WHALE,
            vec![
                erc20_call_at(950, USDT_ETH, WHALE, 5_000_000, "0xa"),
                erc20_call_at(950, USDT_ETH, WHALE, 5_000_000, "0xb"),
                erc20_call_at(950, USDT_ETH, WHALE, 2_000_000_000_000, "0xc"),
            ],
        );
        h.explorer.set_account_history(
            Chain::Ethereum,
            OTHER,
            vec![erc20_call_at(960, USDT_ETH, OTHER, 3_000_000_000_000, "0xother")],
        );

        let reports = h.scanner.run_pass().await.unwrap();

        assert_eq!(reports[0].incomplete_addresses, vec![WHALE.to_string()]);
        assert_eq!(reports[0].advanced_to, Some(949));
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(949));
        // OTHER's transfer sits above the held cursor and waits for the rescan
        assert_eq!(reports[0].alerts, 0);
        assert!(h.alerts.get_recent_alerts(10).is_empty());

        // Once the block fits in a window both transfers are reported once
        h.explorer.set_account_history(
            Chain::Ethereum,
            WHALE,
            vec![erc20_call_at(950, USDT_ETH, WHALE, 2_000_000_000_000, "0xc")],
        );
        let reports = h.scanner.run_pass().await.unwrap();

        assert!(reports[0].incomplete_addresses.is_empty());
        assert_eq!(reports[0].alerts, 2);
        assert_eq!(h.cursors.get(Chain::Ethereum), Some(1000));
        let mut hashes: Vec<String> = h
            .alerts
            .get_recent_alerts(10)
            .into_iter()
            .map(|a| a.tx_hash)
            .collect();
        hashes.sort();
        assert_eq!(hashes, vec!["0xc", "0xother"]);

        cleanup(&h);
    }

    #[tokio::test]
    async fn test_universe_reloaded_each_pass() {
        let h = harness("reload", &[row(WHALE, "ethereum", 5e6)]);
        h.cursors.advance(Chain::Ethereum, 900).unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1000));

        h.scanner.run_pass().await.unwrap();
        assert_eq!(h.scanner.whales_watched(), 1);

        write_snapshot(
            &h.config.snapshot_path,
            &[row(WHALE, "ethereum", 5e6), row(OTHER, "ethereum", 3e6)],
        )
        .unwrap();
        h.explorer.set_head(Chain::Ethereum, Ok(1100));

        h.scanner.run_pass().await.unwrap();

        assert_eq!(h.scanner.whales_watched(), 2);
        assert_eq!(
            account_queries(&h, Chain::Ethereum),
            vec![
                (WHALE.to_string(), 901, 1000, 1),
                (WHALE.to_string(), 1001, 1100, 1),
                (OTHER.to_string(), 1001, 1100, 1),
            ]
        );

        cleanup(&h);
    }
}
