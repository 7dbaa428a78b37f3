//! Chain explorer client (Etherscan / BscScan compatible APIs)
//!
//! Every call is a single attempt bounded by the configured timeout. Callers
//! own pagination and rate limiting; a failed call is reported as a typed
//! [`FetchError`] and retried on the next scheduled pass.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{Chain, Config};
use crate::error::{FetchError, FetchResult};
use crate::utils::MetricsService;

/// Transaction record as returned by the explorer list endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub input: String,
    pub time_stamp: String,
    pub hash: String,
    pub block_number: String,
    /// Present only on token-transfer endpoint records
    #[serde(default)]
    pub token_decimal: Option<String>,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
}

/// Which transaction list to page through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxQuery {
    /// Recent transfers of a token contract, newest first
    TokenTransfers { contract: String },
    /// Normal transactions of an account within a block range, oldest first
    AccountTransactions {
        address: String,
        start_block: u64,
        end_block: u64,
    },
}

impl TxQuery {
    fn params(&self, page: u32, page_size: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![("module", "account".to_string())];
        match self {
            TxQuery::TokenTransfers { contract } => {
                params.push(("action", "tokentx".to_string()));
                params.push(("contractaddress", contract.clone()));
                params.push(("sort", "desc".to_string()));
            }
            TxQuery::AccountTransactions {
                address,
                start_block,
                end_block,
            } => {
                params.push(("action", "txlist".to_string()));
                params.push(("address", address.clone()));
                params.push(("startblock", start_block.to_string()));
                params.push(("endblock", end_block.to_string()));
                params.push(("sort", "asc".to_string()));
            }
        }
        params.push(("page", page.to_string()));
        params.push(("offset", page_size.to_string()));
        params
    }
}

/// Read access to a chain explorer
#[async_trait]
pub trait ChainExplorer: Send + Sync {
    async fn get_current_block(&self, chain: Chain) -> FetchResult<u64>;

    async fn get_transactions_page(
        &self,
        chain: Chain,
        query: &TxQuery,
        page: u32,
        page_size: u32,
    ) -> FetchResult<Vec<RawTransaction>>;
}

/// HTTP explorer client
pub struct ExplorerClient {
    client: reqwest::Client,
    config: Config,
    metrics: Arc<MetricsService>,
}

impl ExplorerClient {
    pub fn new(config: Config, metrics: Arc<MetricsService>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.api_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            metrics,
        })
    }

    async fn call(&self, chain: Chain, params: &[(&'static str, String)]) -> FetchResult<String> {
        let endpoint = self.config.explorer(chain);

        let response = self
            .client
            .get(&endpoint.base_url)
            .query(params)
            .query(&[("apikey", endpoint.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("HTTP {}", status)));
        }

        Ok(response.text().await?)
    }

    fn record<T>(&self, chain: Chain, endpoint: &str, result: &FetchResult<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(FetchError::RateLimited) => "rate_limited",
            Err(FetchError::Unavailable(_)) => "unavailable",
        };
        self.metrics.record_explorer_request(chain, endpoint, outcome);
    }
}

#[async_trait]
impl ChainExplorer for ExplorerClient {
    async fn get_current_block(&self, chain: Chain) -> FetchResult<u64> {
        let params = [
            ("module", "proxy".to_string()),
            ("action", "eth_blockNumber".to_string()),
        ];

        let result = match self.call(chain, &params).await {
            Ok(body) => parse_block_height(&body),
            Err(e) => Err(e),
        };

        self.record(chain, "eth_blockNumber", &result);
        if let Ok(height) = &result {
            debug!(target: "EXPLORER", chain = %chain, height, "Current block");
        }
        result
    }

    async fn get_transactions_page(
        &self,
        chain: Chain,
        query: &TxQuery,
        page: u32,
        page_size: u32,
    ) -> FetchResult<Vec<RawTransaction>> {
        let params = query.params(page, page_size);

        let result = match self.call(chain, &params).await {
            Ok(body) => parse_transactions(&body),
            Err(e) => Err(e),
        };

        let endpoint = match query {
            TxQuery::TokenTransfers { .. } => "tokentx",
            TxQuery::AccountTransactions { .. } => "txlist",
        };
        self.record(chain, endpoint, &result);
        if let Ok(txs) = &result {
            debug!(target: "EXPLORER", chain = %chain, endpoint, page, count = txs.len(), "Fetched page");
        }
        result
    }
}

/// Envelope shared by explorer `account` and `proxy` responses
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl Envelope {
    fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return error
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
        }
        match (&self.result, &self.message) {
            (serde_json::Value::String(s), _) if !s.is_empty() => s.clone(),
            (_, Some(m)) => m.clone(),
            _ => "unknown error".to_string(),
        }
    }
}

fn classify(message: String) -> FetchError {
    if message.to_lowercase().contains("rate limit") {
        FetchError::RateLimited
    } else {
        FetchError::Unavailable(message)
    }
}

fn parse_envelope(body: &str) -> FetchResult<Envelope> {
    serde_json::from_str(body)
        .map_err(|e| FetchError::Unavailable(format!("malformed response: {}", e)))
}

/// Parse an `eth_blockNumber` proxy response
pub fn parse_block_height(body: &str) -> FetchResult<u64> {
    let envelope = parse_envelope(body)?;

    if envelope.error.is_some() || envelope.status.as_deref() == Some("0") {
        return Err(classify(envelope.describe()));
    }

    match &envelope.result {
        serde_json::Value::String(hex) if hex.starts_with("0x") && hex.len() > 2 => {
            u64::from_str_radix(&hex[2..], 16)
                .map_err(|_| FetchError::Unavailable(format!("bad block number: {}", hex)))
        }
        _ => Err(classify(envelope.describe())),
    }
}

/// Parse a `txlist` / `tokentx` response. "No results" is an empty page.
pub fn parse_transactions(body: &str) -> FetchResult<Vec<RawTransaction>> {
    let envelope = parse_envelope(body)?;

    if envelope.status.as_deref() == Some("1") && envelope.result.is_array() {
        return serde_json::from_value(envelope.result)
            .map_err(|e| FetchError::Unavailable(format!("malformed transaction list: {}", e)));
    }

    let message = envelope.message.as_deref().unwrap_or_default().to_lowercase();
    if message.starts_with("no transactions found") || message.starts_with("no records found") {
        return Ok(Vec::new());
    }

    Err(classify(envelope.describe()))
}

#[cfg(test)]
pub mod testing {
    //! In-memory explorer for scanner tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    pub const TRANSFER_SELECTOR: &str = "a9059cbb";

    /// Explorer whose answers are scripted per chain and per page
    #[derive(Default)]
    pub struct FakeExplorer {
        heads: Mutex<HashMap<Chain, FetchResult<u64>>>,
        pages: Mutex<HashMap<(Chain, String, u32), FetchResult<Vec<RawTransaction>>>>,
        histories: Mutex<HashMap<(Chain, String), Vec<RawTransaction>>>,
        failing: Mutex<HashMap<Chain, FetchError>>,
        pub calls: Mutex<Vec<(Chain, TxQuery, u32)>>,
    }

    impl FakeExplorer {
        pub fn set_head(&self, chain: Chain, head: FetchResult<u64>) {
            self.heads.lock().insert(chain, head);
        }

        /// Script the page for a contract (token transfers) or address (account list)
        pub fn set_page(
            &self,
            chain: Chain,
            subject: &str,
            page: u32,
            result: FetchResult<Vec<RawTransaction>>,
        ) {
            self.pages
                .lock()
                .insert((chain, subject.to_lowercase(), page), result);
        }

        /// Serve an address's account list from `txs` (oldest first), honoring
        /// the block range and page size like the real endpoint
        pub fn set_account_history(&self, chain: Chain, address: &str, txs: Vec<RawTransaction>) {
            self.histories
                .lock()
                .insert((chain, address.to_lowercase()), txs);
        }

        /// Fail every list call on a chain
        pub fn fail_chain(&self, chain: Chain, error: FetchError) {
            self.failing.lock().insert(chain, error);
        }
    }

    #[async_trait]
    impl ChainExplorer for FakeExplorer {
        async fn get_current_block(&self, chain: Chain) -> FetchResult<u64> {
            self.heads
                .lock()
                .get(&chain)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Unavailable("no head scripted".into())))
        }

        async fn get_transactions_page(
            &self,
            chain: Chain,
            query: &TxQuery,
            page: u32,
            page_size: u32,
        ) -> FetchResult<Vec<RawTransaction>> {
            self.calls.lock().push((chain, query.clone(), page));

            if let Some(err) = self.failing.lock().get(&chain) {
                return Err(err.clone());
            }

            if let TxQuery::AccountTransactions {
                address,
                start_block,
                end_block,
            } = query
            {
                if let Some(history) = self.histories.lock().get(&(chain, address.to_lowercase())) {
                    let skip = (page.saturating_sub(1) * page_size) as usize;
                    return Ok(history
                        .iter()
                        .filter(|raw| {
                            raw.block_number
                                .parse::<u64>()
                                .is_ok_and(|block| (*start_block..=*end_block).contains(&block))
                        })
                        .skip(skip)
                        .take(page_size as usize)
                        .cloned()
                        .collect());
                }
            }

            let subject = match query {
                TxQuery::TokenTransfers { contract } => contract.to_lowercase(),
                TxQuery::AccountTransactions { address, .. } => address.to_lowercase(),
            };
            self.pages
                .lock()
                .get(&(chain, subject, page))
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// A `transfer(address,uint256)` call to `contract` carrying `raw_amount`
    pub fn erc20_call(contract: &str, from: &str, raw_amount: u128, timestamp: i64, hash: &str) -> RawTransaction {
        RawTransaction {
            from: from.to_string(),
            to: contract.to_string(),
            value: "0".to_string(),
            input: format!(
                "0x{}{:0>64}{:064x}",
                TRANSFER_SELECTOR, "00000000000000000000000000000000000000b0b", raw_amount
            ),
            time_stamp: timestamp.to_string(),
            hash: hash.to_string(),
            block_number: "950".to_string(),
            ..Default::default()
        }
    }

    /// [`erc20_call`] mined in `block`
    pub fn erc20_call_at(block: u64, contract: &str, from: &str, raw_amount: u128, hash: &str) -> RawTransaction {
        RawTransaction {
            block_number: block.to_string(),
            ..erc20_call(contract, from, raw_amount, 1_714_000_000, hash)
        }
    }

    /// A record from the token-transfer endpoint
    pub fn token_transfer(
        from: &str,
        to: &str,
        value: &str,
        decimals: u32,
        timestamp: i64,
        hash: &str,
    ) -> RawTransaction {
        RawTransaction {
            from: from.to_string(),
            to: to.to_string(),
            value: value.to_string(),
            input: "deprecated".to_string(),
            time_stamp: timestamp.to_string(),
            hash: hash.to_string(),
            block_number: "1000".to_string(),
            token_decimal: Some(decimals.to_string()),
            ..Default::default()
        }
    }
}
