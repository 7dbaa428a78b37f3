//! Configuration module for Stablewatch

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Chains the explorers cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bsc,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Ethereum, Chain::Bsc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "bsc" | "bnb" => Ok(Chain::Bsc),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

/// A tracked stablecoin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub symbol: String,
    pub contracts: BTreeMap<Chain, String>,
    /// Identifier of the asset in the supply index
    pub supply_id: String,
    pub decimals: u32,
}

impl Token {
    pub fn contract(&self, chain: Chain) -> Option<&str> {
        self.contracts.get(&chain).map(String::as_str)
    }
}

/// Shape of one entry in the optional token config file
#[derive(Debug, Deserialize)]
struct TokenSpec {
    contracts: BTreeMap<Chain, String>,
    supply_id: String,
    #[serde(default)]
    decimals: Option<u32>,
}

/// Stablecoins report 6 decimals for USDT/USDC and 18 for everything else
pub fn default_decimals(symbol: &str) -> u32 {
    match symbol {
        "USDT" | "USDC" => 6,
        _ => 18,
    }
}

fn builtin_tokens() -> Vec<Token> {
    let table = [
        (
            "BUSD",
            "binance-usd",
            "0x4Fabb145d64652a948d72533023f6E7A623C7C53",
            "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56",
        ),
        (
            "USDC",
            "usd-coin",
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d",
        ),
        (
            "USDT",
            "tether",
            "0xdAC17F958D2ee523a2206206994597C13D831ec7",
            "0x55d398326f99059fF775485246999027B3197955",
        ),
    ];

    table
        .iter()
        .map(|(symbol, supply_id, eth, bsc)| Token {
            symbol: symbol.to_string(),
            contracts: BTreeMap::from([
                (Chain::Ethereum, eth.to_string()),
                (Chain::Bsc, bsc.to_string()),
            ]),
            supply_id: supply_id.to_string(),
            decimals: default_decimals(symbol),
        })
        .collect()
}

/// Connection details for one chain explorer
#[derive(Clone)]
pub struct ExplorerEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl fmt::Debug for ExplorerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Explorers
    pub ethereum: ExplorerEndpoint,
    pub bsc: ExplorerEndpoint,
    pub supply_api_url: String,
    pub api_timeout: Duration,

    // Rate limits
    pub rate_limit_ethereum: Duration,
    pub rate_limit_bsc: Duration,

    // Classification
    pub large_tx_threshold: f64,
    pub whale_alert_threshold: f64,
    pub whale_min_volume: f64,
    pub snapshot_min_volume: f64,

    // Scanning
    pub update_interval: Duration,
    pub whale_scan_interval: Duration,
    pub lookback_blocks: u64,
    pub pages_per_chain: u32,
    pub page_size: u32,
    pub top_transfers: usize,
    pub max_pages_per_address: u32,

    // Registry
    pub max_transactions_per_address: usize,
    pub database_path: PathBuf,
    pub snapshot_path: PathBuf,

    pub tokens: Vec<Token>,

    // Dashboard
    pub dashboard_port: u16,
}

const PLACEHOLDER_KEYS: [&str; 2] = ["your_etherscan_api_key_here", "your_bscscan_api_key_here"];

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let whale_alert_threshold = parse_or(&lookup, "WHALE_ALERT_THRESHOLD", 1_000_000.0)?;

        let tokens = match lookup("TOKENS_FILE") {
            Some(path) => load_token_file(&path)?,
            None => builtin_tokens(),
        };

        Ok(Self {
            ethereum: ExplorerEndpoint {
                base_url: lookup("ETHERSCAN_API_URL")
                    .unwrap_or_else(|| "https://api.etherscan.io/api".to_string()),
                api_key: api_key(&lookup, "ETHERSCAN_API_KEY")?,
            },
            bsc: ExplorerEndpoint {
                base_url: lookup("BSCSCAN_API_URL")
                    .unwrap_or_else(|| "https://api.bscscan.com/api".to_string()),
                api_key: api_key(&lookup, "BSCSCAN_API_KEY")?,
            },
            supply_api_url: lookup("SUPPLY_API_URL").unwrap_or_else(|| {
                "https://stablecoins.llama.fi/stablecoins?includePrices=false".to_string()
            }),
            api_timeout: Duration::from_secs(parse_or(&lookup, "API_TIMEOUT_SECS", 10)?),

            rate_limit_ethereum: secs(parse_or(&lookup, "RATE_LIMIT_ETHEREUM_SECS", 0.2)?, "RATE_LIMIT_ETHEREUM_SECS")?,
            rate_limit_bsc: secs(parse_or(&lookup, "RATE_LIMIT_BSC_SECS", 0.2)?, "RATE_LIMIT_BSC_SECS")?,

            large_tx_threshold: parse_or(&lookup, "LARGE_TX_THRESHOLD", 1_000_000.0)?,
            whale_alert_threshold,
            whale_min_volume: parse_or(&lookup, "WHALE_MIN_VOLUME", whale_alert_threshold)?,
            snapshot_min_volume: parse_or(&lookup, "SNAPSHOT_MIN_VOLUME", 0.0)?,

            update_interval: minutes(&lookup, "UPDATE_INTERVAL_MINUTES", 15)?,
            whale_scan_interval: minutes(&lookup, "WHALE_SCAN_INTERVAL_MINUTES", 15)?,
            lookback_blocks: parse_or(&lookup, "LOOKBACK_BLOCKS", 1000)?,
            pages_per_chain: parse_or(&lookup, "PAGES_PER_CHAIN", 2)?,
            page_size: non_zero(&lookup, "PAGE_SIZE", 100)?,
            top_transfers: parse_or(&lookup, "TOP_TRANSFERS", 10)?,
            max_pages_per_address: non_zero(&lookup, "MAX_PAGES_PER_ADDRESS", 5)?,

            max_transactions_per_address: parse_or(&lookup, "MAX_TRANSACTIONS_PER_ADDRESS", 100)?,
            database_path: lookup("DATABASE_PATH")
                .unwrap_or_else(|| "data/stablewatch.db".to_string())
                .into(),
            snapshot_path: lookup("SNAPSHOT_PATH")
                .unwrap_or_else(|| "csv_reports/whale_summary.csv".to_string())
                .into(),

            tokens,

            dashboard_port: parse_or(&lookup, "DASHBOARD_PORT", 3000)?,
        })
    }

    pub fn explorer(&self, chain: Chain) -> &ExplorerEndpoint {
        match chain {
            Chain::Ethereum => &self.ethereum,
            Chain::Bsc => &self.bsc,
        }
    }

    pub fn rate_limit(&self, chain: Chain) -> Duration {
        match chain {
            Chain::Ethereum => self.rate_limit_ethereum,
            Chain::Bsc => self.rate_limit_bsc,
        }
    }

    /// Find the tracked token whose contract on `chain` is `address`
    pub fn token_by_contract(&self, chain: Chain, address: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| {
            t.contract(chain)
                .map(|c| c.eq_ignore_ascii_case(address))
                .unwrap_or(false)
        })
    }
}

fn api_key<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))?;

    if PLACEHOLDER_KEYS.contains(&value.as_str()) {
        return Err(ConfigError::Invalid { key, value });
    }
    Ok(value)
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn secs(value: f64, key: &'static str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// A non-zero whole number of minutes
fn minutes<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(lookup, key, default)?;
    value
        .checked_mul(60)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
}

fn non_zero<F>(lookup: &F, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

fn load_token_file(path: &str) -> Result<Vec<Token>, ConfigError> {
    let err = |reason: String| ConfigError::TokenFile {
        path: path.to_string(),
        reason,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
    let specs: BTreeMap<String, TokenSpec> =
        serde_json::from_str(&raw).map_err(|e| err(e.to_string()))?;

    if specs.is_empty() {
        return Err(err("no tokens defined".to_string()));
    }

    Ok(specs
        .into_iter()
        .map(|(symbol, spec)| Token {
            decimals: spec.decimals.unwrap_or_else(|| default_decimals(&symbol)),
            symbol,
            contracts: spec.contracts,
            supply_id: spec.supply_id,
        })
        .collect())
}

#[cfg(test)]
impl Config {
    /// Configuration with fake API keys and no rate-limit delay
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| match key {
            "ETHERSCAN_API_KEY" => Some("test-eth-key".to_string()),
            "BSCSCAN_API_KEY" => Some("test-bsc-key".to_string()),
            "RATE_LIMIT_ETHEREUM_SECS" | "RATE_LIMIT_BSC_SECS" => Some("0".to_string()),
            _ => None,
        })
        .expect("test config")
    }
}
