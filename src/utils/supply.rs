//! Circulating supply lookups against the stablecoin index

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{Config, Token};

/// Source of circulating supply figures. Failures degrade to zero.
#[async_trait]
pub trait SupplySource: Send + Sync {
    async fn get_supply(&self, token: &Token) -> f64;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeggedIndex {
    pegged_assets: Vec<PeggedAsset>,
}

#[derive(Debug, Deserialize)]
struct PeggedAsset {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    gecko_id: Option<String>,
    #[serde(default)]
    circulating: HashMap<String, f64>,
}

impl PeggedAsset {
    fn total(&self) -> f64 {
        self.circulating.values().sum()
    }
}

/// Find `token` in an index payload and return its circulating supply.
///
/// Index identifiers win over symbols, symbols over names, since bridged
/// variants can share a symbol.
pub fn supply_from_index(body: &str, token: &Token) -> Option<f64> {
    let index: PeggedIndex = serde_json::from_str(body).ok()?;

    let by_id = |a: &&PeggedAsset| {
        a.gecko_id.as_deref() == Some(token.supply_id.as_str()) || a.id == token.supply_id
    };
    let by_symbol = |a: &&PeggedAsset| a.symbol.eq_ignore_ascii_case(&token.symbol);
    let by_name = |a: &&PeggedAsset| a.name.eq_ignore_ascii_case(&token.symbol);

    index
        .pegged_assets
        .iter()
        .find(by_id)
        .or_else(|| index.pegged_assets.iter().find(by_symbol))
        .or_else(|| index.pegged_assets.iter().find(by_name))
        .map(PeggedAsset::total)
}

/// One download of the index serves every token looked up within this window
const INDEX_TTL: Duration = Duration::from_secs(60);

/// HTTP client for the stablecoin index
pub struct SupplyClient {
    client: reqwest::Client,
    url: String,
    /// Held across the download so concurrent lookups share one request
    cached: Mutex<Option<(Instant, Arc<String>)>>,
}

impl SupplyClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.api_timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.supply_api_url.clone(),
            cached: Mutex::new(None),
        })
    }

    /// The index body, downloaded at most once per [`INDEX_TTL`]. Failures
    /// are not cached.
    async fn index(&self) -> reqwest::Result<Arc<String>> {
        let mut cached = self.cached.lock().await;
        if let Some((fetched_at, body)) = cached.as_ref() {
            if fetched_at.elapsed() < INDEX_TTL {
                return Ok(Arc::clone(body));
            }
        }

        let body = Arc::new(self.fetch_index().await?);
        *cached = Some((Instant::now(), Arc::clone(&body)));
        Ok(body)
    }

    async fn fetch_index(&self) -> reqwest::Result<String> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl SupplySource for SupplyClient {
    async fn get_supply(&self, token: &Token) -> f64 {
        let body = match self.index().await {
            Ok(body) => body,
            Err(e) => {
                warn!(target: "SUPPLY", token = %token.symbol, error = %e, "Supply index unavailable");
                return 0.0;
            }
        };

        match supply_from_index(&body, token) {
            Some(supply) => {
                debug!(target: "SUPPLY", token = %token.symbol, supply, "Circulating supply");
                supply
            }
            None => {
                warn!(target: "SUPPLY", token = %token.symbol, "Token not found in supply index");
                0.0
            }
        }
    }
}
