//! Whale Registry - aggregated activity of addresses seen in large transfers
//!
//! Every qualifying transfer creates or updates a record for both its sender
//! and its receiver. Records are never deleted. Transfers are not
//! deduplicated: recording the same transfer twice counts it twice.

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Chain;
use crate::error::PersistenceError;
use crate::utils::decoder::NormalizedTransfer;
use crate::utils::snapshot::SnapshotRow;
use crate::utils::DatabaseService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// Compact view of one transfer kept on a whale record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub direction: Direction,
    pub token: String,
    pub chain: Chain,
    pub counterparty: String,
    pub amount: f64,
    pub tx_hash: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleRecord {
    pub address: String,
    pub total_transactions: u64,
    pub chains: BTreeSet<Chain>,
    pub tokens: BTreeSet<String>,
    pub last_active: i64,
    /// Most recent transfers, oldest first
    pub transactions: VecDeque<TransferSummary>,
}

impl WhaleRecord {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            total_transactions: 0,
            chains: BTreeSet::new(),
            tokens: BTreeSet::new(),
            last_active: 0,
            transactions: VecDeque::new(),
        }
    }

    fn apply(&mut self, transfer: &NormalizedTransfer, direction: Direction, cap: usize) {
        let counterparty = match direction {
            Direction::Send => &transfer.to,
            Direction::Receive => &transfer.from,
        };

        self.total_transactions += 1;
        self.chains.insert(transfer.chain);
        self.tokens.insert(transfer.token.clone());
        self.last_active = self.last_active.max(transfer.timestamp);
        self.transactions.push_back(TransferSummary {
            direction,
            token: transfer.token.clone(),
            chain: transfer.chain,
            counterparty: counterparty.to_lowercase(),
            amount: transfer.amount,
            tx_hash: transfer.tx_hash.clone(),
            timestamp: transfer.timestamp,
        });

        while self.transactions.len() > cap {
            self.transactions.pop_front();
        }
    }

    /// Volume over the retained transfer window
    pub fn total_volume(&self) -> f64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }

    pub fn to_row(&self) -> SnapshotRow {
        let total_volume = self.total_volume();
        let average_transaction_size = if self.transactions.is_empty() {
            0.0
        } else {
            total_volume / self.transactions.len() as f64
        };

        SnapshotRow {
            address: self.address.clone(),
            total_transactions: self.total_transactions,
            active_chains: join(self.chains.iter().map(Chain::as_str)),
            tokens_traded: join(self.tokens.iter().map(String::as_str)),
            last_active: Utc
                .timestamp_opt(self.last_active, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            total_volume,
            average_transaction_size,
        }
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

pub type WhaleMap = BTreeMap<String, WhaleRecord>;

fn encode(whales: &WhaleMap) -> Result<Vec<(String, String)>, PersistenceError> {
    whales
        .iter()
        .map(|(address, record)| -> Result<_, PersistenceError> {
            Ok((address.clone(), serde_json::to_string(record)?))
        })
        .collect()
}

/// Persisted address registry owned by the supply scanner
pub struct WhaleRegistry {
    whales: Mutex<WhaleMap>,
    database: Arc<DatabaseService>,
    max_transactions: usize,
}

impl WhaleRegistry {
    /// Open the registry, loading the last saved state
    pub fn open(database: Arc<DatabaseService>, max_transactions: usize) -> Result<Self, PersistenceError> {
        let registry = Self {
            whales: Mutex::new(WhaleMap::new()),
            database,
            max_transactions,
        };

        let whales = registry.load()?;
        info!(target: "REGISTRY", "Loaded {} whale records", whales.len());
        *registry.whales.lock() = whales;
        Ok(registry)
    }

    /// Read the persisted mapping
    pub fn load(&self) -> Result<WhaleMap, PersistenceError> {
        let mut whales = WhaleMap::new();
        for (address, doc) in self.database.load_whale_documents()? {
            whales.insert(address, serde_json::from_str(&doc)?);
        }
        Ok(whales)
    }

    /// Replace the persisted mapping in a single transaction
    pub fn save(&self, whales: &WhaleMap) -> Result<(), PersistenceError> {
        self.database.replace_whale_documents(&encode(whales)?)
    }

    /// Credit a transfer to its sender and receiver, then persist.
    /// In-memory state only changes once the save succeeds.
    pub fn record_transfer(&self, transfer: &NormalizedTransfer) -> Result<(), PersistenceError> {
        let mut whales = self.whales.lock();
        let mut touched = WhaleMap::new();

        for (address, direction) in [
            (&transfer.from, Direction::Send),
            (&transfer.to, Direction::Receive),
        ] {
            let key = address.to_lowercase();
            if !touched.contains_key(&key) {
                let current = whales
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| WhaleRecord::new(&key));
                touched.insert(key.clone(), current);
            }
            if let Some(record) = touched.get_mut(&key) {
                record.apply(transfer, direction, self.max_transactions);
            }
        }

        let docs = encode(&touched)?;
        self.database.upsert_whale_documents(&docs)?;
        whales.extend(touched);

        debug!(
            target: "REGISTRY",
            token = %transfer.token,
            chain = %transfer.chain,
            amount = transfer.amount,
            "Recorded transfer {}",
            transfer.tx_hash
        );
        Ok(())
    }

    /// Rows with volume of at least `min_volume`, largest volume first.
    /// Ties keep address order.
    pub fn export_snapshot(&self, min_volume: f64) -> Vec<SnapshotRow> {
        let mut rows: Vec<SnapshotRow> = self
            .whales
            .lock()
            .values()
            .map(WhaleRecord::to_row)
            .filter(|row| row.total_volume >= min_volume)
            .collect();

        rows.sort_by(|a, b| {
            b.total_volume
                .partial_cmp(&a.total_volume)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }

    pub fn get(&self, address: &str) -> Option<WhaleRecord> {
        self.whales.lock().get(&address.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.whales.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
