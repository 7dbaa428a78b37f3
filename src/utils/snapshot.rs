//! Whale snapshot CSV sink
//!
//! The snapshot is the only channel from the supply scanner to the whale
//! scanner: one row per address, sorted by total volume, descending.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::PersistenceError;

/// One exported registry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Total Transactions")]
    pub total_transactions: u64,
    /// Comma-joined chain names
    #[serde(rename = "Active Chains")]
    pub active_chains: String,
    /// Comma-joined token symbols
    #[serde(rename = "Tokens Traded")]
    pub tokens_traded: String,
    #[serde(rename = "Last Active")]
    pub last_active: String,
    #[serde(rename = "Total Volume (USD)")]
    pub total_volume: f64,
    #[serde(rename = "Average Transaction Size (USD)")]
    pub average_transaction_size: f64,
}

/// Write rows to `path`, replacing any previous snapshot atomically
pub fn write_snapshot(path: &Path, rows: &[SnapshotRow]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the snapshot, keeping rows whose volume exceeds `min_volume`.
/// A snapshot that does not exist yet is empty.
pub fn load_snapshot(path: &Path, min_volume: f64) -> Result<Vec<SnapshotRow>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<SnapshotRow>() {
        let row = row?;
        if row.total_volume > min_volume {
            rows.push(row);
        }
    }
    Ok(rows)
}
