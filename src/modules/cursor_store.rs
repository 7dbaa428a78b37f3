//! Per-chain block cursors
//!
//! A cursor is the last block height fully scanned on a chain. Cursors only
//! move forward: an advance to a lower height is rejected and the stored
//! value is kept.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::Chain;
use crate::error::PersistenceError;
use crate::utils::DatabaseService;

pub struct CursorStore {
    cursors: RwLock<HashMap<Chain, u64>>,
    database: Arc<DatabaseService>,
}

impl CursorStore {
    /// Load persisted cursors
    pub fn load(database: Arc<DatabaseService>) -> Result<Self, PersistenceError> {
        let cursors: HashMap<Chain, u64> = database.load_cursors()?.into_iter().collect();

        for (chain, height) in &cursors {
            info!(target: "CURSORS", chain = %chain, height, "Resuming from stored cursor");
        }

        Ok(Self {
            cursors: RwLock::new(cursors),
            database,
        })
    }

    pub fn get(&self, chain: Chain) -> Option<u64> {
        self.cursors.read().get(&chain).copied()
    }

    /// Return the cursor, setting it to `head - lookback` on first use
    pub fn get_or_initialize(
        &self,
        chain: Chain,
        head: u64,
        lookback: u64,
    ) -> Result<u64, PersistenceError> {
        if let Some(height) = self.get(chain) {
            return Ok(height);
        }

        let start = head.saturating_sub(lookback);
        self.database.save_cursor(chain, start)?;
        self.cursors.write().insert(chain, start);
        info!(target: "CURSORS", chain = %chain, height = start, "Initialized cursor");
        Ok(start)
    }

    /// Move the cursor forward to `height`
    pub fn advance(&self, chain: Chain, height: u64) -> Result<(), PersistenceError> {
        let mut cursors = self.cursors.write();

        if let Some(&current) = cursors.get(&chain) {
            if height < current {
                return Err(PersistenceError::CursorRegression {
                    chain,
                    current,
                    requested: height,
                });
            }
        }

        self.database.save_cursor(chain, height)?;
        cursors.insert(chain, height);
        Ok(())
    }

    pub fn snapshot(&self) -> HashMap<Chain, u64> {
        self.cursors.read().clone()
    }
}
