//! SQLite persistence for Stablewatch

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Chain;
use crate::error::PersistenceError;

pub type DbResult<T> = Result<T, PersistenceError>;

/// One stored supply reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyRecord {
    pub symbol: String,
    pub supply: f64,
    pub recorded_at: String,
}

/// Alert record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub alert_type: String,
    pub title: String,
    pub message: String,
    pub data: String,
    pub created_at: String,
}

/// SQLite database service
pub struct DatabaseService {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseService {
    /// Open (or create) the database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> DbResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::with_connection(Connection::open(db_path)?)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn in_memory() -> DbResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> DbResult<Self> {
        let service = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        service.initialize()?;
        Ok(service)
    }

    fn initialize(&self) -> DbResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS whales (
                address TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cursors (
                chain TEXT PRIMARY KEY,
                block INTEGER NOT NULL,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS supply_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                supply REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT,
                title TEXT,
                message TEXT,
                data TEXT,
                created_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_supply_symbol ON supply_history(symbol, id);
            "#,
        )?;

        info!(target: "DATABASE", "Initialized successfully");
        Ok(())
    }

    // ============================================
    // WHALE REGISTRY
    // ============================================

    /// All whale documents as (address, json)
    pub fn load_whale_documents(&self) -> DbResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT address, record FROM whales ORDER BY address")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Replace every whale document in one transaction
    pub fn replace_whale_documents(&self, docs: &[(String, String)]) -> DbResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM whales", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO whales (address, record) VALUES (?1, ?2)")?;
            for (address, record) in docs {
                stmt.execute(params![address, record])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or overwrite the given whale documents in one transaction
    pub fn upsert_whale_documents(&self, docs: &[(String, String)]) -> DbResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO whales (address, record) VALUES (?1, ?2)")?;
            for (address, record) in docs {
                stmt.execute(params![address, record])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // ============================================
    // CURSORS
    // ============================================

    pub fn load_cursors(&self) -> DbResult<Vec<(Chain, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chain, block FROM cursors")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut cursors = Vec::new();
        for row in rows {
            let (chain, block) = row?;
            match chain.parse::<Chain>() {
                Ok(chain) => cursors.push((chain, block.max(0) as u64)),
                Err(e) => warn!(target: "DATABASE", "Ignoring stored cursor: {}", e),
            }
        }
        Ok(cursors)
    }

    pub fn save_cursor(&self, chain: Chain, block: u64) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cursors (chain, block, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![chain.as_str(), block as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ============================================
    // SUPPLY
    // ============================================

    pub fn save_supply(&self, symbol: &str, supply: f64) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO supply_history (symbol, supply, recorded_at) VALUES (?1, ?2, ?3)",
            params![symbol, supply, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent reading per symbol
    pub fn latest_supply(&self) -> DbResult<Vec<SupplyRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, supply, recorded_at FROM supply_history
            WHERE id IN (SELECT MAX(id) FROM supply_history GROUP BY symbol)
            ORDER BY symbol
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SupplyRecord {
                symbol: row.get(0)?,
                supply: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // ============================================
    // ALERT METHODS
    // ============================================

    pub fn save_alert(&self, alert_type: &str, title: &str, message: &str, data: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO alerts (type, title, message, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![alert_type, title, message, data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_recent_alerts(&self, limit: i64) -> DbResult<Vec<AlertRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, type, title, message, data, created_at FROM alerts ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(AlertRecord {
                id: row.get(0)?,
                alert_type: row.get(1)?,
                title: row.get(2)?,
                message: row.get(3)?,
                data: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }
}

impl Clone for DatabaseService {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}
