//! Structured whale notifications

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

use crate::config::Chain;
use crate::log_whale;
use crate::utils::DatabaseService;

const HISTORY_LIMIT: usize = 1000;

/// A transfer by a registered whale that crossed the alert threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleAlert {
    pub whale_label: String,
    pub token: String,
    pub chain: Chain,
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub tx_hash: String,
    pub timestamp: i64,
}

impl WhaleAlert {
    pub fn message(&self) -> String {
        let time = Utc
            .timestamp_opt(self.timestamp, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.timestamp.to_string());

        format!(
            "Whale: {}\nToken: {}\nTransaction: {}\nFrom: {}\nTo: {}\nValue: ${:.2}\nTime: {}",
            self.whale_label, self.token, self.tx_hash, self.from, self.to, self.amount, time
        )
    }
}

/// Fan-out for whale notifications: log line, history, live subscribers, database
#[derive(Clone)]
pub struct AlertService {
    database: Arc<DatabaseService>,
    history: Arc<RwLock<VecDeque<WhaleAlert>>>,
    sender: broadcast::Sender<WhaleAlert>,
}

impl AlertService {
    pub fn new(database: Arc<DatabaseService>) -> Self {
        let (sender, _) = broadcast::channel(256);

        Self {
            database,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT))),
            sender,
        }
    }

    /// Subscribe to live notifications
    pub fn subscribe(&self) -> broadcast::Receiver<WhaleAlert> {
        self.sender.subscribe()
    }

    /// Emit a whale notification
    pub fn notify_whale(&self, alert: WhaleAlert) {
        log_whale!(
            chain = %alert.chain,
            token = %alert.token,
            whale = %alert.whale_label,
            from = %alert.from,
            to = %alert.to,
            amount = alert.amount,
            tx_hash = %alert.tx_hash,
            timestamp = alert.timestamp,
            "🐋 Whale Alert! {}",
            alert.chain.as_str().to_uppercase()
        );

        let data = serde_json::to_string(&alert).unwrap_or_default();
        if let Err(e) = self.database.save_alert(
            "whale",
            &format!("Whale Alert - {}", alert.chain.as_str().to_uppercase()),
            &alert.message(),
            &data,
        ) {
            error!(target: "ALERTS", "Failed to store alert: {}", e);
        }

        {
            let mut history = self.history.write();
            history.push_front(alert.clone());
            history.truncate(HISTORY_LIMIT);
        }

        // No subscribers is fine
        let _ = self.sender.send(alert);
    }

    /// Most recent notifications, newest first
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<WhaleAlert> {
        self.history.read().iter().take(limit).cloned().collect()
    }
}
