//! Error taxonomy for Stablewatch

use thiserror::Error;

use crate::config::Chain;

/// Missing or invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read token config {path}: {reason}")]
    TokenFile { path: String, reason: String },
}

/// Outcome of a single upstream HTTP call that did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream rate limited")]
    RateLimited,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            FetchError::RateLimited
        } else {
            FetchError::Unavailable(e.to_string())
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Failure reading or writing durable state (registry, cursors, snapshot).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cursor for {chain} cannot move back from {current} to {requested}")]
    CursorRegression {
        chain: Chain,
        current: u64,
        requested: u64,
    },
}
