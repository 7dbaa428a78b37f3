//! Utility modules

pub mod alerts;
pub mod database;
pub mod decoder;
pub mod explorer;
pub mod logger;
pub mod metrics;
pub mod rate_limiter;
pub mod snapshot;
pub mod supply;

pub use alerts::AlertService;
pub use database::DatabaseService;
pub use explorer::{ChainExplorer, ExplorerClient};
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use rate_limiter::RateLimiter;
pub use supply::{SupplyClient, SupplySource};
