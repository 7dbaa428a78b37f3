//! Stablewatch - Stablecoin Monitoring Service
//!
//! Two independent scanners share one process:
//! - Supply Scanner: circulating supply and large transfers per stablecoin,
//!   building the whale registry and its CSV snapshot
//! - Whale Scanner: incremental block-range scans of the addresses in that
//!   snapshot, emitting whale alerts
//!
//! This is a **read-only** tool - no wallet or trading functionality.

mod config;
mod dashboard;
mod error;
mod modules;
mod scheduler;
mod utils;

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use config::Config;
use dashboard::DashboardServer;
use modules::{CursorStore, SupplyScanner, WhaleRegistry, WhaleScanner};
use scheduler::{shutdown_channel, spawn_periodic, Shutdown, ShutdownTrigger};
use utils::{
    init_logger, AlertService, ChainExplorer, DatabaseService, ExplorerClient, MetricsService,
    RateLimiter, SupplyClient, SupplySource,
};

const BANNER: &str = r#"
    +-----------------------------------------------------------+
    |                                                           |
    |   ____  _        _     _                    _       _     |
    |  / ___|| |_ __ _| |__ | | _____      ____ _| |_ ___| |__  |
    |  \___ \| __/ _` | '_ \| |/ _ \ \ /\ / / _` | __/ __| '_ \ |
    |   ___) | || (_| | |_) | |  __/\ V  V / (_| | || (__| | | ||
    |  |____/ \__\__,_|_.__/|_|\___| \_/\_/ \__,_|\__\___|_| |_||
    |                                                           |
    |   Stablecoin Supply | Large Transfers | Whale Alerts      |
    |                                                           |
    +-----------------------------------------------------------+
"#;

/// Stablewatch application
pub struct Stablewatch {
    config: Config,
    database: Arc<DatabaseService>,
    alerts: AlertService,
    metrics: Arc<MetricsService>,
    registry: Arc<WhaleRegistry>,
    cursors: Arc<CursorStore>,
    supply_scanner: Arc<SupplyScanner>,
    whale_scanner: Arc<WhaleScanner>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
}

impl Stablewatch {
    /// Wire up services and scanners
    pub fn new(config: Config) -> Result<Self> {
        let database = Arc::new(DatabaseService::new(&config.database_path)?);
        let metrics = Arc::new(MetricsService::new()?);
        let alerts = AlertService::new(Arc::clone(&database));

        let registry = Arc::new(WhaleRegistry::open(
            Arc::clone(&database),
            config.max_transactions_per_address,
        )?);
        let cursors = Arc::new(CursorStore::load(Arc::clone(&database))?);

        let explorer: Arc<dyn ChainExplorer> =
            Arc::new(ExplorerClient::new(config.clone(), Arc::clone(&metrics))?);
        let supply: Arc<dyn SupplySource> = Arc::new(SupplyClient::new(&config)?);
        let limiter = RateLimiter::from_config(&config);
        let (trigger, shutdown) = shutdown_channel();

        let supply_scanner = Arc::new(SupplyScanner::new(
            config.clone(),
            Arc::clone(&explorer),
            supply,
            limiter.clone(),
            Arc::clone(&registry),
            Arc::clone(&database),
            Arc::clone(&metrics),
        ));

        let whale_scanner = Arc::new(WhaleScanner::new(
            config.clone(),
            explorer,
            limiter,
            Arc::clone(&cursors),
            alerts.clone(),
            Arc::clone(&metrics),
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            database,
            alerts,
            metrics,
            registry,
            cursors,
            supply_scanner,
            whale_scanner,
            trigger,
            shutdown,
        })
    }

    /// Run both schedules and the status server until a shutdown signal
    pub async fn run(self) -> Result<()> {
        println!("{}", BANNER);

        info!(
            target: "STABLEWATCH",
            tokens = self.config.tokens.len(),
            whales = self.registry.len(),
            "Starting Stablewatch"
        );

        let scanner = Arc::clone(&self.supply_scanner);
        let supply_task = spawn_periodic(
            "supply_scanner",
            self.config.update_interval,
            self.shutdown.clone(),
            move || {
                let scanner = Arc::clone(&scanner);
                async move {
                    scanner.run_pass().await?;
                    Ok::<(), anyhow::Error>(())
                }
            },
        );

        let scanner = Arc::clone(&self.whale_scanner);
        let whale_task = spawn_periodic(
            "whale_scanner",
            self.config.whale_scan_interval,
            self.shutdown.clone(),
            move || {
                let scanner = Arc::clone(&scanner);
                async move {
                    scanner.run_pass().await?;
                    Ok::<(), anyhow::Error>(())
                }
            },
        );

        let dashboard = DashboardServer::new(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.whale_scanner),
            Arc::clone(&self.cursors),
            self.alerts.clone(),
            Arc::clone(&self.database),
            Arc::clone(&self.metrics),
        );
        let dashboard_shutdown = self.shutdown.clone();
        let dashboard_task = tokio::spawn(async move {
            if let Err(e) = dashboard.start(dashboard_shutdown).await {
                error!(target: "STABLEWATCH", "Status server failed: {:#}", e);
            }
        });

        shutdown_signal().await;
        info!(target: "STABLEWATCH", "Shutting down...");
        self.trigger.trigger();

        let (supply, whale, dashboard) = tokio::join!(supply_task, whale_task, dashboard_task);
        for (name, result) in [("supply_scanner", supply), ("whale_scanner", whale), ("dashboard", dashboard)] {
            if let Err(e) = result {
                error!(target: "STABLEWATCH", task = name, "Task ended abnormally: {}", e);
            }
        }

        info!(target: "STABLEWATCH", "Shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "STABLEWATCH", "Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "STABLEWATCH", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(target: "STABLEWATCH", "Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let app = match Stablewatch::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(target: "STABLEWATCH", "Failed to initialize: {:#}", e);
            return Err(e);
        }
    };

    app.run().await
}
