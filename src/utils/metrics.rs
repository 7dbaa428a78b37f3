//! Prometheus metrics service for Stablewatch

use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;
use tracing::info;

use crate::config::Chain;

/// Metrics service for Prometheus
#[derive(Clone)]
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Scanners
    pub scan_passes: IntCounterVec,
    pub large_transfers: IntCounterVec,
    pub large_transfer_volume: CounterVec,
    pub whale_alerts: IntCounterVec,
    pub whales_tracked: Gauge,
    pub cursor_height: GaugeVec,
    pub token_supply: GaugeVec,

    // Upstream
    pub explorer_requests: IntCounterVec,

    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let scan_passes = IntCounterVec::new(
            Opts::new("stablewatch_scan_passes_total", "Completed scanner passes"),
            &["scanner", "outcome"],
        )?;
        let large_transfers = IntCounterVec::new(
            Opts::new("stablewatch_large_transfers_total", "Large transfers recorded"),
            &["chain", "token"],
        )?;
        let large_transfer_volume = CounterVec::new(
            Opts::new("stablewatch_large_transfer_volume_total", "Volume of large transfers recorded"),
            &["chain", "token"],
        )?;
        let whale_alerts = IntCounterVec::new(
            Opts::new("stablewatch_whale_alerts_total", "Whale notifications emitted"),
            &["chain", "token"],
        )?;
        let whales_tracked = Gauge::new("stablewatch_whales_tracked", "Addresses in the whale registry")?;
        let cursor_height = GaugeVec::new(
            Opts::new("stablewatch_cursor_height", "Last fully scanned block per chain"),
            &["chain"],
        )?;
        let token_supply = GaugeVec::new(
            Opts::new("stablewatch_token_supply", "Circulating supply per token"),
            &["token"],
        )?;
        let explorer_requests = IntCounterVec::new(
            Opts::new("stablewatch_explorer_requests_total", "Explorer API requests"),
            &["chain", "endpoint", "outcome"],
        )?;
        let uptime = Gauge::new("stablewatch_uptime_seconds", "Application uptime")?;

        registry.register(Box::new(scan_passes.clone()))?;
        registry.register(Box::new(large_transfers.clone()))?;
        registry.register(Box::new(large_transfer_volume.clone()))?;
        registry.register(Box::new(whale_alerts.clone()))?;
        registry.register(Box::new(whales_tracked.clone()))?;
        registry.register(Box::new(cursor_height.clone()))?;
        registry.register(Box::new(token_supply.clone()))?;
        registry.register(Box::new(explorer_requests.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            start_time: Instant::now(),
            scan_passes,
            large_transfers,
            large_transfer_volume,
            whale_alerts,
            whales_tracked,
            cursor_height,
            token_supply,
            explorer_requests,
            uptime,
        })
    }

    pub fn record_pass(&self, scanner: &str, ok: bool) {
        self.scan_passes
            .with_label_values(&[scanner, if ok { "ok" } else { "failed" }])
            .inc();
    }

    pub fn record_large_transfer(&self, chain: Chain, token: &str, amount: f64) {
        self.large_transfers
            .with_label_values(&[chain.as_str(), token])
            .inc();
        self.large_transfer_volume
            .with_label_values(&[chain.as_str(), token])
            .inc_by(amount.max(0.0));
    }

    pub fn record_whale_alert(&self, chain: Chain, token: &str) {
        self.whale_alerts
            .with_label_values(&[chain.as_str(), token])
            .inc();
    }

    pub fn record_explorer_request(&self, chain: Chain, endpoint: &str, outcome: &str) {
        self.explorer_requests
            .with_label_values(&[chain.as_str(), endpoint, outcome])
            .inc();
    }

    pub fn set_cursor(&self, chain: Chain, height: u64) {
        self.cursor_height
            .with_label_values(&[chain.as_str()])
            .set(height as f64);
    }

    pub fn set_supply(&self, token: &str, supply: f64) {
        self.token_supply.with_label_values(&[token]).set(supply);
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> String {
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# metrics encoding failed: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
