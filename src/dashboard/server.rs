//! HTTP status API and WebSocket alert feed

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::modules::whale_scanner::ScanPhase;
use crate::modules::{CursorStore, WhaleRegistry, WhaleScanner};
use crate::scheduler::Shutdown;
use crate::utils::alerts::WhaleAlert;
use crate::utils::database::{AlertRecord, SupplyRecord};
use crate::utils::snapshot::SnapshotRow;
use crate::utils::{AlertService, DatabaseService, MetricsService};

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    uptime: f64,
}

/// Stats response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    whales_tracked: usize,
    whales_watched: u64,
    alerts_sent: u64,
    cursors: BTreeMap<String, u64>,
    phases: BTreeMap<String, ScanPhase>,
    uptime: f64,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "init")]
    Init {
        stats: StatsResponse,
        recent_alerts: Vec<WhaleAlert>,
    },
    #[serde(rename = "alert")]
    Alert(WhaleAlert),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WhaleRegistry>,
    pub whale_scanner: Arc<WhaleScanner>,
    pub cursors: Arc<CursorStore>,
    pub alerts: AlertService,
    pub database: Arc<DatabaseService>,
    pub metrics: Arc<MetricsService>,
    pub start_time: std::time::Instant,
}

impl AppState {
    fn stats(&self) -> StatsResponse {
        StatsResponse {
            whales_tracked: self.registry.len(),
            whales_watched: self.whale_scanner.whales_watched(),
            alerts_sent: self.whale_scanner.alerts_sent(),
            cursors: self
                .cursors
                .snapshot()
                .into_iter()
                .map(|(chain, height)| (chain.to_string(), height))
                .collect(),
            phases: self
                .whale_scanner
                .phases()
                .into_iter()
                .map(|(chain, phase)| (chain.to_string(), phase))
                .collect(),
            uptime: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Status server
pub struct DashboardServer {
    config: Config,
    state: AppState,
}

impl DashboardServer {
    pub fn new(
        config: Config,
        registry: Arc<WhaleRegistry>,
        whale_scanner: Arc<WhaleScanner>,
        cursors: Arc<CursorStore>,
        alerts: AlertService,
        database: Arc<DatabaseService>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let state = AppState {
            registry,
            whale_scanner,
            cursors,
            alerts,
            database,
            metrics,
            start_time: std::time::Instant::now(),
        };

        Self { config, state }
    }

    /// Serve until shutdown is triggered
    pub async fn start(&self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.dashboard_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(target: "DASHBOARD", "Status API running at http://localhost:{}", self.config.dashboard_port);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        info!(target: "DASHBOARD", "Status API stopped");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/whales", get(get_whales))
        .route("/api/whales/:address", get(get_whale))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/history", get(get_alert_history))
        .route("/api/supply", get(get_supply))
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ============================================
// HANDLERS
// ============================================

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.stats())
}

async fn get_whales(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<SnapshotRow>> {
    let limit = params.limit.unwrap_or(50);
    let mut rows = state.registry.export_snapshot(0.0);
    rows.truncate(limit);
    Json(rows)
}

async fn get_whale(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    match state.registry.get(&address.to_lowercase()) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Whale not found"})),
        )
            .into_response(),
    }
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<WhaleAlert>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.alerts.get_recent_alerts(limit))
}

async fn get_alert_history(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<AlertRecord>> {
    let limit = params.limit.unwrap_or(50) as i64;
    match state.database.get_recent_alerts(limit) {
        Ok(alerts) => Json(alerts),
        Err(e) => {
            warn!(target: "DASHBOARD", "Failed to read alert history: {}", e);
            Json(vec![])
        }
    }
}

async fn get_supply(State(state): State<AppState>) -> Json<Vec<SupplyRecord>> {
    match state.database.latest_supply() {
        Ok(supply) => Json(supply),
        Err(e) => {
            warn!(target: "DASHBOARD", "Failed to read supply: {}", e);
            Json(vec![])
        }
    }
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    state.metrics.whales_tracked.set(state.registry.len() as f64);

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.get_metrics(),
    )
        .into_response()
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.start_time.elapsed().as_secs_f64(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    info!(target: "DASHBOARD", "WebSocket client connected");

    let init_msg = WsMessage::Init {
        stats: state.stats(),
        recent_alerts: state.alerts.get_recent_alerts(20),
    };
    if let Ok(json) = serde_json::to_string(&init_msg) {
        let _ = sender.send(Message::Text(json)).await;
    }

    let mut alert_rx = state.alerts.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let alert = match alert_rx.recv().await {
                Ok(alert) => alert,
                Err(RecvError::Lagged(n)) => {
                    warn!(target: "DASHBOARD", "WebSocket client lagged {} alerts", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if let Ok(json) = serde_json::to_string(&WsMessage::Alert(alert)) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(target: "DASHBOARD", "WebSocket client disconnected");
}
