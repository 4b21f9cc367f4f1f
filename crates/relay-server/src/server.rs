//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{CloseReason, ConnectionId};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bus::{MemoryBus, MessageBus};
use crate::config::ServerConfig;
use crate::health::{self, HealthReport};
use crate::http;
use crate::metrics;
use crate::registry::{MemorySessionStore, SessionStore};
use crate::relay::RelayContext;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay services.
    pub ctx: Arc<RelayContext>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// The pairing relay server.
pub struct RelayServer {
    ctx: Arc<RelayContext>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server over the given store and bus.
    pub fn new(config: ServerConfig, store: Arc<dyn SessionStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            ctx: Arc::new(RelayContext::new(config, store, bus)),
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Single-instance server with the in-memory store and bus.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(MemorySessionStore::new()), Arc::new(MemoryBus::new()))
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            shutdown: self.shutdown.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .merge(http::api_routes())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind, start the expiry sweeper, and serve until shutdown.
    ///
    /// Returns the bound address and a handle that completes once the HTTP
    /// server and the sweeper have stopped.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config().host.as_str(), self.config().port)).await?;
        let addr = listener.local_addr()?;
        let token = self.shutdown.token();
        let sweeper = tokio::spawn(self.ctx.sweeper().run(token.clone()));
        let app = self.router();
        let ctx = self.ctx.clone();

        let handle = tokio::spawn(async move {
            let on_shutdown = async move {
                token.cancelled().await;
                info!("shutting down, closing connections");
                ctx.hub.close_all(CloseReason::Normal);
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(on_shutdown).await {
                error!(error = %e, "http server failed");
            }
            let _ = sweeper.await;
        });

        info!(%addr, ws_endpoint = %self.config().ws_endpoint, "relay listening");
        Ok((addr, handle))
    }

    /// Relay services.
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    let ctx = &state.ctx;
    let reachable = health::probe_store(ctx.registry.store().as_ref()).await;
    let report = HealthReport::new(
        state.start_time,
        ctx.hub.connection_count(),
        ctx.hub.session_count(),
        reachable,
    );
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let ctx = state.ctx.clone();
    let live = ctx.hub.connection_count();
    if live >= ctx.config.max_connections {
        warn!(live, max = ctx.config.max_connections, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    let conn_id = ConnectionId::new();
    ws.max_message_size(ctx.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, conn_id, ctx))
}
