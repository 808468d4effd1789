//! `GatewayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_bus::{EventBus, SystemShutdown};
use relay_core::ConnectionId;
use relay_settings::{RelaySettings, ServerSettings};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bridge::EventBusBridge;
use crate::health::{self, HealthResponse};
use crate::session::SessionManager;
use crate::shutdown::ShutdownCoordinator;
use crate::sweeper::spawn_idle_sweeper;
use crate::websocket::connection::run_ws_session;

/// Close code sent to every client when the server shuts down.
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event bus shared with in-process collaborators.
    pub bus: EventBus,
    /// Live client sessions.
    pub sessions: Arc<SessionManager>,
    /// Client access to the bus.
    pub bridge: Arc<EventBusBridge>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server was constructed.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Network and connection-loop settings.
    pub settings: Arc<ServerSettings>,
}

/// The Relay gateway server.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Create a server with its own event bus.
    pub fn new(settings: RelaySettings, metrics: Option<PrometheusHandle>) -> Self {
        let bus = EventBus::with_limits(
            settings.bus.max_handlers_per_key,
            Duration::from_millis(settings.bus.wait_for_timeout_ms),
        );
        Self::with_bus(settings, bus, metrics)
    }

    /// Create a server around an existing event bus.
    pub fn with_bus(
        settings: RelaySettings,
        bus: EventBus,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let RelaySettings {
            server,
            limits,
            bridge,
            ..
        } = settings;
        let sessions = Arc::new(SessionManager::new(limits));
        let bridge = Arc::new(EventBusBridge::new(bus.clone(), sessions.clone(), bridge));
        Self {
            state: AppState {
                bus,
                sessions,
                bridge,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics,
                settings: Arc::new(server),
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind, start serving, start the bridge and the idle sweeper.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let settings = &self.state.settings;
        let listener = TcpListener::bind((settings.host.as_str(), settings.port)).await?;
        let addr = listener.local_addr()?;

        self.state.bridge.start();

        let app = self.router();
        let token = self.state.shutdown.token();
        self.state.shutdown.track(tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                error!(error = %e, "server error");
            }
        }));

        self.state.shutdown.track(spawn_idle_sweeper(
            self.state.sessions.clone(),
            Duration::from_millis(settings.idle_timeout_ms),
            Duration::from_millis(settings.cleanup_interval_ms.max(1)),
            self.state.shutdown.token(),
        ));

        info!(%addr, "gateway listening");
        Ok(addr)
    }

    /// Shut down: announce on the bus, stop the bridge, close every session,
    /// stop background tasks, and drop all bus handlers.
    pub async fn close(&self, reason: &str) {
        info!(reason, "gateway shutting down");
        let _ = self.state.bus.emit_typed(
            "gateway",
            &SystemShutdown {
                reason: reason.to_owned(),
            },
        );
        self.state.bridge.stop();
        let closed = self
            .state
            .sessions
            .close_all(SHUTDOWN_CLOSE_CODE, "server shutting down");
        let timeout = Duration::from_millis(self.state.settings.shutdown_timeout_ms);
        self.state.shutdown.graceful_shutdown(Some(timeout)).await;
        self.state.bus.clear();
        info!(closed, "gateway stopped");
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.state.bus
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.state.sessions
    }

    /// The client bridge.
    pub fn bridge(&self) -> &Arc<EventBusBridge> {
        &self.state.bridge
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    user_id: Option<String>,
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let connection_id = ConnectionId::new();
    ws.max_message_size(state.settings.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, connection_id, query.user_id, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.sessions.session_count(),
        state.bus.handler_count(),
        state.bridge.is_running(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
