//! `PlexusServer`: axum HTTP + WebSocket front end for one [`Broker`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ::metrics::counter;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use plexus_core::PeerId;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broker::{Broker, ModuleListing};
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics as names;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionLimits, run_peer_session};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The broker all sessions route through.
    pub broker: Arc<Broker>,
    /// Shutdown coordinator; each session gets a child token.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Listener and transport limits.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
    /// Sessions admitted under the connection cap, including upgrades in flight.
    pub active: Arc<AtomicUsize>,
}

/// One place under the connection cap, held from admission until the
/// session ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()?;
        Some(Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The broker server.
pub struct PlexusServer {
    config: Arc<ServerConfig>,
    broker: Arc<Broker>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
    active: Arc<AtomicUsize>,
}

impl PlexusServer {
    /// Create a server with a fresh broker.
    pub fn new(config: ServerConfig, metrics_handle: Option<PrometheusHandle>) -> Self {
        let broker = Arc::new(Broker::new(config.broker_config()));
        Self {
            config: Arc::new(config),
            broker,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: Arc::clone(&self.broker),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
            active: Arc::clone(&self.active),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/modules", get(modules_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background until [`ShutdownCoordinator::shutdown`].
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(
            %local_addr,
            auth = self.broker.requires_auth(),
            max_connections = self.config.max_connections,
            "plexus server listening"
        );

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            info!("plexus server stopped");
        });
        Ok((local_addr, handle))
    }

    /// The broker.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
///
/// The connection cap is checked before the upgrade headers are validated.
/// Admission reserves a slot up front, so upgrades still in flight count
/// against the cap; the slot is released when the session ends or the
/// upgrade fails.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let limit = state.config.max_connections;
    let Some(slot) = ConnectionSlot::acquire(&state.active, limit) else {
        counter!(names::WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(
            connections = state.active.load(Ordering::Acquire),
            limit, "connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let limits = SessionLimits {
        max_send_queue: state.config.max_send_queue,
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
    };
    let closed = state.shutdown.child_token();
    let broker = state.broker;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_peer_session(socket, PeerId::new(), broker, limits, closed).await;
            drop(slot);
        })
}

/// GET /api/modules
async fn modules_handler(State(state): State<AppState>) -> Json<Vec<ModuleListing>> {
    Json(state.broker.modules())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.broker.peer_count();
    let modules = state.broker.module_count();
    Json(health::health_check(state.start_time, connections, modules))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> PlexusServer {
        PlexusServer::new(ServerConfig::default(), None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn broker_inherits_auth_policy() {
        let open = make_server();
        assert!(!open.broker().requires_auth());

        let gated = PlexusServer::new(
            ServerConfig {
                auth_token: Some("s3cr3t".into()),
                ..ServerConfig::default()
            },
            None,
        );
        assert!(gated.broker().requires_auth());
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = get_json(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["modules"], 0);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn modules_endpoint_empty() {
        let (status, body) = get_json(make_server().router(), "/api/modules").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn metrics_endpoint_without_handle_is_404() {
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = PlexusServer::new(ServerConfig::default(), Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_rejected() {
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert!(!resp.status().is_success());
    }

    #[tokio::test]
    async fn ws_over_connection_cap_is_503() {
        let server = PlexusServer::new(
            ServerConfig {
                max_connections: 0,
                ..ServerConfig::default()
            },
            None,
        );
        let resp = server.router().oneshot(upgrade_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/ws")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn connection_slots_stop_at_limit_and_release_on_drop() {
        let active = Arc::new(AtomicUsize::new(0));
        let a = ConnectionSlot::acquire(&active, 2).unwrap();
        let _b = ConnectionSlot::acquire(&active, 2).unwrap();
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        assert_eq!(active.load(Ordering::Acquire), 2);
        drop(a);
        assert!(ConnectionSlot::acquire(&active, 2).is_some());
        assert_eq!(active.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn admitted_upgrade_counts_before_peer_registers() {
        let server = PlexusServer::new(
            ServerConfig {
                max_connections: 1,
                ..ServerConfig::default()
            },
            None,
        );
        // An upgrade admitted but not yet registered with the broker.
        let in_flight = ConnectionSlot::acquire(&server.active, 1).unwrap();
        assert_eq!(server.broker().peer_count(), 0);
        let resp = server.router().oneshot(upgrade_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        drop(in_flight);
        // No real connection to upgrade here, so this one fails after
        // admission and must hand its slot back.
        let resp = server.router().oneshot(upgrade_request()).await.unwrap();
        assert_ne!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server.active.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn listen_reports_bind_failure() {
        let first = make_server();
        let (addr, _handle) = first.listen().await.unwrap();
        let second = PlexusServer::new(
            ServerConfig {
                port: addr.port(),
                ..ServerConfig::default()
            },
            None,
        );
        let err = second.listen().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
