//! `HubServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::auth::{self, Authenticator};
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::HealthResponse;
use crate::origin::OriginPolicy;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use crate::websocket::Hub;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub.
    pub hub: Arc<Hub>,
    /// Credential validator.
    pub auth: Arc<dyn Authenticator>,
    /// Upgrade origin allow-list.
    pub origins: Arc<OriginPolicy>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server started.
    pub start_time: Instant,
    /// Live-session ceiling for new upgrades.
    pub max_connections: usize,
    /// Inbound frame ceiling applied to the transport.
    pub max_message_size: usize,
    /// Query parameter carrying the credential.
    pub token_query_param: Arc<str>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The messaging hub server.
pub struct HubServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    auth: Arc<dyn Authenticator>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HubServer {
    /// Create a server around a fresh hub.
    pub fn new(config: ServerConfig, chat: Arc<dyn ChatService>, auth: Arc<dyn Authenticator>) -> Self {
        let hub = Arc::new(Hub::new(chat, config.hub.clone()));
        Self {
            config,
            hub,
            auth,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            auth: Arc::clone(&self.auth),
            origins: Arc::new(self.config.origin_policy()),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            max_connections: self.config.max_connections,
            max_message_size: self.config.hub.heartbeat.max_message_size,
            token_query_param: Arc::from(self.config.token_query_param.as_str()),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and start serving in the background.
    ///
    /// Returns the bound address and the serve task. The task finishes after
    /// [`ShutdownCoordinator::shutdown`] once every session has been closed.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "emporium hub listening");

        let router = self.router();
        let token = self.shutdown.token();
        let hub = Arc::clone(&self.hub);
        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                let closed = hub.close_all();
                info!(closed, "shutdown signal received, sessions closed");
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting upgrades, close every session and wait for the serve
    /// task within the configured timeout.
    pub async fn shutdown_gracefully(&self, server: JoinHandle<()>) -> DrainOutcome {
        self.shutdown.drain(server, self.config.shutdown_timeout).await
    }

    /// The connection hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }
}

fn reject(status: StatusCode, reason: &'static str) -> Response {
    counter!(crate::metrics::WS_UPGRADE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
    (status, reason).into_response()
}

/// GET /ws: validate origin, credential and capacity, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .map(|v| v.to_str().unwrap_or_default());
    if !state.origins.is_allowed(origin) {
        debug!(?origin, "upgrade refused: origin not allowed");
        return reject(StatusCode::FORBIDDEN, "origin");
    }

    let Some(token) = auth::extract_token(&headers, &params, &state.token_query_param) else {
        return reject(StatusCode::UNAUTHORIZED, "missing_credential");
    };
    let user_id = match state.auth.authenticate(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!(error = %e, "upgrade refused: credential rejected");
            return reject(StatusCode::UNAUTHORIZED, "invalid_credential");
        }
    };

    if state.hub.session_count() >= state.max_connections {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "capacity");
    }
    if state.shutdown.is_shutting_down() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "shutting_down");
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "upgrade refused: not a websocket request");
            return reject(StatusCode::UPGRADE_REQUIRED, "not_upgrade");
        }
    };

    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            // Shutdown may have closed the hub since the check above.
            if let Some(session) = hub.accept(stream, sink, user_id).await {
                session.wait().await;
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        &state.hub,
        state.start_time,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue_token, JwtAuthenticator};
    use crate::chat::InMemoryChatService;
    use crate::ids::UserId;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"server-test-secret";

    fn make_server(config: ServerConfig) -> HubServer {
        HubServer::new(
            config,
            Arc::new(InMemoryChatService::new(true)),
            Arc::new(JwtAuthenticator::new(SECRET, None)),
        )
    }

    fn token(user: &str) -> String {
        issue_token(SECRET, &UserId::from(user), 300, None).unwrap()
    }

    async fn status_of(app: Router, req: Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    fn ws_request(uri: &str) -> axum::http::request::Builder {
        Request::builder().uri(uri)
    }

    #[tokio::test]
    async fn health_endpoint_returns_counts() {
        let server = make_server(ServerConfig::default());
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["rooms"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let server = make_server(ServerConfig::default());
        let req = ws_request("/ws").body(Body::empty()).unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_credential_is_unauthorized() {
        let server = make_server(ServerConfig::default());
        let req = ws_request("/ws?token=garbage").body(Body::empty()).unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disallowed_origin_is_forbidden_before_auth() {
        let config = ServerConfig {
            allowed_origins: vec!["https://shop.example".into()],
            ..ServerConfig::default()
        };
        let server = make_server(config);
        let req = ws_request("/ws")
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn valid_credential_without_upgrade_requires_upgrade() {
        let server = make_server(ServerConfig::default());
        let req = ws_request("/ws")
            .header(header::AUTHORIZATION, format!("Bearer {}", token("u1")))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn connection_limit_refuses() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        let server = make_server(config);
        let req = ws_request(&format!("/ws?token={}", token("u1")))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn shutting_down_refuses() {
        let server = make_server(ServerConfig::default());
        server.shutdown().shutdown();
        let req = ws_request(&format!("/ws?token={}", token("u1")))
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_route_needs_recorder() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server(ServerConfig::default()).with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(ServerConfig::default());
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        assert_eq!(status_of(server.router(), req).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server(ServerConfig::default());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.shutdown_gracefully(handle).await, DrainOutcome::Completed);
    }
}
