//! HTTP bindings for MCP
//!
//! Two flavours share one endpoint, `/mcp`:
//!
//! - **Stateless**: every POST is self-contained and runs on a fresh engine
//!   that needs no handshake. No session token is issued; `GET` and `DELETE`
//!   answer 405.
//! - **Streamable**: a POSTed `initialize` without a session header creates a
//!   session and returns its token in `Mcp-Session-Id`. Later POSTs carry the
//!   header, `GET` opens a server-to-client event stream for the session, and
//!   `DELETE` tears the session down at once.
//!
//! Both flavours expose `GET /health`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use anycrawl_mcp::registry::{ClosePolicy, RegistryConfig, SessionRegistry, TransportKind};
//! use anycrawl_mcp::transport::{EngineFactory, HttpTransport};
//! use anycrawl_mcp::{McpRouter, ToolCatalog};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let engines: EngineFactory = Arc::new(|_tenant: &str| -> anycrawl_mcp::Result<McpRouter> {
//!         Ok(McpRouter::new(ToolCatalog::new()))
//!     });
//!     let registry = Arc::new(SessionRegistry::new(
//!         TransportKind::Streamable,
//!         RegistryConfig::default().close_policy(ClosePolicy::Immediate),
//!     ));
//!     let _maintenance = registry.start_maintenance();
//!
//!     HttpTransport::streamable(engines, registry)
//!         .serve("127.0.0.1:3000", async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use futures::Stream;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::{Error, ErrorCode, JsonRpcError, Result};
use crate::protocol::{JsonRpcResponse, SUPPORTED_PROTOCOL_VERSIONS};
use crate::registry::{CloseGuard, DEFAULT_TENANT, RegistryError, Session, SessionRegistry};
use crate::router::McpRouter;

use super::service::{EngineFactory, ServiceFactory, identity_factory};
use super::{dispatch, is_error_response, is_initialize};

/// Header carrying the session token
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol version
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// SSE event type for JSON-RPC messages
pub(crate) const SSE_MESSAGE_EVENT: &str = "message";

/// Interval between SSE keep-alive comments
pub(crate) const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// HTTP transport for MCP servers
pub struct HttpTransport {
    engines: EngineFactory,
    services: ServiceFactory,
    registry: Option<Arc<SessionRegistry>>,
}

impl HttpTransport {
    /// Request/response binding without sessions
    pub fn stateless(engines: EngineFactory) -> Self {
        Self {
            engines,
            services: identity_factory(),
            registry: None,
        }
    }

    /// Session-based binding backed by `registry`
    pub fn streamable(engines: EngineFactory, registry: Arc<SessionRegistry>) -> Self {
        Self {
            engines,
            services: identity_factory(),
            registry: Some(registry),
        }
    }

    /// Wrap every engine with a middleware stack
    pub fn services(mut self, services: ServiceFactory) -> Self {
        self.services = services;
        self
    }

    /// Mode name reported by `/health`
    pub fn mode(&self) -> &'static str {
        match self.registry {
            Some(_) => "streamable",
            None => "stateless",
        }
    }

    /// Build the axum router for this transport
    pub fn into_router(self) -> Router {
        let mode = self.mode();
        let app = match self.registry {
            Some(registry) => Router::new()
                .route(
                    "/mcp",
                    post(handle_post).get(handle_get).delete(handle_delete),
                )
                .with_state(StreamableState {
                    engines: self.engines,
                    services: self.services,
                    registry,
                }),
            None => Router::new()
                .route(
                    "/mcp",
                    post(handle_stateless_post)
                        .get(method_not_allowed)
                        .delete(method_not_allowed),
                )
                .with_state(StatelessState {
                    engines: self.engines,
                    services: self.services,
                }),
        };
        app.merge(health_router(mode))
    }

    /// Serve on `addr` until `shutdown` resolves
    pub async fn serve<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mode = self.mode();
        serve_router(self.into_router(), addr, mode, shutdown).await
    }
}

pub(crate) async fn serve_router<F>(
    router: Router,
    addr: &str,
    mode: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

    tracing::info!(addr = %addr, mode, "MCP HTTP transport listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Transport(format!("Server error: {}", e)))
}

pub(crate) fn health_router(mode: &'static str) -> Router {
    Router::new().route(
        "/health",
        get(move || async move { Json(json!({ "status": "ok", "mode": mode })) }),
    )
}

#[derive(Clone)]
struct StatelessState {
    engines: EngineFactory,
    services: ServiceFactory,
}

/// Shared by the single-tenant and multi-tenant streamable endpoints
#[derive(Clone)]
pub(crate) struct StreamableState {
    pub(crate) engines: EngineFactory,
    pub(crate) services: ServiceFactory,
    pub(crate) registry: Arc<SessionRegistry>,
}

async fn handle_stateless_post(State(state): State<StatelessState>, body: String) -> Response {
    let payload = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let engine = match build_engine(&state.engines, DEFAULT_TENANT) {
        Ok(engine) => engine.stateless(),
        Err(resp) => return resp,
    };
    match dispatch(&engine, &state.services, payload).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(JsonRpcResponse::error(
            None,
            JsonRpcError::new(
                ErrorCode::InvalidRequest,
                "Method not allowed: this server is stateless",
            ),
        )),
    )
        .into_response()
}

async fn handle_post(
    State(state): State<StreamableState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    streamable_post(&state, DEFAULT_TENANT, &headers, &body).await
}

async fn handle_get(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    streamable_get(&state, DEFAULT_TENANT, &headers).await
}

async fn handle_delete(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    streamable_delete(&state, DEFAULT_TENANT, &headers).await
}

/// POST: create a session on `initialize`, otherwise route to the session
/// named by the header.
pub(crate) async fn streamable_post(
    state: &StreamableState,
    tenant: &str,
    headers: &HeaderMap,
    body: &str,
) -> Response {
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let initialize = is_initialize(&payload);

    if !initialize
        && let Some(version) = protocol_version(headers)
        && !SUPPORTED_PROTOCOL_VERSIONS.contains(&version.as_str())
    {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            JsonRpcError::invalid_request(format!("Unsupported protocol version: {}", version)),
        );
    }

    let token = session_id(headers);
    let created = token.is_none();
    let session = match token {
        Some(token) => match state.registry.resolve(tenant, &token).await {
            Some(session) => session,
            None => return invalid_session("Session not found or expired"),
        },
        None if initialize => match create_session(&state.engines, &state.registry, tenant).await {
            Ok(session) => session,
            Err(resp) => return resp,
        },
        None => return invalid_session("Missing Mcp-Session-Id header"),
    };

    let response = {
        let _turn = session.dispatch_lock().await;
        dispatch(session.router(), &state.services, payload).await
    };

    if created && response.as_ref().is_none_or(is_error_response) {
        // The handshake failed; nothing can use this session
        state.registry.remove(tenant, session.token()).await;
        return match response {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
    }

    let mut resp = match response {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(&mut resp, &session);
    resp
}

/// GET: open the session's event stream
pub(crate) async fn streamable_get(
    state: &StreamableState,
    tenant: &str,
    headers: &HeaderMap,
) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.contains("text/event-stream") {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Accept header must include text/event-stream",
        )
            .into_response();
    }

    let Some(token) = session_id(headers) else {
        return invalid_session("Missing Mcp-Session-Id header");
    };
    let Some(session) = state.registry.resolve(tenant, &token).await else {
        return invalid_session("Session not found or expired");
    };

    let guard = state.registry.close_guard(&session);
    tracing::debug!(session_id = %token, "Event stream opened");

    let mut resp = Sse::new(event_stream(&session, guard))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    with_session_header(&mut resp, &session);
    resp
}

/// DELETE: explicit teardown, bypassing the grace period
pub(crate) async fn streamable_delete(
    state: &StreamableState,
    tenant: &str,
    headers: &HeaderMap,
) -> Response {
    let Some(token) = session_id(headers) else {
        return invalid_session("Missing Mcp-Session-Id header");
    };

    if state.registry.remove(tenant, &token).await {
        tracing::info!(session_id = %token, "Session terminated");
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Session not found").into_response()
    }
}

pub(crate) async fn create_session(
    engines: &EngineFactory,
    registry: &SessionRegistry,
    tenant: &str,
) -> std::result::Result<Arc<Session>, Response> {
    let engine = build_engine(engines, tenant)?;
    registry
        .create(tenant, engine)
        .await
        .map_err(|e| match e {
            RegistryError::AtCapacity { .. } => rpc_error(
                StatusCode::SERVICE_UNAVAILABLE,
                JsonRpcError::internal_error(format!("{}, try again later", e)),
            ),
        })
}

pub(crate) fn build_engine(
    engines: &EngineFactory,
    tenant: &str,
) -> std::result::Result<McpRouter, Response> {
    engines(tenant).map_err(|e| {
        tracing::error!(error = %e, "Failed to build engine");
        rpc_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonRpcError::internal_error(e.to_string()),
        )
    })
}

/// Messages published on `session`, as SSE `message` events.
///
/// The stream holds `guard`, so dropping it (client gone) reports the
/// transport as closed.
pub(crate) fn event_stream(
    session: &Session,
    guard: CloseGuard,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static {
    BroadcastStream::new(session.subscribe()).filter_map(move |item| {
        let _open = &guard;
        match item {
            Ok(message) => Some(Ok(Event::default().event(SSE_MESSAGE_EVENT).data(message))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged, messages dropped");
                None
            }
        }
    })
}

pub(crate) fn parse_body(body: &str) -> std::result::Result<Value, Response> {
    serde_json::from_str(body).map_err(|e| {
        rpc_error(
            StatusCode::BAD_REQUEST,
            JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
        )
    })
}

pub(crate) fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(None, error))).into_response()
}

pub(crate) fn invalid_session(message: &str) -> Response {
    rpc_error(StatusCode::BAD_REQUEST, JsonRpcError::invalid_session(message))
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn protocol_version(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn with_session_header(resp: &mut Response, session: &Session) {
    if let Ok(value) = HeaderValue::from_str(session.token()) {
        resp.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use crate::registry::{ClosePolicy, Lifecycle, RegistryConfig, TransportKind};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn engines() -> EngineFactory {
        Arc::new(|_tenant: &str| -> Result<McpRouter> {
            Ok(McpRouter::new(ToolCatalog::new()).server_info("test-server", "1.0.0"))
        })
    }

    fn registry(max_sessions: usize) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(
            TransportKind::Streamable,
            RegistryConfig::default()
                .close_policy(ClosePolicy::Immediate)
                .max_sessions(max_sessions),
        ))
    }

    fn init_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }
        })
    }

    fn post(session: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn bare(method: &str, session: Option<&str>, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, id);
        }
        if let Some(accept) = accept {
            builder = builder.header("Accept", accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(app: &Router) -> String {
        let resp = app.clone().oneshot(post(None, init_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.headers()[MCP_SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_initialize_creates_session() {
        let registry = registry(10);
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();

        let token = initialize(&app).await;
        assert_eq!(
            registry.status(DEFAULT_TENANT, &token).await,
            Some(Lifecycle::Active)
        );

        let resp = app
            .clone()
            .oneshot(post(
                Some(&token),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = app
            .oneshot(post(
                Some(&token),
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(json_body(resp).await["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn test_request_without_session_is_rejected_without_mutation() {
        let registry = registry(10);
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();

        let resp = app
            .oneshot(post(
                None,
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["code"], -32001);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_session_is_invalid() {
        let app = HttpTransport::streamable(engines(), registry(10)).into_router();
        let resp = app
            .oneshot(post(
                Some("not-a-session"),
                json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let registry = registry(10);
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();
        let token = initialize(&app).await;

        let resp = app.oneshot(post(Some(&token), init_body())).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_leaves_no_session() {
        let registry = registry(10);
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();

        let resp = app
            .oneshot(post(
                None,
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"bogus": true}}),
            ))
            .await
            .unwrap();
        assert!(!resp.headers().contains_key(MCP_SESSION_ID_HEADER));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let registry = registry(10);
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();
        let token = initialize(&app).await;

        let resp = app
            .clone()
            .oneshot(bare("DELETE", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(registry.is_empty().await);

        let resp = app
            .clone()
            .oneshot(bare("DELETE", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(bare("DELETE", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_max_sessions_limit() {
        let app = HttpTransport::streamable(engines(), registry(1)).into_router();
        initialize(&app).await;

        let resp = app.oneshot(post(None, init_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_get_requires_event_stream_accept() {
        let app = HttpTransport::streamable(engines(), registry(10)).into_router();
        let token = initialize(&app).await;

        let resp = app
            .clone()
            .oneshot(bare("GET", Some(&token), Some("application/json")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);

        let resp = app
            .oneshot(bare("GET", None, Some("text/event-stream")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_delivers_and_closing_it_ends_session() {
        let registry = registry(10);
        let _maintenance = registry.start_maintenance();
        let app = HttpTransport::streamable(engines(), registry.clone()).into_router();
        let token = initialize(&app).await;

        let resp = app
            .oneshot(bare("GET", Some(&token), Some("text/event-stream")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let session = registry.resolve(DEFAULT_TENANT, &token).await.unwrap();
        assert_eq!(session.open_streams(), 1);
        assert!(session.publish(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string()));

        let mut body = resp.into_body().into_data_stream();
        let frame = futures::StreamExt::next(&mut body).await.unwrap().unwrap();
        let frame = String::from_utf8_lossy(&frame).to_string();
        assert!(frame.contains("event: message"));
        assert!(frame.contains(r#""method":"ping""#));

        drop(body);
        drop(session);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stateless_get_is_405() {
        let app = HttpTransport::stateless(engines()).into_router();
        for method in ["GET", "DELETE"] {
            let resp = app
                .clone()
                .oneshot(bare(method, Some("anything"), Some("text/event-stream")))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn test_stateless_post_needs_no_handshake() {
        let app = HttpTransport::stateless(engines()).into_router();
        let resp = app
            .oneshot(post(
                None,
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key(MCP_SESSION_ID_HEADER));
        assert!(json_body(resp).await["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let app = HttpTransport::stateless(engines()).into_router();
        let req = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{nope"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_health_reports_mode() {
        for (transport, mode) in [
            (HttpTransport::stateless(engines()), "stateless"),
            (HttpTransport::streamable(engines(), registry(1)), "streamable"),
        ] {
            let req = Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap();
            let resp = transport.into_router().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(json_body(resp).await, json!({"status": "ok", "mode": mode}));
        }
    }
}
