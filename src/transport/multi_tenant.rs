//! Multi-tenant HTTP binding
//!
//! Each caller brings its own AnyCrawl API key. The key is the tenant: it
//! selects the session partition and becomes the bearer credential of every
//! engine created for that tenant, so two tenants never see each other's
//! sessions or share a remote API client.
//!
//! Routes:
//!
//! | Route | Binding |
//! |---|---|
//! | `POST\|GET\|DELETE /{credential}/mcp` | streamable HTTP |
//! | `GET /{credential}/sse` | legacy SSE stream |
//! | `POST /{credential}/messages?sessionId=` | legacy SSE message post |
//! | `GET /sse` | legacy SSE, credential in `x-anycrawl-api-key` or `Authorization: Bearer` |
//! | `POST /messages?sessionId=` | legacy SSE post, session found in any tenant |
//! | `/mcp` | 401, credential missing |
//!
//! Streamable and legacy sessions live in separate registries, so their token
//! namespaces never collide. When an event stream closes, its session moves to
//! PendingClose rather than being torn down, and a client that comes back
//! within the grace period resumes where it left off.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{any, get, post},
};
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::{JsonRpcError, Result};
use crate::registry::{Session, SessionRegistry};
use crate::tenant::{credential_from_headers, is_valid_credential, redact};

use super::dispatch;
use super::http::{
    KEEP_ALIVE_INTERVAL, StreamableState, create_session, event_stream, health_router,
    invalid_session, parse_body, rpc_error, serve_router, streamable_delete, streamable_get,
    streamable_post,
};
use super::service::{EngineFactory, ServiceFactory, identity_factory};

/// SSE event announcing where to POST messages
const SSE_ENDPOINT_EVENT: &str = "endpoint";

/// Multi-tenant transport over streamable HTTP and legacy SSE
pub struct MultiTenantTransport {
    engines: EngineFactory,
    services: ServiceFactory,
    streamable: Arc<SessionRegistry>,
    legacy: Arc<SessionRegistry>,
}

impl MultiTenantTransport {
    /// `streamable` and `legacy` hold the sessions of each binding
    pub fn new(
        engines: EngineFactory,
        streamable: Arc<SessionRegistry>,
        legacy: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            engines,
            services: identity_factory(),
            streamable,
            legacy,
        }
    }

    /// Wrap every engine with a middleware stack
    pub fn services(mut self, services: ServiceFactory) -> Self {
        self.services = services;
        self
    }

    pub fn into_router(self) -> Router {
        let state = TenantState {
            streamable: StreamableState {
                engines: self.engines,
                services: self.services,
                registry: self.streamable,
            },
            legacy: self.legacy,
        };

        Router::new()
            .route(
                "/{credential}/mcp",
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .route("/{credential}/sse", get(handle_tenant_sse))
            .route("/{credential}/messages", post(handle_tenant_messages))
            .route("/sse", get(handle_header_sse))
            .route("/messages", post(handle_messages))
            .route("/mcp", any(missing_credential))
            .with_state(state)
            .merge(health_router("multi-tenant"))
    }

    /// Serve on `addr` until `shutdown` resolves
    pub async fn serve<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        serve_router(self.into_router(), addr, "multi-tenant", shutdown).await
    }
}

#[derive(Clone)]
struct TenantState {
    streamable: StreamableState,
    legacy: Arc<SessionRegistry>,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn missing_credential() -> Response {
    unauthorized("Missing API key: use /{api_key}/mcp")
}

fn unauthorized(message: &str) -> Response {
    rpc_error(
        StatusCode::UNAUTHORIZED,
        JsonRpcError::invalid_request(message),
    )
}

fn tenant_from_path(credential: &str) -> std::result::Result<&str, Response> {
    if is_valid_credential(credential) {
        Ok(credential)
    } else {
        Err(unauthorized("Invalid API key in path"))
    }
}

async fn handle_post(
    State(state): State<TenantState>,
    Path(credential): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    match tenant_from_path(&credential) {
        Ok(tenant) => streamable_post(&state.streamable, tenant, &headers, &body).await,
        Err(resp) => resp,
    }
}

async fn handle_get(
    State(state): State<TenantState>,
    Path(credential): Path<String>,
    headers: HeaderMap,
) -> Response {
    match tenant_from_path(&credential) {
        Ok(tenant) => streamable_get(&state.streamable, tenant, &headers).await,
        Err(resp) => resp,
    }
}

async fn handle_delete(
    State(state): State<TenantState>,
    Path(credential): Path<String>,
    headers: HeaderMap,
) -> Response {
    match tenant_from_path(&credential) {
        Ok(tenant) => streamable_delete(&state.streamable, tenant, &headers).await,
        Err(resp) => resp,
    }
}

async fn handle_tenant_sse(
    State(state): State<TenantState>,
    Path(credential): Path<String>,
) -> Response {
    match tenant_from_path(&credential) {
        Ok(tenant) => {
            let endpoint = format!("/{}/messages", tenant);
            open_legacy_stream(&state, tenant, endpoint).await
        }
        Err(resp) => resp,
    }
}

async fn handle_header_sse(State(state): State<TenantState>, headers: HeaderMap) -> Response {
    match credential_from_headers(&headers) {
        Some(tenant) => open_legacy_stream(&state, &tenant, "/messages".to_string()).await,
        None => unauthorized("Missing API key: send x-anycrawl-api-key or Authorization: Bearer"),
    }
}

/// Create a legacy session and stream its messages, starting with the
/// `endpoint` event that tells the client where to POST.
async fn open_legacy_stream(state: &TenantState, tenant: &str, endpoint: String) -> Response {
    let session = match create_session(&state.streamable.engines, &state.legacy, tenant).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let guard = state.legacy.close_guard(&session);
    tracing::info!(
        session_id = %session.token(),
        tenant = %redact(tenant),
        "Legacy event stream opened"
    );

    let endpoint = format!("{}?sessionId={}", endpoint, session.token());
    let announce = tokio_stream::once(Ok::<_, Infallible>(
        Event::default().event(SSE_ENDPOINT_EVENT).data(endpoint),
    ));
    Sse::new(announce.chain(event_stream(&session, guard)))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

async fn handle_tenant_messages(
    State(state): State<TenantState>,
    Path(credential): Path<String>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let tenant = match tenant_from_path(&credential) {
        Ok(tenant) => tenant,
        Err(resp) => return resp,
    };
    let Some(token) = query.session_id else {
        return invalid_session("Missing sessionId query parameter");
    };
    let session = state.legacy.resolve(tenant, &token).await;
    post_legacy_message(&state, session, &body).await
}

async fn handle_messages(
    State(state): State<TenantState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let Some(token) = query.session_id else {
        return invalid_session("Missing sessionId query parameter");
    };
    let session = state.legacy.find_any(&token).await;
    post_legacy_message(&state, session, &body).await
}

/// Handle a posted message; the reply travels over the event stream.
async fn post_legacy_message(
    state: &TenantState,
    session: Option<Arc<Session>>,
    body: &str,
) -> Response {
    let Some(session) = session else {
        return invalid_session("Session not found or expired");
    };
    // Replies only travel over the stream, and a new GET /sse always starts
    // a new session, so a session whose stream is gone can not be answered
    if session.open_streams() == 0 {
        state
            .legacy
            .transport_closed(session.tenant(), session.token())
            .await;
        return invalid_session("Session has no open event stream; reconnect to /sse");
    }
    let payload = match parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let response = {
        let _turn = session.dispatch_lock().await;
        dispatch(session.router(), &state.streamable.services, payload).await
    };

    if let Some(response) = response {
        match serde_json::to_string(&response) {
            Ok(message) => {
                if !session.publish(message) {
                    tracing::warn!(
                        session_id = %session.token(),
                        "No open event stream, response dropped"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
        }
    }
    StatusCode::ACCEPTED.into_response()
}
