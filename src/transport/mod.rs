//! MCP transport implementations
//!
//! Every binding drives the same [`McpRouter`]; the bindings only differ in
//! how bytes arrive and how sessions are addressed:
//! - `stdio` - newline-delimited JSON on stdin/stdout, one implicit session
//! - `http` - stateless request/response, or streamable HTTP sessions
//!   addressed by the `Mcp-Session-Id` header
//! - `multi_tenant` - streamable HTTP and legacy SSE partitioned by the
//!   caller's AnyCrawl credential
//!
//! ## Synchronization
//!
//! - **Session storage**: [`SessionRegistry`](crate::registry::SessionRegistry)
//!   holds all sessions of one transport kind under a single `RwLock`
//! - **Ordering**: each session serializes message handling with a fair mutex
//! - **Event streams**: a `broadcast` channel per session fans pushed messages
//!   out to every open stream

pub mod http;
pub mod multi_tenant;
pub mod service;
pub mod stdio;

pub use http::HttpTransport;
pub use multi_tenant::MultiTenantTransport;
pub use service::{EngineFactory, McpBoxService, ServiceFactory, default_factory, identity_factory};
pub use stdio::StdioTransport;

use serde_json::Value;

use crate::error::{Error, JsonRpcError};
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage,
    McpNotification,
};
use crate::router::McpRouter;

/// Handle one inbound JSON-RPC payload (single message or batch) on `router`.
///
/// Notifications are applied to the engine and produce no output; `None` is
/// returned when the payload held nothing but notifications.
pub(crate) async fn dispatch(
    router: &McpRouter,
    services: &ServiceFactory,
    payload: Value,
) -> Option<JsonRpcResponseMessage> {
    let message = match payload {
        Value::Array(items) if items.is_empty() => {
            return Some(error_message(JsonRpcError::invalid_request(
                "Empty batch request",
            )));
        }
        Value::Array(items) => {
            let mut requests = Vec::with_capacity(items.len());
            for item in items {
                if is_notification(&item) {
                    apply_notification(router, item);
                } else {
                    requests.push(item);
                }
            }
            if requests.is_empty() {
                return None;
            }
            match serde_json::from_value::<Vec<JsonRpcRequest>>(Value::Array(requests)) {
                Ok(batch) => JsonRpcMessage::Batch(batch),
                Err(e) => {
                    return Some(error_message(JsonRpcError::invalid_request(format!(
                        "Invalid batch: {}",
                        e
                    ))));
                }
            }
        }
        item if is_notification(&item) => {
            apply_notification(router, item);
            return None;
        }
        item => match serde_json::from_value::<JsonRpcRequest>(item) {
            Ok(request) => JsonRpcMessage::Single(request),
            Err(e) => {
                return Some(error_message(JsonRpcError::invalid_request(format!(
                    "Invalid request: {}",
                    e
                ))));
            }
        },
    };

    let mut service = JsonRpcService::new(services(router.clone()));
    match service.call_message(message).await {
        Ok(response) => Some(response),
        Err(Error::JsonRpc(e)) => Some(error_message(e)),
        Err(e) => Some(error_message(JsonRpcError::internal_error(e.to_string()))),
    }
}

fn is_notification(item: &Value) -> bool {
    item.is_object() && item.get("id").is_none() && item.get("method").is_some()
}

pub(crate) fn apply_notification(router: &McpRouter, item: Value) {
    let notification = match serde_json::from_value::<JsonRpcNotification>(item) {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed notification");
            return;
        }
    };
    match McpNotification::from_jsonrpc(&notification) {
        Ok(n) => router.handle_notification(n),
        Err(e) => tracing::debug!(method = %notification.method, error = %e, "Ignoring notification"),
    }
}

pub(crate) fn error_message(error: JsonRpcError) -> JsonRpcResponseMessage {
    JsonRpcResponseMessage::Single(JsonRpcResponse::error(None, error))
}

/// Whether a payload is a single `initialize` request
pub(crate) fn is_initialize(payload: &Value) -> bool {
    payload.get("method").and_then(Value::as_str) == Some("initialize")
}

/// Whether a response carries a JSON-RPC error
pub(crate) fn is_error_response(response: &JsonRpcResponseMessage) -> bool {
    matches!(
        response,
        JsonRpcResponseMessage::Single(JsonRpcResponse::Error(_))
    )
}
