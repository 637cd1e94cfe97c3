//! MCP Router - the protocol engine
//!
//! Decodes `initialize`, `ping`, `tools/list` and `tools/call` into responses,
//! independent of how the bytes arrived. Tool calls are delegated to the
//! [`ToolInvoker`]. The router implements Tower's `Service` trait, so
//! transports compose it with [`JsonRpcService`](crate::jsonrpc::JsonRpcService)
//! and middleware such as [`McpTracingLayer`](crate::tracing_layer::McpTracingLayer).
//!
//! One router value is one engine: clones share the lifecycle phase. Use
//! [`McpRouter::fresh`] to derive an independent engine from a template.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use tower_service::Service;

use crate::catalog::ToolCatalog;
use crate::context::{CancellationToken, NotificationSender, RequestContext};
use crate::error::{Error, JsonRpcError, Result};
use crate::invoker::ToolInvoker;
use crate::protocol::*;
use crate::session::{SessionPhase, SessionState};

#[derive(Clone)]
pub struct McpRouter {
    inner: Arc<McpRouterInner>,
    session: SessionState,
}

impl std::fmt::Debug for McpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRouter")
            .field("server_name", &self.inner.server_name)
            .field("server_version", &self.inner.server_version)
            .field("tools_count", &self.inner.invoker.catalog().len())
            .field("session_phase", &self.session.phase())
            .finish()
    }
}

/// Inner configuration that is shared across clones
#[derive(Clone)]
struct McpRouterInner {
    server_name: String,
    server_version: String,
    instructions: Option<String>,
    invoker: ToolInvoker,
    /// In-flight requests for cancellation tracking (shared across clones)
    in_flight: Arc<RwLock<HashMap<RequestId, CancellationToken>>>,
    /// Channel for pushing notifications to the connected client
    notification_tx: Option<NotificationSender>,
}

impl McpRouter {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            inner: Arc::new(McpRouterInner {
                server_name: env!("CARGO_PKG_NAME").to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                instructions: None,
                invoker: ToolInvoker::new(Arc::new(catalog)),
                in_flight: Arc::new(RwLock::new(HashMap::new())),
                notification_tx: None,
            }),
            session: SessionState::new(),
        }
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.server_name = name.into();
        inner.server_version = version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).instructions = Some(instructions.into());
        self
    }

    /// Serve every method without requiring the `initialize` handshake
    pub fn stateless(mut self) -> Self {
        self.session = SessionState::stateless();
        self
    }

    /// An independent engine sharing this router's catalog.
    ///
    /// The copy starts over in the lifecycle (stateless stays stateless),
    /// with no in-flight requests and no notification channel.
    pub fn fresh(&self) -> Self {
        let mut inner = (*self.inner).clone();
        inner.in_flight = Arc::new(RwLock::new(HashMap::new()));
        inner.notification_tx = None;
        let session = match self.session.phase() {
            SessionPhase::Stateless => SessionState::stateless(),
            _ => SessionState::new(),
        };
        Self {
            inner: Arc::new(inner),
            session,
        }
    }

    /// Set the channel tool handlers push notifications on
    pub fn with_notification_sender(mut self, tx: NotificationSender) -> Self {
        Arc::make_mut(&mut self.inner).notification_tx = Some(tx);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn catalog(&self) -> &ToolCatalog {
        self.inner.invoker.catalog()
    }

    /// Create a request context and register it for cancellation
    fn create_context(&self, request_id: RequestId) -> RequestContext {
        let ctx = RequestContext::new(request_id.clone());
        let ctx = match &self.inner.notification_tx {
            Some(tx) => ctx.with_notification_sender(tx.clone()),
            None => ctx,
        };

        if let Ok(mut in_flight) = self.inner.in_flight.write() {
            in_flight.insert(request_id, ctx.cancellation_token());
        }
        ctx
    }

    fn complete_request(&self, request_id: &RequestId) {
        if let Ok(mut in_flight) = self.inner.in_flight.write() {
            in_flight.remove(request_id);
        }
    }

    fn cancel_request(&self, request_id: &RequestId) -> bool {
        let Ok(in_flight) = self.inner.in_flight.read() else {
            return false;
        };
        let Some(token) = in_flight.get(request_id) else {
            return false;
        };
        token.cancel();
        true
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            logging: self
                .inner
                .notification_tx
                .as_ref()
                .map(|_| LoggingCapability::default()),
        }
    }

    async fn handle(&self, request_id: RequestId, request: McpRequest) -> Result<McpResponse> {
        let method = request.method_name();
        if !self.session.is_request_allowed(method) {
            tracing::warn!(
                method = %method,
                phase = ?self.session.phase(),
                "Request rejected: session not initialized"
            );
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(format!(
                "Session not initialized. Only 'initialize' and 'ping' are allowed before initialization. Got: {}",
                method
            ))));
        }

        match request {
            McpRequest::Initialize(params) => {
                if !self.session.mark_initializing() {
                    tracing::warn!(
                        client = %params.client_info.name,
                        "Rejected repeated initialize"
                    );
                    return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                        "Session already initialized",
                    )));
                }
                tracing::info!(
                    client = %params.client_info.name,
                    version = %params.client_info.version,
                    "Client initializing"
                );

                // Echo the client's version when supported, otherwise offer our latest
                let protocol_version =
                    if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                        params.protocol_version
                    } else {
                        LATEST_PROTOCOL_VERSION.to_string()
                    };

                Ok(McpResponse::Initialize(InitializeResult {
                    protocol_version,
                    capabilities: self.capabilities(),
                    server_info: Implementation {
                        name: self.inner.server_name.clone(),
                        version: self.inner.server_version.clone(),
                    },
                    instructions: self.inner.instructions.clone(),
                }))
            }

            McpRequest::ListTools(_params) => Ok(McpResponse::ListTools(ListToolsResult {
                tools: self.catalog().definitions(),
                next_cursor: None,
            })),

            McpRequest::CallTool(params) => {
                if !self.inner.invoker.contains(&params.name) {
                    return Err(Error::JsonRpc(JsonRpcError::unknown_tool(&params.name)));
                }

                let ctx = self.create_context(request_id);
                let result = self
                    .inner
                    .invoker
                    .invoke(ctx, &params.name, params.arguments)
                    .await
                    .map_err(|e| match e {
                        Error::JsonRpc(err) => Error::JsonRpc(err),
                        other => Error::JsonRpc(JsonRpcError::tool_execution_failed(other)),
                    })?;

                Ok(McpResponse::CallTool(result))
            }

            McpRequest::Ping => Ok(McpResponse::Pong(EmptyResult {})),

            McpRequest::Unknown { method, .. } => {
                Err(Error::JsonRpc(JsonRpcError::method_not_found(&method)))
            }
        }
    }

    /// Handle an MCP notification (no response expected)
    pub fn handle_notification(&self, notification: McpNotification) {
        match notification {
            McpNotification::Initialized => {
                if self.session.mark_initialized() {
                    tracing::info!("Session initialized, entering operation phase");
                } else {
                    tracing::debug!(
                        phase = ?self.session.phase(),
                        "Initialized notification in unexpected phase"
                    );
                }
            }
            McpNotification::Cancelled(params) => {
                if self.cancel_request(&params.request_id) {
                    tracing::info!(
                        request_id = ?params.request_id,
                        reason = ?params.reason,
                        "Request cancelled"
                    );
                } else {
                    tracing::debug!(
                        request_id = ?params.request_id,
                        "Cancellation requested for unknown request"
                    );
                }
            }
            McpNotification::Unknown { method, .. } => {
                tracing::debug!(method = %method, "Unknown notification received");
            }
        }
    }
}

// =============================================================================
// Tower Service implementation
// =============================================================================

/// Request type for the tower Service implementation
#[derive(Debug)]
pub struct RouterRequest {
    pub id: RequestId,
    pub inner: McpRequest,
}

/// Response type for the tower Service implementation
#[derive(Debug)]
pub struct RouterResponse {
    pub id: RequestId,
    pub inner: std::result::Result<McpResponse, JsonRpcError>,
}

impl RouterResponse {
    /// Convert to JSON-RPC response
    pub fn into_jsonrpc(self) -> JsonRpcResponse {
        match self.inner {
            Ok(response) => match serde_json::to_value(response) {
                Ok(result) => JsonRpcResponse::result(self.id, result),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    JsonRpcResponse::error(
                        Some(self.id),
                        JsonRpcError::internal_error(format!("Serialization error: {}", e)),
                    )
                }
            },
            Err(error) => JsonRpcResponse::error(Some(self.id), error),
        }
    }
}

impl Service<RouterRequest> for McpRouter {
    type Response = RouterResponse;
    type Error = std::convert::Infallible; // Errors are in the response
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let router = self.clone();
        let request_id = req.id.clone();
        Box::pin(async move {
            let result = router.handle(req.id, req.inner).await;
            router.complete_request(&request_id);
            Ok(RouterResponse {
                id: request_id,
                // Protocol errors keep their code; anything else is internal
                inner: result.map_err(|e| match e {
                    Error::JsonRpc(err) => err,
                    e => JsonRpcError::internal_error(e.to_string()),
                }),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, FieldError};
    use crate::tool::{ToolBuilder, Validate};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    impl Validate for AddInput {
        fn validate(&self, _errors: &mut Vec<FieldError>) {}
    }

    fn router() -> McpRouter {
        let add = ToolBuilder::new("add")
            .description("Add two numbers")
            .handler(|input: AddInput| async move {
                if input.a == 0 {
                    return Err(Error::tool("refusing zero"));
                }
                Ok(CallToolResult::text(format!("{}", input.a + input.b)))
            })
            .build()
            .expect("valid tool name");
        McpRouter::new(ToolCatalog::new().tool(add)).server_info("test", "1.0.0")
    }

    fn init_request(id: i64) -> RouterRequest {
        RouterRequest {
            id: RequestId::Number(id),
            inner: McpRequest::Initialize(InitializeParams {
                protocol_version: "2025-03-26".to_string(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: "test".to_string(),
                    version: "1.0".to_string(),
                },
            }),
        }
    }

    async fn call(router: &mut McpRouter, id: i64, request: McpRequest) -> RouterResponse {
        let req = RouterRequest {
            id: RequestId::Number(id),
            inner: request,
        };
        router.ready().await.unwrap().call(req).await.unwrap()
    }

    async fn init_router(router: &mut McpRouter) {
        let resp = router.ready().await.unwrap().call(init_request(0)).await.unwrap();
        assert!(resp.inner.is_ok());
        router.handle_notification(McpNotification::Initialized);
    }

    fn call_tool(name: &str, args: serde_json::Value) -> McpRequest {
        McpRequest::CallTool(CallToolParams {
            name: name.to_string(),
            arguments: args,
        })
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let mut router = router();
        init_router(&mut router).await;

        let resp = router.ready().await.unwrap().call(init_request(1)).await.unwrap();
        let err = resp.inner.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest.code());
        assert_eq!(err.message, "Session already initialized");
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() {
        let mut router = router();
        let resp = call(&mut router, 1, McpRequest::ListTools(Default::default())).await;
        assert_eq!(resp.inner.unwrap_err().code, ErrorCode::InvalidRequest.code());

        let resp = call(&mut router, 2, McpRequest::Ping).await;
        assert!(resp.inner.is_ok());
    }

    #[tokio::test]
    async fn test_stateless_router_skips_handshake() {
        let mut router = router().stateless();
        let resp = call(&mut router, 1, McpRequest::ListTools(Default::default())).await;
        match resp.inner {
            Ok(McpResponse::ListTools(result)) => assert_eq!(result.tools[0].name, "add"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_tool() {
        let mut router = router();
        init_router(&mut router).await;

        let resp = call(&mut router, 1, call_tool("add", json!({"a": 2, "b": 3}))).await;
        match resp.inner {
            Ok(McpResponse::CallTool(result)) => assert_eq!(result.all_text(), "5"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let mut router = router();
        init_router(&mut router).await;

        let resp = call(&mut router, 1, call_tool("nope", json!({}))).await;
        let err = resp.inner.unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound.code());
        assert_eq!(err.message, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn test_handler_error_is_tool_execution_failed() {
        let mut router = router();
        init_router(&mut router).await;

        let resp = call(&mut router, 1, call_tool("add", json!({"a": 0, "b": 1}))).await;
        let err = resp.inner.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());
        assert_eq!(err.message, "Tool execution failed: Tool error: refusing zero");
    }

    #[tokio::test]
    async fn test_fresh_router_has_own_phase() {
        let mut template = router();
        init_router(&mut template).await;

        let fresh = template.fresh();
        assert!(!fresh.session().is_initialized());
        assert!(template.session().is_initialized());
    }

    #[tokio::test]
    async fn test_logging_capability_follows_channel() {
        let (tx, _rx) = crate::context::notification_channel(4);
        let mut router = router().with_notification_sender(tx);
        let resp = router.ready().await.unwrap().call(init_request(0)).await.unwrap();
        let value = serde_json::to_value(resp.inner.unwrap()).unwrap();
        assert!(value["capabilities"]["logging"].is_object());
        assert_eq!(value["serverInfo"]["name"], "test");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut router = router().stateless();
        let resp = call(
            &mut router,
            1,
            McpRequest::Unknown {
                method: "resources/list".into(),
                params: None,
            },
        )
        .await;
        assert_eq!(resp.inner.unwrap_err().code, ErrorCode::MethodNotFound.code());
    }
}
