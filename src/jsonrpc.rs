//! JSON-RPC 2.0 service layer
//!
//! Provides a Tower [`Layer`] and [`Service`] for JSON-RPC framing of MCP requests.
//!
//! - [`JsonRpcLayer`] - Tower layer for [`ServiceBuilder`](tower::ServiceBuilder) composition
//! - [`JsonRpcService`] - Tower service wrapping an MCP router
//!
//! The service handles:
//! - Single request processing
//! - Batch request processing (concurrent execution)
//! - JSON-RPC version validation
//! - Error conversion to JSON-RPC error responses

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Layer;
use tower_service::Service;

use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage, McpRequest,
};
use crate::router::{RouterRequest, RouterResponse};

/// Tower layer that adds JSON-RPC 2.0 framing to an MCP service.
///
/// ```rust
/// use tower::ServiceBuilder;
/// use anycrawl_mcp::{JsonRpcLayer, McpRouter, ToolCatalog};
///
/// let router = McpRouter::new(ToolCatalog::new()).server_info("my-server", "1.0.0");
/// let service = ServiceBuilder::new()
///     .layer(JsonRpcLayer::new())
///     .service(router);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcLayer {
    _priv: (),
}

impl JsonRpcLayer {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl<S> Layer<S> for JsonRpcLayer {
    type Service = JsonRpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonRpcService::new(inner)
    }
}

/// Service that handles JSON-RPC framing.
///
/// Wraps an MCP service and handles JSON-RPC request/response conversion.
/// Supports both single requests and batch requests.
pub struct JsonRpcService<S> {
    inner: S,
}

impl<S> JsonRpcService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Process a single JSON-RPC request
    pub async fn call_single(&mut self, req: JsonRpcRequest) -> Result<JsonRpcResponse>
    where
        S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        process_single_request(self.inner.clone(), req).await
    }

    /// Process a batch of JSON-RPC requests concurrently.
    ///
    /// `initialize` may not be batched; such members are answered with an
    /// `InvalidRequest` error without reaching the router.
    pub async fn call_batch(&mut self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>>
    where
        S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        if requests.is_empty() {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "Empty batch request",
            )));
        }

        let futures: Vec<_> = requests
            .into_iter()
            .map(|req| {
                let inner = self.inner.clone();
                let req_id = req.id.clone();
                async move {
                    if req.method == "initialize" {
                        return JsonRpcResponse::error(
                            Some(req_id),
                            JsonRpcError::invalid_request("initialize cannot be batched"),
                        );
                    }
                    match process_single_request(inner, req).await {
                        Ok(resp) => resp,
                        // Convert errors to error responses instead of dropping
                        Err(e) => JsonRpcResponse::error(
                            Some(req_id),
                            JsonRpcError::internal_error(e.to_string()),
                        ),
                    }
                }
            })
            .collect();

        Ok(futures::future::join_all(futures).await)
    }

    /// Process a JSON-RPC message (single or batch)
    pub async fn call_message(&mut self, msg: JsonRpcMessage) -> Result<JsonRpcResponseMessage>
    where
        S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
    {
        match msg {
            JsonRpcMessage::Single(req) => {
                let response = self.call_single(req).await?;
                Ok(JsonRpcResponseMessage::Single(response))
            }
            JsonRpcMessage::Batch(requests) => {
                let responses = self.call_batch(requests).await?;
                Ok(JsonRpcResponseMessage::Batch(responses))
            }
        }
    }
}

impl<S> Clone for JsonRpcService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Service<JsonRpcRequest> for JsonRpcService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = JsonRpcResponse;
    type Error = Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|never| match never {})
    }

    fn call(&mut self, req: JsonRpcRequest) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(process_single_request(inner, req))
    }
}

/// Helper function to process a single JSON-RPC request
async fn process_single_request<S>(mut inner: S, req: JsonRpcRequest) -> Result<JsonRpcResponse>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible> + Send + 'static,
    S::Future: Send,
{
    if let Err(e) = req.validate() {
        return Ok(JsonRpcResponse::error(Some(req.id), e));
    }

    let mcp_request = match McpRequest::from_jsonrpc(&req) {
        Ok(r) => r,
        Err(e) => {
            return Ok(JsonRpcResponse::error(
                Some(req.id),
                JsonRpcError::invalid_params(e.to_string()),
            ));
        }
    };

    let router_req = RouterRequest {
        id: req.id,
        inner: mcp_request,
    };

    let response = match inner.call(router_req).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    Ok(response.into_jsonrpc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::McpRouter;
    use crate::catalog::ToolCatalog;
    use crate::error::{ErrorCode, FieldError};
    use crate::protocol::McpNotification;
    use crate::tool::{ToolBuilder, Validate};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddInput {
        a: i32,
        b: i32,
    }

    impl Validate for AddInput {
        fn validate(&self, _errors: &mut Vec<FieldError>) {}
    }

    fn create_test_router() -> McpRouter {
        let add_tool = ToolBuilder::new("add")
            .description("Add two numbers")
            .handler(|input: AddInput| async move {
                Ok(crate::CallToolResult::text(format!("{}", input.a + input.b)))
            })
            .build()
            .unwrap();

        McpRouter::new(ToolCatalog::new().tool(add_tool)).server_info("test-server", "1.0.0")
    }

    fn init_request() -> JsonRpcRequest {
        JsonRpcRequest::new(1, "initialize").with_params(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "1.0" }
        }))
    }

    #[tokio::test]
    async fn test_jsonrpc_service() {
        let router = create_test_router();
        let mut service = JsonRpcService::new(router.clone());

        let resp = service.call_single(init_request()).await.unwrap();
        assert!(matches!(resp, JsonRpcResponse::Result(_)));
        router.handle_notification(McpNotification::Initialized);

        let req = JsonRpcRequest::new(2, "tools/list").with_params(json!({}));
        match service.call_single(req).await.unwrap() {
            JsonRpcResponse::Result(r) => {
                let tools = r.result.get("tools").unwrap().as_array().unwrap();
                assert_eq!(tools.len(), 1);
            }
            JsonRpcResponse::Error(e) => panic!("Expected result, got error: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let mut service = JsonRpcService::new(create_test_router());
        let mut req = JsonRpcRequest::new(1, "ping");
        req.jsonrpc = "1.0".to_string();
        match service.call_single(req).await.unwrap() {
            JsonRpcResponse::Error(e) => {
                assert_eq!(e.error.code, ErrorCode::InvalidRequest.code())
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_params_are_invalid_params() {
        let mut service = JsonRpcService::new(create_test_router().stateless());
        let req = JsonRpcRequest::new(1, "tools/call").with_params(json!({"arguments": {}}));
        match service.call_single(req).await.unwrap() {
            JsonRpcResponse::Error(e) => {
                assert_eq!(e.error.code, ErrorCode::InvalidParams.code())
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_request() {
        let router = create_test_router();
        let mut service = JsonRpcService::new(router.clone());
        service.call_single(init_request()).await.unwrap();
        router.handle_notification(McpNotification::Initialized);

        let requests = vec![
            JsonRpcRequest::new(2, "tools/list").with_params(json!({})),
            JsonRpcRequest::new(3, "tools/call").with_params(json!({
                "name": "add",
                "arguments": { "a": 1, "b": 2 }
            })),
        ];

        let responses = service.call_batch(requests).await.unwrap();
        assert_eq!(responses.len(), 2);
        match &responses[1] {
            JsonRpcResponse::Result(r) => assert_eq!(r.result["content"][0]["text"], "3"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batched_initialize_is_rejected() {
        let router = create_test_router();
        let mut service = JsonRpcService::new(router.clone());

        let responses = service.call_batch(vec![init_request()]).await.unwrap();
        assert!(matches!(&responses[0], JsonRpcResponse::Error(_)));
        assert!(!router.session().is_initialized());
    }

    #[tokio::test]
    async fn test_empty_batch_error() {
        let mut service = JsonRpcService::new(create_test_router());
        assert!(service.call_batch(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_jsonrpc_layer() {
        use tower::ServiceBuilder;

        let router = create_test_router().stateless();
        let mut service = ServiceBuilder::new()
            .layer(JsonRpcLayer::new())
            .service(router);

        let req = JsonRpcRequest::new(2, "tools/list").with_params(json!({}));
        let resp = Service::<JsonRpcRequest>::call(&mut service, req)
            .await
            .unwrap();

        match resp {
            JsonRpcResponse::Result(r) => {
                let tools = r.result.get("tools").unwrap().as_array().unwrap();
                assert_eq!(tools.len(), 1);
            }
            JsonRpcResponse::Error(e) => panic!("Expected result, got error: {:?}", e),
        }
    }
}
