//! MCP request tracing middleware.
//!
//! [`McpTracingLayer`] wraps the protocol engine and logs every request it
//! handles: method, request id, tool name and arguments for `tools/call`, the
//! duration, and the error code when the request fails.
//!
//! # Log Levels
//!
//! - configured level (default `INFO`): request start and completion
//! - `DEBUG`: tool call arguments
//! - `WARN`: error responses

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::Layer;
use tower_service::Service;
use tracing::{Instrument, Level, Span};

use crate::protocol::McpRequest;
use crate::router::{RouterRequest, RouterResponse};

/// Tower layer that adds structured tracing to MCP requests.
///
/// ```rust
/// use tower::ServiceBuilder;
/// use anycrawl_mcp::{McpRouter, McpTracingLayer, ToolCatalog};
///
/// let router = McpRouter::new(ToolCatalog::new());
/// let service = ServiceBuilder::new()
///     .layer(McpTracingLayer::new())
///     .service(router);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct McpTracingLayer {
    level: Level,
}

impl Default for McpTracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpTracingLayer {
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }

    /// Set the log level for request/response logging.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl<S> Layer<S> for McpTracingLayer {
    type Service = McpTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        McpTracingService {
            inner,
            level: self.level,
        }
    }
}

/// Tower service that adds tracing to MCP requests.
///
/// Created by [`McpTracingLayer`].
#[derive(Debug, Clone)]
pub struct McpTracingService<S> {
    inner: S,
    level: Level,
}

impl<S> Service<RouterRequest> for McpTracingService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = RouterResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<RouterResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let method = req.inner.method_name().to_string();
        let request_id = format!("{:?}", req.id);
        let tool = match &req.inner {
            McpRequest::CallTool(params) => {
                tracing::debug!(
                    tool = %params.name,
                    arguments = %params.arguments,
                    "Tool call arguments"
                );
                Some(params.name.clone())
            }
            _ => None,
        };

        let span = create_span(self.level, &method, &request_id, tool.as_deref());
        log_at(self.level, &method, None);

        let start = Instant::now();
        let fut = self.inner.call(req);
        let level = self.level;

        Box::pin(
            async move {
                let response = match fut.await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                match &response.inner {
                    Ok(_) => log_at(level, &method, Some(duration_ms)),
                    Err(err) => {
                        tracing::warn!(
                            method = %method,
                            error_code = err.code,
                            error_message = %err.message,
                            duration_ms,
                            "MCP request failed"
                        );
                    }
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}

fn create_span(level: Level, method: &str, request_id: &str, tool: Option<&str>) -> Span {
    match level {
        Level::TRACE => {
            tracing::trace_span!("mcp_request", method = %method, request_id = %request_id, tool)
        }
        Level::DEBUG => {
            tracing::debug_span!("mcp_request", method = %method, request_id = %request_id, tool)
        }
        Level::INFO => {
            tracing::info_span!("mcp_request", method = %method, request_id = %request_id, tool)
        }
        Level::WARN => {
            tracing::warn_span!("mcp_request", method = %method, request_id = %request_id, tool)
        }
        Level::ERROR => {
            tracing::error_span!("mcp_request", method = %method, request_id = %request_id, tool)
        }
    }
}

/// Log request start (no duration) or completion at the configured level.
fn log_at(level: Level, method: &str, duration_ms: Option<f64>) {
    let message = match duration_ms {
        Some(_) => "MCP request completed",
        None => "MCP request started",
    };
    match level {
        Level::TRACE => tracing::trace!(method = %method, duration_ms, "{}", message),
        Level::DEBUG => tracing::debug!(method = %method, duration_ms, "{}", message),
        Level::INFO => tracing::info!(method = %method, duration_ms, "{}", message),
        Level::WARN => tracing::warn!(method = %method, duration_ms, "{}", message),
        Level::ERROR => tracing::error!(method = %method, duration_ms, "{}", message),
    }
}
