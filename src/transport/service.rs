//! Service types for transport-level middleware
//!
//! A transport never calls the [`McpRouter`] directly. It asks a
//! [`ServiceFactory`] for a boxed, middleware-wrapped service around the
//! session's router and frames requests through
//! [`JsonRpcService`](crate::jsonrpc::JsonRpcService).
//!
//! [`CatchError`] converts middleware errors (such as timeouts) into
//! [`RouterResponse`] errors, preserving the `Error = Infallible` contract
//! that `JsonRpcService` requires.
//!
//! [`EngineFactory`] builds one router per session. Each call yields an engine
//! with its own lifecycle phase and its own remote API client, so no two
//! sessions share either.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower_service::Service;

use crate::error::{self, JsonRpcError};
use crate::router::{McpRouter, RouterRequest, RouterResponse};
use crate::tracing_layer::McpTracingLayer;

/// A boxed, cloneable MCP service with `Error = Infallible`.
pub type McpBoxService = BoxCloneService<RouterRequest, RouterResponse, Infallible>;

/// Wraps a session's router with the transport's middleware stack.
pub type ServiceFactory = Arc<dyn Fn(McpRouter) -> McpBoxService + Send + Sync>;

/// Builds a fresh engine for a tenant credential.
pub type EngineFactory = Arc<dyn Fn(&str) -> error::Result<McpRouter> + Send + Sync>;

/// A [`ServiceFactory`] that returns the router unchanged.
pub fn identity_factory() -> ServiceFactory {
    Arc::new(|router: McpRouter| BoxCloneService::new(router))
}

/// The production middleware stack: request tracing and a per-request
/// timeout, with timeouts reported as JSON-RPC internal errors.
pub fn default_factory(request_timeout: Duration) -> ServiceFactory {
    Arc::new(move |router: McpRouter| {
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(request_timeout))
            .layer(McpTracingLayer::new())
            .service(router);
        BoxCloneService::new(CatchError::new(service))
    })
}

/// Converts middleware errors into JSON-RPC internal error responses carrying
/// the original request id.
pub struct CatchError<S> {
    inner: S,
}

impl<S> CatchError<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Clone> Clone for CatchError<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for CatchError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatchError")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<S> Service<RouterRequest> for CatchError<S>
where
    S: Service<RouterRequest, Response = RouterResponse> + Clone + Send + 'static,
    S::Error: fmt::Display + Send,
    S::Future: Send,
{
    type Response = RouterResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<RouterResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.inner.poll_ready(cx) {
            Poll::Pending => Poll::Pending,
            // Readiness errors surface again from `call`
            Poll::Ready(_) => Poll::Ready(Ok(())),
        }
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let request_id = req.id.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            match fut.await {
                Ok(response) => Ok(response),
                Err(err) => {
                    tracing::warn!(request_id = ?request_id, error = %err, "Request aborted by middleware");
                    Ok(RouterResponse {
                        id: request_id,
                        inner: Err(JsonRpcError::internal_error(err.to_string())),
                    })
                }
            }
        })
    }
}
