//! # anycrawl-mcp
//!
//! A Tower-native Model Context Protocol server for the
//! [AnyCrawl](https://anycrawl.dev) scraping, crawling and search API.
//!
//! The scraping itself happens remotely. This crate is the part in between:
//! a protocol engine ([`McpRouter`]) that decodes `initialize`, `tools/list`
//! and `tools/call`, six AnyCrawl tools, and the session layer that lets many
//! clients share one server process over several transports.
//!
//! ## Architecture
//!
//! ```text
//! transport (stdio | http | multi_tenant)
//!   -> tenant credential (multi-tenant only)
//!   -> SessionRegistry: (tenant, token) -> Session { McpRouter, event channel }
//!   -> JsonRpcService -> middleware (timeout, tracing) -> McpRouter
//!   -> ToolInvoker -> tool handler -> CrawlApi (AnyCrawl HTTP API)
//! ```
//!
//! Every engine is a plain Tower [`Service`](tower_service::Service), so
//! transports compose it with standard middleware such as
//! [`McpTracingLayer`] and `tower::timeout::TimeoutLayer`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use anycrawl_mcp::{BoxError, McpRouter, StdioTransport, tools};
//! use anycrawl_mcp::api::AnyCrawlClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let client = AnyCrawlClient::new(
//!         "https://api.anycrawl.dev",
//!         std::env::var("ANYCRAWL_API_KEY").ok(),
//!         Duration::from_secs(300),
//!     )?;
//!     let router = McpRouter::new(tools::catalog(Arc::new(client))?)
//!         .instructions(tools::INSTRUCTIONS);
//!
//!     StdioTransport::new(router).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Key Types
//!
//! ### Server
//! - [`McpRouter`] - The protocol engine
//! - [`ToolCatalog`] / [`ToolBuilder`] - Registered tools with typed, validated inputs
//! - [`SessionRegistry`](registry::SessionRegistry) - Session lifecycle and cleanup
//! - [`StdioTransport`], [`HttpTransport`], [`MultiTenantTransport`] - Bindings
//!
//! ### Remote API
//! - [`CrawlApi`](api::CrawlApi) - The six AnyCrawl operations
//! - [`AnyCrawlClient`](api::AnyCrawlClient) - reqwest implementation
//!
//! ### Testing
//! - [`testing::StubCrawlApi`] - Scripted stand-in for the remote API
//! - [`testing::TestClient`] - Drive a router without a transport

pub mod api;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod invoker;
pub mod jsonrpc;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod tenant;
pub mod testing;
pub mod tool;
pub mod tools;
pub mod tracing_layer;
pub mod transport;

// Re-exports
pub use catalog::ToolCatalog;
pub use context::{
    CancellationToken, NotificationReceiver, NotificationSender, RequestContext,
    ServerNotification, notification_channel,
};
pub use error::{BoxError, Error, ErrorCode, JsonRpcError, Result};
pub use invoker::ToolInvoker;
pub use jsonrpc::{JsonRpcLayer, JsonRpcService};
pub use protocol::{
    CallToolResult, Content, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponseMessage, McpNotification, McpRequest, McpResponse, RequestId,
    ToolDefinition,
};
pub use registry::{SessionRegistry, TransportKind};
pub use router::{McpRouter, RouterRequest, RouterResponse};
pub use session::{SessionPhase, SessionState};
pub use tool::{Tool, ToolBuilder, Validate};
pub use tracing_layer::{McpTracingLayer, McpTracingService};
pub use transport::{
    EngineFactory, HttpTransport, McpBoxService, MultiTenantTransport, ServiceFactory,
    StdioTransport,
};
pub use testing::TestClient;
