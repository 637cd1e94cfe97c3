//! The seam between protocol-level tool calls and tool handlers.
//!
//! Looks the tool up, runs it, and classifies the outcome:
//!
//! - argument validation failures and remote-reported failures become
//!   `isError` results, so the session carries on;
//! - everything else (network failures, undecodable payloads, crawl
//!   failures and timeouts) is returned as `Err` for the engine to report as
//!   a tool execution failure.
//!
//! Every call is logged at start and at completion.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::api::ApiError;
use crate::catalog::ToolCatalog;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::protocol::CallToolResult;

#[derive(Debug, Clone)]
pub struct ToolInvoker {
    catalog: Arc<ToolCatalog>,
}

impl ToolInvoker {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalog.contains(name)
    }

    pub async fn invoke(
        &self,
        ctx: RequestContext,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult> {
        let Some(tool) = self.catalog.get(name) else {
            tracing::warn!(tool = %name, "Call to unknown tool");
            return Ok(CallToolResult::error(format!("Unknown tool: {}", name)));
        };

        tracing::info!(tool = %name, arguments = %arguments, "Tool call started");
        let start = Instant::now();
        let outcome = tool.call_with_context(ctx, arguments).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(result) => {
                tracing::info!(
                    tool = %name,
                    is_error = result.is_error,
                    duration_ms,
                    "Tool call completed"
                );
                Ok(result)
            }
            Err(Error::Validation(err)) => {
                tracing::info!(tool = %name, error = %err, duration_ms, "Tool arguments rejected");
                Ok(CallToolResult::error(err.to_string()))
            }
            Err(Error::Api(err @ ApiError::Remote { .. })) => {
                tracing::warn!(tool = %name, error = %err, duration_ms, "Remote API reported failure");
                Ok(CallToolResult::error(format!("{} failed: {}", name, err)))
            }
            Err(err) => {
                tracing::error!(tool = %name, error = %err, duration_ms, "Tool call failed");
                Err(err)
            }
        }
    }
}
