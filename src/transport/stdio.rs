//! Stdio transport for MCP
//!
//! Reads newline-delimited JSON-RPC messages from stdin and writes responses
//! and pushed notifications to stdout. One process serves one client, so the
//! transport owns exactly one engine and never touches a session registry.
//!
//! Requests are handled one at a time in arrival order. While a request is in
//! flight the transport keeps reading: `notifications/cancelled` is applied
//! immediately, everything else is queued behind the running request.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::context::{NotificationReceiver, notification_channel};
use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{JsonRpcResponse, notifications};
use crate::router::McpRouter;

use super::service::{ServiceFactory, identity_factory};
use super::{apply_notification, dispatch};

/// Stdio transport for MCP servers
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use anycrawl_mcp::{McpRouter, StdioTransport, tools};
/// use anycrawl_mcp::api::AnyCrawlClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let client = AnyCrawlClient::new(
///         "https://api.anycrawl.dev",
///         Some("ac-key".into()),
///         std::time::Duration::from_secs(60),
///     )?;
///     let router = McpRouter::new(tools::catalog(Arc::new(client))?);
///     StdioTransport::new(router).run().await?;
///     Ok(())
/// }
/// ```
pub struct StdioTransport {
    router: McpRouter,
    services: ServiceFactory,
    notifications: NotificationReceiver,
}

impl StdioTransport {
    pub fn new(router: McpRouter) -> Self {
        let (tx, rx) = notification_channel(256);
        Self {
            router: router.with_notification_sender(tx),
            services: identity_factory(),
            notifications: rx,
        }
    }

    /// Wrap the engine with a middleware stack
    pub fn services(mut self, services: ServiceFactory) -> Self {
        self.services = services;
        self
    }

    /// Serve stdin/stdout until stdin closes
    pub async fn run(self) -> Result<()> {
        tracing::info!("Stdio transport started, waiting for input");
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve an arbitrary reader/writer pair until the reader reaches EOF
    pub async fn run_with<R, W>(mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut queued: VecDeque<String> = VecDeque::new();
        let mut eof = false;

        loop {
            let line = match queued.pop_front() {
                Some(line) => line,
                None if eof => break,
                None => match lines.next_line().await.map_err(read_error)? {
                    Some(line) => line,
                    None => break,
                },
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::debug!(input = %trimmed, "Received message");

            let payload: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    let error = JsonRpcResponse::error(
                        None,
                        JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
                    );
                    write_frame(&mut writer, &error).await?;
                    continue;
                }
            };

            let response = {
                let processing = dispatch(&self.router, &self.services, payload);
                tokio::pin!(processing);
                loop {
                    tokio::select! {
                        biased;
                        response = &mut processing => break response,
                        Some(notification) = self.notifications.recv() => {
                            write_frame(&mut writer, &notification.into_jsonrpc()).await?;
                        }
                        next = lines.next_line(), if !eof => match next.map_err(read_error)? {
                            Some(next) if is_cancellation(&next) => {
                                if let Ok(value) = serde_json::from_str(&next) {
                                    apply_notification(&self.router, value);
                                }
                            }
                            Some(next) => queued.push_back(next),
                            None => eof = true,
                        },
                    }
                }
            };

            // Notifications raised by the request go out before its response
            while let Ok(notification) = self.notifications.try_recv() {
                write_frame(&mut writer, &notification.into_jsonrpc()).await?;
            }
            if let Some(response) = response {
                write_frame(&mut writer, &response).await?;
            }
        }

        tracing::info!("Stdin closed, shutting down");
        Ok(())
    }
}

fn is_cancellation(line: &str) -> bool {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| {
            v.get("method")
                .and_then(Value::as_str)
                .map(|m| m == notifications::CANCELLED)
        })
        .unwrap_or(false)
}

fn read_error(e: std::io::Error) -> Error {
    Error::Transport(format!("Failed to read from stdin: {}", e))
}

async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(frame)?;
    tracing::debug!(output = %json, "Sending message");
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("Failed to write to stdout: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush stdout: {}", e)))
}
