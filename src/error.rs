//! Error types for anycrawl-mcp

use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// Boxed error used by binaries and top-level entry points.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Standard JSON-RPC error codes plus the MCP session code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
    /// Invalid or missing session id
    InvalidSession = -32001,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    /// `tools/call` named a tool that is not in the catalog
    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Unknown tool: {}", name))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// A tool raised an error that was not a protocol error
    pub fn tool_execution_failed(message: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InternalError,
            format!("Tool execution failed: {}", message),
        )
    }

    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSession, message)
    }
}

/// Field-level detail for rejected tool arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Rejected tool arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub tool: String,
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(tool: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self {
            tool: tool.into(),
            fields,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let details: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
        write!(
            f,
            "Invalid arguments for {}: {}",
            self.tool,
            details.join("; ")
        )
    }
}

impl std::error::Error for ValidationError {}

/// anycrawl-mcp error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JSON-RPC error: {}", .0.message)]
    JsonRpc(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Crawl job {job_id} failed: {reason}")]
    CrawlFailed { job_id: String, reason: String },

    #[error("Crawl job {job_id} timed out after {timeout_ms}ms")]
    CrawlTimeout { job_id: String, timeout_ms: u64 },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a tool error
    pub fn tool(message: impl Into<String>) -> Self {
        Error::Tool(message.into())
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

/// Result type alias for anycrawl-mcp
pub type Result<T> = std::result::Result<T, Error>;
