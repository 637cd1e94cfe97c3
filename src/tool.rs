//! Tool definition and builder API
//!
//! A [`Tool`] pairs its advertised definition (name, description, JSON Schema
//! generated from the input type) with a handler. Typed handlers deserialize
//! and [`Validate`] their input before running, so a handler only ever sees
//! arguments that passed every type and range check.
//!
//! ```rust
//! use anycrawl_mcp::tool::{ToolBuilder, Validate};
//! use anycrawl_mcp::error::FieldError;
//! use anycrawl_mcp::CallToolResult;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct GreetInput {
//!     name: String,
//! }
//!
//! impl Validate for GreetInput {
//!     fn validate(&self, errors: &mut Vec<FieldError>) {
//!         if self.name.is_empty() {
//!             errors.push(FieldError::new("name", "must not be empty"));
//!         }
//!     }
//! }
//!
//! let tool = ToolBuilder::new("greet")
//!     .description("Greet someone by name")
//!     .handler(|input: GreetInput| async move {
//!         Ok(CallToolResult::text(format!("Hello, {}!", input.name)))
//!     })
//!     .build()
//!     .expect("valid tool name");
//!
//! assert_eq!(tool.name, "greet");
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{Error, FieldError, Result, ValidationError};
use crate::protocol::{CallToolResult, RequestId, ToolAnnotations, ToolDefinition};

/// Range and format checks run after deserialization.
pub trait Validate {
    /// Push one [`FieldError`] per problem found
    fn validate(&self, errors: &mut Vec<FieldError>);
}

/// Tool names are 1-128 characters; alphanumeric, underscore, hyphen and dot only.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::tool("Tool name cannot be empty"));
    }
    if name.len() > 128 {
        return Err(Error::tool(format!(
            "Tool name '{}' exceeds maximum length of 128 characters (got {})",
            name,
            name.len()
        )));
    }
    if let Some(invalid_char) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-' && *c != '.')
    {
        return Err(Error::tool(format!(
            "Tool name '{}' contains invalid character '{}'",
            name, invalid_char
        )));
    }
    Ok(())
}

/// A boxed future for tool handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tool handler trait - the core abstraction for tool execution
pub trait ToolHandler: Send + Sync {
    fn call(&self, ctx: RequestContext, args: Value) -> BoxFuture<'_, Result<CallToolResult>>;

    /// The tool's input schema
    fn input_schema(&self) -> Value;
}

/// A registered tool
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub annotations: Option<ToolAnnotations>,
    handler: Arc<dyn ToolHandler>,
    input_schema: Value,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Get the tool definition for tools/list
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Call the tool without a client connection
    pub fn call(&self, args: Value) -> BoxFuture<'static, Result<CallToolResult>> {
        self.call_with_context(RequestContext::new(RequestId::Number(0)), args)
    }

    /// Call the tool.
    ///
    /// Unlike a protocol response, errors are returned as `Err`; the caller
    /// decides which of them become `isError` results.
    pub fn call_with_context(
        &self,
        ctx: RequestContext,
        args: Value,
    ) -> BoxFuture<'static, Result<CallToolResult>> {
        let handler = self.handler.clone();
        Box::pin(async move { handler.call(ctx, args).await })
    }
}

/// Builder for creating tools with a fluent API
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    annotations: Option<ToolAnnotations>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            annotations: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Mark the tool as read-only (does not modify state)
    pub fn read_only(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .read_only_hint = true;
        self
    }

    /// Mark the tool as idempotent (same args = same effect)
    pub fn idempotent(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .idempotent_hint = true;
        self
    }

    /// Mark the tool as non-destructive
    pub fn non_destructive(mut self) -> Self {
        self.annotations
            .get_or_insert_with(ToolAnnotations::default)
            .destructive_hint = false;
        self
    }

    /// Handler taking only the validated input
    pub fn handler<I, F, Fut>(self, handler: F) -> ToolBuilderWithHandler<I, TypedHandler<I, F>>
    where
        I: JsonSchema + DeserializeOwned + Validate + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        ToolBuilderWithHandler {
            handler: TypedHandler {
                tool: self.name.clone(),
                handler,
                _phantom: PhantomData,
            },
            builder: self,
            _phantom: PhantomData,
        }
    }

    /// Handler receiving the request context as well as the validated input
    pub fn handler_with_context<I, F, Fut>(
        self,
        handler: F,
    ) -> ToolBuilderWithHandler<I, ContextAwareHandler<I, F>>
    where
        I: JsonSchema + DeserializeOwned + Validate + Send + Sync + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        ToolBuilderWithHandler {
            handler: ContextAwareHandler {
                tool: self.name.clone(),
                handler,
                _phantom: PhantomData,
            },
            builder: self,
            _phantom: PhantomData,
        }
    }
}

/// Builder state once a handler is set
pub struct ToolBuilderWithHandler<I, H> {
    builder: ToolBuilder,
    handler: H,
    _phantom: PhantomData<fn() -> I>,
}

impl<I, H> ToolBuilderWithHandler<I, H>
where
    H: ToolHandler + 'static,
{
    /// Build the tool
    ///
    /// Returns an error if the tool name is invalid.
    pub fn build(self) -> Result<Tool> {
        validate_tool_name(&self.builder.name)?;
        let input_schema = self.handler.input_schema();
        Ok(Tool {
            name: self.builder.name,
            description: self.builder.description,
            annotations: self.builder.annotations,
            handler: Arc::new(self.handler),
            input_schema,
        })
    }
}

/// Deserialize and validate raw arguments for `tool`.
pub fn parse_input<I>(tool: &str, args: Value) -> Result<I>
where
    I: DeserializeOwned + Validate,
{
    // Omitted arguments arrive as null
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    let input: I = serde_json::from_value(args)
        .map_err(|e| ValidationError::new(tool, vec![FieldError::new("", e.to_string())]))?;

    let mut errors = Vec::new();
    input.validate(&mut errors);
    if errors.is_empty() {
        Ok(input)
    } else {
        Err(ValidationError::new(tool, errors).into())
    }
}

fn schema_for<I: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(I);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// Handler over a typed, validated input
pub struct TypedHandler<I, F> {
    tool: String,
    handler: F,
    _phantom: PhantomData<fn() -> I>,
}

impl<I, F, Fut> ToolHandler for TypedHandler<I, F>
where
    I: JsonSchema + DeserializeOwned + Validate + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call(&self, _ctx: RequestContext, args: Value) -> BoxFuture<'_, Result<CallToolResult>> {
        Box::pin(async move {
            let input: I = parse_input(&self.tool, args)?;
            (self.handler)(input).await
        })
    }

    fn input_schema(&self) -> Value {
        schema_for::<I>()
    }
}

/// Handler that receives request context for progress/cancellation
pub struct ContextAwareHandler<I, F> {
    tool: String,
    handler: F,
    _phantom: PhantomData<fn() -> I>,
}

impl<I, F, Fut> ToolHandler for ContextAwareHandler<I, F>
where
    I: JsonSchema + DeserializeOwned + Validate + Send + Sync + 'static,
    F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, args: Value) -> BoxFuture<'_, Result<CallToolResult>> {
        Box::pin(async move {
            let input: I = parse_input(&self.tool, args)?;
            (self.handler)(ctx, input).await
        })
    }

    fn input_schema(&self) -> Value {
        schema_for::<I>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    impl Validate for AddInput {
        fn validate(&self, errors: &mut Vec<FieldError>) {
            if self.a < 0 {
                errors.push(FieldError::new("a", "must be >= 0"));
            }
        }
    }

    fn add_tool() -> Tool {
        ToolBuilder::new("add")
            .description("Add two numbers")
            .read_only()
            .handler(|input: AddInput| async move {
                Ok(CallToolResult::text(format!("{}", input.a + input.b)))
            })
            .build()
            .expect("valid tool name")
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let result = add_tool().call(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result.all_text(), "5");
    }

    #[tokio::test]
    async fn test_deserialize_failure_is_validation_error() {
        let err = add_tool().call(json!({"a": 2})).await.unwrap_err();
        match err {
            Error::Validation(v) => assert!(v.to_string().contains("missing field `b`")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_range_failure_is_validation_error() {
        let err = add_tool()
            .call(json!({"a": -1, "b": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.fields[0].field == "a"));
    }

    #[tokio::test]
    async fn test_context_handler_sees_request_id() {
        let tool = ToolBuilder::new("whoami")
            .handler_with_context(|ctx: RequestContext, _input: AddInput| async move {
                Ok(CallToolResult::text(format!("{:?}", ctx.request_id())))
            })
            .build()
            .unwrap();
        let ctx = RequestContext::new(RequestId::Number(42));
        let result = tool
            .call_with_context(ctx, json!({"a": 1, "b": 1}))
            .await
            .unwrap();
        assert_eq!(result.all_text(), "Number(42)");
    }

    #[test]
    fn test_definition_carries_schema_and_hints() {
        let def = add_tool().definition();
        assert_eq!(def.name, "add");
        assert_eq!(def.input_schema["type"], "object");
        assert!(def.input_schema["properties"]["a"].is_object());
        assert!(def.annotations.unwrap().read_only_hint);
    }

    #[test]
    fn test_invalid_tool_names() {
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("has space").is_err());
        assert!(validate_tool_name(&"x".repeat(129)).is_err());
        assert!(validate_tool_name("anycrawl_scrape").is_ok());
    }
}
