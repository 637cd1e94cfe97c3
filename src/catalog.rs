//! Registered tools, keyed by name
//!
//! Populated once when an engine is built and read-only afterwards. Listing
//! preserves registration order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::ToolDefinition;
use crate::tool::Tool;

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    order: Vec<Arc<Tool>>,
    by_name: HashMap<String, Arc<Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name
    pub fn tool(mut self, tool: Tool) -> Self {
        let tool = Arc::new(tool);
        if self
            .by_name
            .insert(tool.name.clone(), tool.clone())
            .is_some()
        {
            tracing::warn!(tool = %tool.name, "Replacing already registered tool");
            self.order.retain(|t| t.name != tool.name);
        }
        self.order.push(tool);
        self
    }

    pub fn tools(self, tools: impl IntoIterator<Item = Tool>) -> Self {
        tools.into_iter().fold(self, |catalog, tool| catalog.tool(tool))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Definitions for `tools/list`
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
