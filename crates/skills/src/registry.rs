//! Tool registry implementation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use research_agent_core::{
    traits::{Tool, ToolRegistry},
    types::{ToolDefinition, ToolOutput},
    Error, Result,
};

/// Default tool registry using DashMap.
pub struct DefaultToolRegistry {
    /// Registered tools.
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl DefaultToolRegistry {
    /// Create a new tool registry.
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for DefaultToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for DefaultToolRegistry {
    async fn register(&self, tool: Box<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::invalid_request("Tool name must not be empty"));
        }

        match self.tools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Internal(format!(
                "Tool '{}' is already registered",
                name
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(tool = %name, "Registering tool");
                slot.insert(Arc::from(tool));
                Ok(())
            }
        }
    }

    async fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    async fn list(&self) -> Result<Vec<ToolDefinition>> {
        let mut definitions: Vec<_> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput> {
        // Clone the Arc so no map guard is held across the await.
        let tool = self
            .tools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::tool_not_found(name))?;

        tracing::debug!(tool = %name, "Executing tool");
        tool.execute(args).await
    }
}
