use std::collections::HashMap;

use tracing::{debug, info, warn};

use toolflow_core::error::Result;
use toolflow_core::traits::ToolGateway;
use toolflow_core::types::ToolDefinition;

/// Read-only lookup from tool name to its declared parameters.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static metadata table.
    pub fn from_definitions(definitions: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition);
        }
        registry
    }

    /// Build a registry by asking each plugin for its tools.
    ///
    /// Fails on the first plugin that cannot be listed.
    pub async fn discover(gateway: &dyn ToolGateway, plugins: &[String]) -> Result<Self> {
        let mut registry = Self::new();
        for plugin in plugins {
            debug!(plugin = %plugin, "Registering plugin tools");
            let tools = gateway.list_tools(plugin).await?;
            for descriptor in &tools {
                registry.register(ToolDefinition::from(descriptor));
            }
            info!(plugin = %plugin, count = tools.len(), "Registered plugin tools");
        }
        Ok(registry)
    }

    /// Register a tool definition, replacing any previous one with that name.
    pub fn register(&mut self, definition: ToolDefinition) {
        if self.tools.contains_key(&definition.name) {
            warn!(tool = %definition.name, "Tool definition replaced");
        }
        self.tools.insert(definition.name.clone(), definition);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
