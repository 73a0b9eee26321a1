use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::ToolDefinition;

/// Top-level toolflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Tool plugins keyed by the id steps refer to in `plugin`.
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
    /// Static tool metadata. When empty, metadata is discovered from plugins.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step ceiling multiplier: a run may execute at most
    /// `step_limit_factor * steps.len()` steps.
    #[serde(default = "default_step_limit_factor")]
    pub step_limit_factor: usize,
    /// Per-call timeout applied to plugins that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_limit_factor: default_step_limit_factor(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_step_limit_factor() -> usize { 2 }
fn default_timeout_secs() -> u64 { 120 }

/// Configuration for a single tool plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub transport: PluginTransport,
    /// Per-call timeout in seconds. Falls back to `engine.default_timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PluginConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: PluginTransport::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
            timeout_secs: None,
        }
    }

    /// Reject configs that cannot possibly start a plugin.
    pub fn validate(&self, name: &str) -> Result<()> {
        match &self.transport {
            PluginTransport::Stdio { command, .. } if command.trim().is_empty() => Err(
                FlowError::Config(format!("Missing command in plugin config for {}", name)),
            ),
            PluginTransport::Stdio { .. } => Ok(()),
        }
    }
}

/// Plugin transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

/// Project-level plugin config in the `mcpServers` JSON format
/// (`mcp.config.json` / `.mcp.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpJsonConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpJsonServerEntry>,
}

/// A single entry in `mcpServers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpJsonServerEntry {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpJsonServerEntry {
    /// Convert to PluginConfig. Entries without a command are not usable.
    pub fn to_plugin_config(&self) -> Option<PluginConfig> {
        let command = self.command.as_ref()?;
        Some(PluginConfig {
            transport: PluginTransport::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            },
            timeout_secs: None,
        })
    }
}

impl McpJsonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(&expand_env_vars(&content))?)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.step_limit_factor == 0 {
            return Err(FlowError::Config(
                "engine.step_limit_factor must be at least 1".to_string(),
            ));
        }
        for (name, plugin) in &self.plugins {
            plugin.validate(name)?;
        }
        Ok(())
    }

    /// Add plugins from an `mcpServers` document. Plugins already present
    /// in this config win. Returns the names that were added.
    pub fn merge_mcp_json(&mut self, json: &McpJsonConfig) -> Vec<String> {
        let mut added = Vec::new();
        for (name, entry) in &json.mcp_servers {
            if self.plugins.contains_key(name) {
                continue;
            }
            if let Some(plugin) = entry.to_plugin_config() {
                self.plugins.insert(name.clone(), plugin);
                added.push(name.clone());
            }
        }
        added.sort();
        added
    }

    /// Effective per-call timeout for a plugin.
    pub fn timeout_for(&self, plugin: &str) -> u64 {
        self.plugins
            .get(plugin)
            .and_then(|p| p.timeout_secs)
            .unwrap_or(self.engine.default_timeout_secs)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
