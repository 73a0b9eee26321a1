use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use rmcp::model::{CallToolRequestParams, CallToolResult, Content, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::{RoleClient, ServiceExt};

use toolflow_core::config::{AppConfig, PluginConfig, PluginTransport};
use toolflow_core::error::{FlowError, Result};
use toolflow_core::traits::ToolGateway;
use toolflow_core::types::{ToolCallResult, ToolContent, ToolDescriptor};

use crate::handler::FlowClientHandler;

type McpConnection = RunningService<RoleClient, FlowClientHandler>;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Gateway to stdio MCP plugins.
///
/// Every operation spawns the plugin, runs one request and closes the
/// session again, so no state survives between calls.
pub struct McpGateway {
    plugins: HashMap<String, PluginConfig>,
    default_timeout_secs: u64,
}

impl McpGateway {
    pub fn new(plugins: HashMap<String, PluginConfig>) -> Self {
        Self {
            plugins,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            plugins: config.plugins.clone(),
            default_timeout_secs: config.engine.default_timeout_secs,
        }
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Configured plugin ids, sorted.
    pub fn plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    fn plugin(&self, plugin: &str) -> Result<&PluginConfig> {
        self.plugins
            .get(plugin)
            .ok_or_else(|| FlowError::PluginNotConfigured(plugin.to_string()))
    }

    fn timeout_secs(&self, config: &PluginConfig) -> u64 {
        config.timeout_secs.unwrap_or(self.default_timeout_secs)
    }

    async fn list_tools_inner(
        &self,
        plugin: &str,
        config: &PluginConfig,
    ) -> Result<Vec<ToolDescriptor>> {
        let mut client = connect(plugin, config).await?;
        let listed = client.list_all_tools().await;
        close(plugin, &mut client).await;

        let tools = listed.map_err(|e| FlowError::PluginConnect {
            plugin: plugin.to_string(),
            message: format!("Failed to list tools: {}", e),
        })?;
        debug!(plugin = %plugin, count = tools.len(), "Listed plugin tools");
        Ok(tools.iter().map(to_descriptor).collect())
    }

    async fn call_tool_inner(
        &self,
        plugin: &str,
        config: &PluginConfig,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult> {
        let mut client = connect(plugin, config).await?;
        let params = CallToolRequestParams {
            name: tool.to_string().into(),
            arguments: Some(arguments),
            meta: None,
            task: None,
        };
        let outcome = client.call_tool(params).await;
        close(plugin, &mut client).await;

        let result = outcome.map_err(|e| FlowError::ToolCall {
            plugin: plugin.to_string(),
            tool: tool.to_string(),
            message: e.to_string(),
        })?;
        check_result(plugin, tool, &result)
    }
}

impl ToolGateway for McpGateway {
    fn list_tools<'a>(&'a self, plugin: &'a str) -> BoxFuture<'a, Result<Vec<ToolDescriptor>>> {
        Box::pin(async move {
            let config = self.plugin(plugin)?;
            let secs = self.timeout_secs(config);
            tokio::time::timeout(
                Duration::from_secs(secs),
                self.list_tools_inner(plugin, config),
            )
            .await
            .map_err(|_| FlowError::ToolTimeout {
                plugin: plugin.to_string(),
                tool: "tools/list".to_string(),
                timeout_secs: secs,
            })?
        })
    }

    fn call_tool<'a>(
        &'a self,
        plugin: &'a str,
        tool: &'a str,
        arguments: Map<String, Value>,
    ) -> BoxFuture<'a, Result<ToolCallResult>> {
        Box::pin(async move {
            let config = self.plugin(plugin)?;
            let secs = self.timeout_secs(config);
            tokio::time::timeout(
                Duration::from_secs(secs),
                self.call_tool_inner(plugin, config, tool, arguments),
            )
            .await
            .map_err(|_| FlowError::ToolTimeout {
                plugin: plugin.to_string(),
                tool: tool.to_string(),
                timeout_secs: secs,
            })?
        })
    }
}

/// Spawn the plugin process and complete the MCP handshake.
async fn connect(plugin: &str, config: &PluginConfig) -> Result<McpConnection> {
    let handler = FlowClientHandler::new(plugin);
    let connect_error = |message: String| FlowError::PluginConnect {
        plugin: plugin.to_string(),
        message,
    };

    let client = match &config.transport {
        PluginTransport::Stdio { command, args, env } => {
            let mut cmd = tokio::process::Command::new(command);
            cmd.args(args);
            for (k, v) in env {
                cmd.env(k, v);
            }

            let transport = rmcp::transport::TokioChildProcess::new(cmd)
                .map_err(|e| connect_error(format!("Failed to spawn {}: {}", command, e)))?;

            handler
                .serve(transport)
                .await
                .map_err(|e| connect_error(format!("Failed to initialize MCP client: {}", e)))?
        }
    };

    info!(plugin = %plugin, "Plugin connected");
    Ok(client)
}

async fn close(plugin: &str, client: &mut McpConnection) {
    if let Err(e) = client.close().await {
        warn!(plugin = %plugin, error = %e, "Failed to close plugin session");
    }
}

fn to_descriptor(tool: &McpTool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name.to_string(),
        description: tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        input_schema: serde_json::to_value(&*tool.input_schema)
            .unwrap_or(serde_json::json!({"type": "object"})),
    }
}

fn to_content(content: &Content) -> ToolContent {
    match content.raw {
        rmcp::model::RawContent::Text(ref t) => ToolContent::text(t.text.clone()),
        ref other => ToolContent {
            kind: serde_json::to_value(other)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string()),
            text: None,
        },
    }
}

/// Convert a server result, turning `isError` results into `ToolCall` failures.
fn check_result(plugin: &str, tool: &str, result: &CallToolResult) -> Result<ToolCallResult> {
    let result = to_call_result(result);
    if result.is_error {
        let message: Vec<&str> = result
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect();
        return Err(FlowError::ToolCall {
            plugin: plugin.to_string(),
            tool: tool.to_string(),
            message: message.join("\n"),
        });
    }
    Ok(result)
}

fn to_call_result(result: &CallToolResult) -> ToolCallResult {
    ToolCallResult {
        content: result.content.iter().map(to_content).collect(),
        is_error: result.is_error.unwrap_or(false),
    }
}
