//! Fakes and fixtures shared by the toolflow test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use toolflow_core::error::{FlowError, Result};
use toolflow_core::traits::ToolGateway;
use toolflow_core::types::{ToolCallResult, ToolDefinition, ToolDescriptor, ToolParameter};
use toolflow_core::workflow::{
    ChoiceRule, ChoiceType, ComparisonOperator, WorkflowDefinition, WorkflowStep,
};

type Handler = Arc<dyn Fn(&Map<String, Value>) -> Result<ToolCallResult> + Send + Sync>;

struct FakeTool {
    descriptor: ToolDescriptor,
    handler: Handler,
}

/// A call seen by [`FakeGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub plugin: String,
    pub tool: String,
    pub arguments: Map<String, Value>,
}

/// In-process gateway answering from closures and recording every call.
#[derive(Default)]
pub struct FakeGateway {
    plugins: HashMap<String, Vec<FakeTool>>,
    failures: HashMap<String, String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `descriptor` on `plugin`, answered by `handler`.
    pub fn with_tool<F>(mut self, plugin: &str, descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<ToolCallResult> + Send + Sync + 'static,
    {
        self.plugins.entry(plugin.to_string()).or_default().push(FakeTool {
            descriptor,
            handler: Arc::new(handler),
        });
        self
    }

    /// Make every call to `tool` fail with `message`, on any plugin.
    pub fn failing(mut self, tool: &str, message: &str) -> Self {
        self.failures.insert(tool.to_string(), message.to_string());
        self
    }

    /// The `add_prefix` and `to_upper` plugins, one tool each.
    pub fn text_processing() -> Self {
        Self::new()
            .with_tool(
                "add_prefix",
                descriptor("add_prefix", &["text", "prefix"]),
                |args| {
                    let prefix = string_arg(args, "prefix")?;
                    let text = string_arg(args, "text")?;
                    Ok(ToolCallResult::text(format!("{prefix}{text}")))
                },
            )
            .with_tool("to_upper", descriptor("to_upper", &["text"]), |args| {
                Ok(ToolCallResult::text(string_arg(args, "text")?.to_uppercase()))
            })
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn dispatch(
        &self,
        plugin: &str,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolCallResult> {
        let tools = self
            .plugins
            .get(plugin)
            .ok_or_else(|| FlowError::PluginNotConfigured(plugin.to_string()))?;
        if let Some(message) = self.failures.get(tool) {
            return Err(FlowError::ToolCall {
                plugin: plugin.to_string(),
                tool: tool.to_string(),
                message: message.clone(),
            });
        }
        let fake = tools
            .iter()
            .find(|t| t.descriptor.name == tool)
            .ok_or_else(|| FlowError::ToolCall {
                plugin: plugin.to_string(),
                tool: tool.to_string(),
                message: format!("Unknown tool: {tool}"),
            })?;
        (fake.handler)(arguments)
    }
}

impl ToolGateway for FakeGateway {
    fn list_tools<'a>(&'a self, plugin: &'a str) -> BoxFuture<'a, Result<Vec<ToolDescriptor>>> {
        Box::pin(async move {
            let tools = self
                .plugins
                .get(plugin)
                .ok_or_else(|| FlowError::PluginNotConfigured(plugin.to_string()))?;
            Ok(tools.iter().map(|t| t.descriptor.clone()).collect())
        })
    }

    fn call_tool<'a>(
        &'a self,
        plugin: &'a str,
        tool: &'a str,
        arguments: Map<String, Value>,
    ) -> BoxFuture<'a, Result<ToolCallResult>> {
        Box::pin(async move {
            let result = self.dispatch(plugin, tool, &arguments);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(RecordedCall {
                    plugin: plugin.to_string(),
                    tool: tool.to_string(),
                    arguments,
                });
            }
            result
        })
    }
}

fn string_arg(args: &Map<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FlowError::ToolCall {
            plugin: "fake".into(),
            tool: "fake".into(),
            message: format!("Missing string argument: {name}"),
        })
}

/// A descriptor whose input schema declares `required` string properties.
pub fn descriptor(name: &str, required: &[&str]) -> ToolDescriptor {
    let properties: Map<String, Value> = required
        .iter()
        .map(|p| (p.to_string(), json!({"type": "string"})))
        .collect();
    ToolDescriptor {
        name: name.to_string(),
        description: format!("Fake {name} tool"),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Static metadata for the text-processing tool set.
pub fn text_processing_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new("add_prefix", "Adds a prefix to the text")
            .with_parameter(
                ToolParameter::new("text", "string")
                    .required()
                    .with_description("Text to process"),
            )
            .with_parameter(
                ToolParameter::new("prefix", "string")
                    .required()
                    .with_description("Prefix to add"),
            ),
        ToolDefinition::new("to_upper", "Converts the text to upper case").with_parameter(
            ToolParameter::new("text", "string")
                .required()
                .with_description("Text to convert"),
        ),
        ToolDefinition::new("select_text", "Selects one of two texts by a condition")
            .with_parameter(ToolParameter::new("condition", "boolean").required())
            .with_parameter(ToolParameter::new("trueValue", "string").required())
            .with_parameter(ToolParameter::new("falseValue", "string").required()),
    ]
}

/// Greeting pipeline: prefix, length check, optional emphasis, upper case.
///
/// Greetings longer than 15 characters skip the emphasis step.
pub fn text_processing_workflow() -> WorkflowDefinition {
    let length_rule = |operator, next: &str| {
        ChoiceRule::new(ChoiceType::StringLength, "$.greeting")
            .with_operator(operator)
            .with_value(15)
            .with_next(next)
    };

    WorkflowDefinition::new(
        "text-processing",
        "add-greeting",
        vec![
            WorkflowStep::task("add-greeting", "add_prefix", "add_prefix")
                .with_param("text", "$.input.text")
                .with_param("prefix", "$.input.prefix")
                .with_output("greeting")
                .with_next("check-length"),
            WorkflowStep::choice(
                "check-length",
                vec![
                    length_rule(ComparisonOperator::Gt, "to-upper"),
                    length_rule(ComparisonOperator::Lte, "add-emphasis"),
                ],
            )
            .with_output("isLongText"),
            WorkflowStep::task("add-emphasis", "add_prefix", "add_prefix")
                .with_param("text", "$.greeting")
                .with_param("prefix", "! ")
                .with_output("emphasized")
                .with_next("to-upper"),
            WorkflowStep::task("to-upper", "to_upper", "to_upper")
                .with_param("text", "$.isLongText ? $.greeting : $.emphasized")
                .with_output("final")
                .ending(),
        ],
    )
    .with_name("Text Processing")
}

/// An initial context of the shape `{"input": {"text": .., "prefix": ..}}`.
pub fn greeting_input(text: &str, prefix: &str) -> Value {
    json!({"input": {"text": text, "prefix": prefix}})
}
