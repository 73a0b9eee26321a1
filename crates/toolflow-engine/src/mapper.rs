use serde_json::{Map, Value};
use tracing::debug;

use toolflow_core::error::{FlowError, Result};
use toolflow_core::types::ToolCallResult;
use toolflow_core::workflow::TaskStep;

use crate::context::WorkflowContext;
use crate::path;
use crate::registry::ToolRegistry;

/// Build the tool call payload for a task step.
///
/// String bindings go through the path resolver; other JSON values are
/// literals. A `null` result falls back to the parameter's declared default.
/// Required parameters with neither a value nor a default fail the step.
pub fn prepare_input(
    step_id: &str,
    task: &TaskStep,
    registry: &ToolRegistry,
    context: &WorkflowContext,
) -> Result<Map<String, Value>> {
    let tool = registry
        .get(&task.tool)
        .ok_or_else(|| FlowError::ToolNotRegistered(task.tool.clone()))?;

    let mut payload = Map::new();
    for (name, binding) in &task.parameters {
        let param = tool
            .parameter(name)
            .ok_or_else(|| FlowError::UnknownParameter {
                tool: task.tool.clone(),
                parameter: name.clone(),
            })?;

        let value = match binding {
            Value::String(expr) => path::resolve(expr, context)?,
            literal => literal.clone(),
        };

        if !value.is_null() {
            payload.insert(name.clone(), value);
            continue;
        }

        match &param.default {
            Some(default) => {
                debug!(step = %step_id, parameter = %name, "Using declared default");
                payload.insert(name.clone(), default.clone());
            }
            None if param.required => {
                return Err(FlowError::MissingRequiredParameter {
                    step: step_id.to_string(),
                    tool: task.tool.clone(),
                    parameter: name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(payload)
}

/// Copy the primary text of a tool result into `context[output]`.
///
/// No-op when the step declares no output key.
pub fn process_output(
    task: &TaskStep,
    result: &ToolCallResult,
    context: &mut WorkflowContext,
) -> Result<()> {
    let Some(output) = &task.output else {
        return Ok(());
    };

    let first = result
        .content
        .first()
        .ok_or_else(|| FlowError::EmptyToolResult(task.tool.clone()))?;
    let text = first
        .text
        .as_ref()
        .ok_or_else(|| FlowError::MissingTextContent(task.tool.clone()))?;

    context.set_str(output.clone(), text.clone());
    Ok(())
}
