use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use toolflow_core::error::Result;
use toolflow_core::traits::ToolGateway;
use toolflow_core::workflow::{ChoiceStep, StepKind, TaskStep, WorkflowStep};

use crate::choice;
use crate::context::WorkflowContext;
use crate::mapper;
use crate::path;
use crate::registry::ToolRegistry;

/// Runs one step at a time against a context.
///
/// Holds no state of its own besides the gateway and the tool metadata;
/// the context passed in is the only thing a step mutates.
pub struct StepExecutor {
    gateway: Arc<dyn ToolGateway>,
    registry: Arc<ToolRegistry>,
}

impl StepExecutor {
    pub fn new(gateway: Arc<dyn ToolGateway>, registry: Arc<ToolRegistry>) -> Self {
        Self { gateway, registry }
    }

    /// Execute a single step.
    ///
    /// - task: bind inputs, call the gateway, store the result text.
    /// - choice: evaluate the first rule and store its flag in `output`.
    /// - parallel / map: pass through.
    pub async fn execute_step(
        &self,
        step: &WorkflowStep,
        context: &mut WorkflowContext,
    ) -> Result<()> {
        debug!(step = %step.id, kind = step.kind.name(), "Starting step execution");
        debug!(step = %step.id, context = %serde_json::Value::Object(context.data().clone()), "Context");

        match &step.kind {
            StepKind::Task(task) => self.execute_task(&step.id, task, context).await?,
            StepKind::Choice(choice) => store_first_rule(&step.id, choice, context)?,
            StepKind::Parallel | StepKind::Map => {
                warn!(
                    step = %step.id,
                    kind = step.kind.name(),
                    "Step kind has no behavior, passing through"
                );
            }
        }

        debug!(step = %step.id, "Step execution completed");
        Ok(())
    }

    async fn execute_task(
        &self,
        step_id: &str,
        task: &TaskStep,
        context: &mut WorkflowContext,
    ) -> Result<()> {
        let input = mapper::prepare_input(step_id, task, &self.registry, context)?;
        debug!(step = %step_id, input = %serde_json::Value::Object(input.clone()), "Input");

        info!(step = %step_id, plugin = %task.plugin, tool = %task.tool, "Calling tool");
        let result = self.gateway.call_tool(&task.plugin, &task.tool, input).await?;
        debug!(step = %step_id, content = result.content.len(), "Output: {:?}", result.content);

        mapper::process_output(task, &result, context)
    }
}

/// Evaluate only the first rule and, if an output key is declared, store its
/// boolean result there.
fn store_first_rule(
    step_id: &str,
    choice: &ChoiceStep,
    context: &mut WorkflowContext,
) -> Result<()> {
    let Some(rule) = choice.choices.first() else {
        warn!(step = %step_id, "No choices defined");
        return Ok(());
    };

    let field_value = path::resolve(&rule.field, context)?;
    let flag = choice::evaluate(rule, &field_value);
    debug!(step = %step_id, rule = %rule.choice_type, flag, "Evaluated first choice rule");

    if let Some(output) = &choice.output {
        context.set(output.clone(), Value::Bool(flag));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolflow_core::error::{ErrorKind, FlowError};
    use toolflow_core::types::{ToolCallResult, ToolContent};
    use toolflow_core::workflow::{ChoiceRule, ChoiceType, ComparisonOperator};
    use toolflow_test_utils::FakeGateway;

    fn executor(gateway: Arc<FakeGateway>) -> StepExecutor {
        let registry = ToolRegistry::from_definitions(toolflow_test_utils::text_processing_tools());
        StepExecutor::new(gateway, Arc::new(registry))
    }

    fn context() -> WorkflowContext {
        WorkflowContext::from_value(json!({"input": {"text": "world", "prefix": "Hello, "}}))
            .unwrap()
    }

    fn length_rule(op: ComparisonOperator, next: &str) -> ChoiceRule {
        ChoiceRule::new(ChoiceType::StringLength, "$.greeting")
            .with_operator(op)
            .with_value(15)
            .with_next(next)
    }

    #[tokio::test]
    async fn test_task_step_calls_gateway_and_stores_output() {
        let gateway = Arc::new(FakeGateway::text_processing());
        let exec = executor(gateway.clone());
        let step = WorkflowStep::task("add-greeting", "add_prefix", "add_prefix")
            .with_param("text", "$.input.text")
            .with_param("prefix", "$.input.prefix")
            .with_output("greeting");

        let mut ctx = context();
        exec.execute_step(&step, &mut ctx).await.unwrap();

        assert_eq!(ctx.get_str("greeting"), Some("Hello, world"));
        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].plugin, "add_prefix");
        assert_eq!(calls[0].tool, "add_prefix");
        assert_eq!(calls[0].arguments.get("text"), Some(&json!("world")));
    }

    #[tokio::test]
    async fn test_binding_failure_skips_gateway() {
        let gateway = Arc::new(FakeGateway::text_processing());
        let exec = executor(gateway.clone());
        let step = WorkflowStep::task("add-greeting", "add_prefix", "add_prefix")
            .with_param("text", "$.input.text")
            .with_param("prefix", "$.input.missing")
            .with_output("greeting");

        let err = exec.execute_step(&step, &mut context()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let gateway = Arc::new(FakeGateway::text_processing());
        let exec = executor(gateway.clone());
        let step = WorkflowStep::task("s", "invalid_plugin", "add_prefix")
            .with_param("text", "$.input.text")
            .with_param("prefix", "$.input.prefix");

        let err = exec.execute_step(&step, &mut context()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
    }

    #[tokio::test]
    async fn test_textless_result_fails() {
        let gateway = Arc::new(FakeGateway::new().with_tool(
            "images",
            toolflow_test_utils::descriptor("to_upper", &["text"]),
            |_| {
                Ok(ToolCallResult {
                    content: vec![ToolContent {
                        kind: "image".into(),
                        text: None,
                    }],
                    is_error: false,
                })
            },
        ));
        let exec = executor(gateway);
        let step = WorkflowStep::task("s", "images", "to_upper")
            .with_param("text", "$.input.text")
            .with_output("final");

        let err = exec.execute_step(&step, &mut context()).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingTextContent(_)));
    }

    #[tokio::test]
    async fn test_choice_stores_first_rule_only() {
        let exec = executor(Arc::new(FakeGateway::text_processing()));
        // First rule is false, second would be true: only the first counts.
        let step = WorkflowStep::choice(
            "check-length",
            vec![
                length_rule(ComparisonOperator::Gt, "to-upper"),
                length_rule(ComparisonOperator::Lte, "add-emphasis"),
            ],
        )
        .with_output("isLongText");

        let mut ctx = context();
        ctx.set_str("greeting", "Hello, world");
        exec.execute_step(&step, &mut ctx).await.unwrap();
        assert_eq!(ctx.get("isLongText"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_choice_without_output_leaves_context() {
        let exec = executor(Arc::new(FakeGateway::text_processing()));
        let step = WorkflowStep::choice("c", vec![length_rule(ComparisonOperator::Gt, "x")]);

        let mut ctx = context();
        let before = ctx.clone();
        exec.execute_step(&step, &mut ctx).await.unwrap();
        assert_eq!(ctx, before);
    }

    #[tokio::test]
    async fn test_choice_with_empty_field_fails() {
        let exec = executor(Arc::new(FakeGateway::text_processing()));
        let rule = ChoiceRule::new(ChoiceType::ValueExists, "");
        let step = WorkflowStep::choice("c", vec![rule]).with_output("flag");

        let err = exec.execute_step(&step, &mut context()).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_reserved_kinds_pass_through() {
        let gateway = Arc::new(FakeGateway::text_processing());
        let exec = executor(gateway.clone());
        let step: WorkflowStep =
            serde_json::from_value(json!({"id": "fan", "type": "parallel"})).unwrap();

        let mut ctx = context();
        exec.execute_step(&step, &mut ctx).await.unwrap();
        assert_eq!(ctx, context());
        assert_eq!(gateway.call_count(), 0);
    }
}
