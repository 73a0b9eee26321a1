use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use toolflow_core::error::{FlowError, Result};
use toolflow_core::traits::ToolGateway;
use toolflow_core::workflow::{ChoiceMode, ChoiceStep, StepKind, WorkflowDefinition, WorkflowStep};

use crate::choice;
use crate::context::WorkflowContext;
use crate::executor::StepExecutor;
use crate::path;
use crate::registry::ToolRegistry;

/// Default ceiling multiplier: every step may be revisited once.
pub const DEFAULT_STEP_LIMIT_FACTOR: usize = 2;

/// One executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step_id: String,
    pub kind: &'static str,
    pub elapsed_ms: u64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The final context with everything the steps wrote.
    pub context: WorkflowContext,
    /// Executed steps in order.
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    /// Ids of the executed steps, in order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_id.as_str()).collect()
    }
}

/// Walks a workflow definition from `startAt` until a terminal step.
///
/// Steps run strictly one after another. The only bound is the step
/// ceiling (`step_limit_factor * steps.len()`); timeouts belong to the
/// gateway.
pub struct WorkflowEngine {
    executor: StepExecutor,
    step_limit_factor: usize,
}

impl WorkflowEngine {
    pub fn new(gateway: Arc<dyn ToolGateway>, registry: ToolRegistry) -> Self {
        Self {
            executor: StepExecutor::new(gateway, Arc::new(registry)),
            step_limit_factor: DEFAULT_STEP_LIMIT_FACTOR,
        }
    }

    /// Set the step ceiling multiplier (clamped to at least 1).
    pub fn with_step_limit_factor(mut self, factor: usize) -> Self {
        self.step_limit_factor = factor.max(1);
        self
    }

    /// Run a workflow and return only the final context.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        context: WorkflowContext,
    ) -> Result<WorkflowContext> {
        Ok(self.run(definition, context).await?.context)
    }

    /// Run a workflow to completion.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        initial_context: WorkflowContext,
    ) -> Result<RunReport> {
        definition.validate()?;

        let mut current = definition
            .step(&definition.start_at)
            .ok_or_else(|| FlowError::StartStepNotFound(definition.start_at.clone()))?;
        let mut context = initial_context;
        let mut steps = Vec::new();
        let max_steps = definition.steps.len() * self.step_limit_factor;

        info!(workflow = %definition.id, start = %current.id, max_steps, "Starting workflow");

        loop {
            if steps.len() >= max_steps {
                error!(workflow = %definition.id, step = %current.id, "Step ceiling reached");
                return Err(FlowError::StepLimitExceeded { limit: max_steps });
            }

            info!(
                step = %current.id,
                "Starting execution ({}/{})",
                steps.len() + 1,
                max_steps
            );
            let step_start = Instant::now();
            self.executor.execute_step(current, &mut context).await?;
            steps.push(StepRecord {
                step_id: current.id.clone(),
                kind: current.kind.name(),
                elapsed_ms: step_start.elapsed().as_millis() as u64,
            });

            if current.end {
                info!(step = %current.id, workflow = %definition.id, "Workflow completed");
                break;
            }

            current = next_step(definition, current, &context).ok_or_else(|| {
                FlowError::NextStepNotFound {
                    step: current.id.clone(),
                }
            })?;
        }

        Ok(RunReport { context, steps })
    }
}

/// Compute the successor of `step`.
fn next_step<'d>(
    definition: &'d WorkflowDefinition,
    step: &WorkflowStep,
    context: &WorkflowContext,
) -> Option<&'d WorkflowStep> {
    match &step.kind {
        StepKind::Choice(choice) if choice.mode == ChoiceMode::RouteFirstMatch => {
            route_first_match(definition, &step.id, choice, context)
        }
        _ => {
            let next = step.next.as_deref()?;
            let target = definition.step(next);
            if target.is_none() {
                warn!(step = %step.id, next = %next, "Next step does not exist");
            }
            target
        }
    }
}

/// Scan rules in order and follow the first one that matches.
///
/// Rules that cannot be evaluated (no target, empty field, unresolved
/// field, unknown target step) are logged and skipped.
fn route_first_match<'d>(
    definition: &'d WorkflowDefinition,
    step_id: &str,
    choice: &ChoiceStep,
    context: &WorkflowContext,
) -> Option<&'d WorkflowStep> {
    if choice.choices.is_empty() {
        warn!(step = %step_id, "No choices defined");
        return None;
    }

    for (index, rule) in choice.choices.iter().enumerate() {
        let Some(next) = rule.next.as_deref().filter(|_| !rule.field.is_empty()) else {
            warn!(step = %step_id, rule = index, "Invalid choice rule: missing field or next");
            continue;
        };

        let field_value = match path::resolve(&rule.field, context) {
            Ok(value) => value,
            Err(e) => {
                error!(step = %step_id, rule = index, error = %e, "Error evaluating choice");
                continue;
            }
        };
        if field_value.is_null() {
            warn!(step = %step_id, rule = index, field = %rule.field, "Field not found");
            continue;
        }

        if !choice::evaluate(rule, &field_value) {
            continue;
        }

        match definition.step(next) {
            Some(target) => {
                debug!(step = %step_id, rule = index, next = %next, "Choice matched");
                return Some(target);
            }
            None => {
                error!(step = %step_id, rule = index, next = %next, "Target step not found");
            }
        }
    }

    warn!(step = %step_id, "No matching choice found");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolflow_core::error::ErrorKind;
    use toolflow_core::workflow::{ChoiceRule, ChoiceType, ComparisonOperator};
    use toolflow_test_utils::FakeGateway;

    fn engine(gateway: Arc<FakeGateway>) -> WorkflowEngine {
        WorkflowEngine::new(
            gateway,
            ToolRegistry::from_definitions(toolflow_test_utils::text_processing_tools()),
        )
    }

    fn upper(id: &str, text: &str) -> WorkflowStep {
        WorkflowStep::task(id, "to_upper", "to_upper")
            .with_param("text", text)
            .with_output(id)
    }

    fn contains(value: &str, next: &str) -> ChoiceRule {
        ChoiceRule::new(ChoiceType::StringContains, "$.word")
            .with_value(value)
            .with_next(next)
    }

    fn word(word: &str) -> WorkflowContext {
        WorkflowContext::from_value(json!({"word": word})).unwrap()
    }

    #[tokio::test]
    async fn test_start_step_not_found() {
        let def = WorkflowDefinition::new("wf", "nowhere", vec![upper("a", "x").ending()]);
        let err = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::StartStepNotFound(ref s) if s == "nowhere"));
        assert_eq!(err.kind(), ErrorKind::Definition);
    }

    #[tokio::test]
    async fn test_blank_plugin_fails_before_any_call() {
        let def = WorkflowDefinition::new(
            "wf",
            "a",
            vec![
                upper("a", "a").with_next("b"),
                WorkflowStep::task("b", "", "to_upper")
                    .with_param("text", "b")
                    .ending(),
            ],
        );
        let gateway = Arc::new(FakeGateway::text_processing());
        let err = engine(gateway.clone())
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::IncompleteTask(ref id) if id == "b"));
        assert_eq!(err.kind(), ErrorKind::Definition);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_first_match_routing() {
        let def = WorkflowDefinition::new(
            "wf",
            "route",
            vec![
                WorkflowStep::choice(
                    "route",
                    vec![contains("zzz", "r1"), contains("ell", "x"), contains("hello", "y")],
                ),
                upper("r1", "r1").ending(),
                upper("x", "x").ending(),
                upper("y", "y").ending(),
            ],
        );

        let report = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, word("hello"))
            .await
            .unwrap();
        assert_eq!(report.step_ids(), vec!["route", "x"]);
        assert_eq!(report.context.get_str("x"), Some("X"));
        assert!(report.context.get("y").is_none());
    }

    #[tokio::test]
    async fn test_routing_skips_broken_rules() {
        let missing_field = ChoiceRule::new(ChoiceType::ValueExists, "$.nothing").with_next("a");
        let no_next = ChoiceRule::new(ChoiceType::ValueExists, "$.word");
        let bad_target = contains("hello", "ghost");
        let unknown_type =
            ChoiceRule::new(ChoiceType::Unknown("fuzzy".into()), "$.word").with_next("a");
        let def = WorkflowDefinition::new(
            "wf",
            "route",
            vec![
                WorkflowStep::choice(
                    "route",
                    vec![missing_field, no_next, bad_target, unknown_type, contains("h", "b")],
                ),
                upper("a", "a").ending(),
                upper("b", "b").ending(),
            ],
        );

        let report = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, word("hello"))
            .await
            .unwrap();
        assert_eq!(report.step_ids(), vec!["route", "b"]);
    }

    #[tokio::test]
    async fn test_no_matching_rule_fails() {
        let def = WorkflowDefinition::new(
            "wf",
            "route",
            vec![
                WorkflowStep::choice("route", vec![contains("zzz", "a")]),
                upper("a", "a").ending(),
            ],
        );
        let err = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, word("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NextStepNotFound { ref step } if step == "route"));
    }

    #[tokio::test]
    async fn test_choice_without_rules_fails_routing() {
        let def =
            WorkflowDefinition::new("wf", "route", vec![WorkflowStep::choice("route", vec![])]);
        let err = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NextStepNotFound { .. }));
    }

    #[tokio::test]
    async fn test_store_first_rule_mode_follows_next() {
        let def = WorkflowDefinition::new(
            "wf",
            "flag",
            vec![
                WorkflowStep::choice("flag", vec![contains("zzz", "a"), contains("h", "a")])
                    .with_mode(ChoiceMode::StoreFirstRule)
                    .with_output("matched")
                    .with_next("b"),
                upper("a", "a").ending(),
                upper("b", "b").ending(),
            ],
        );

        let report = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, word("hello"))
            .await
            .unwrap();
        assert_eq!(report.step_ids(), vec!["flag", "b"]);
        assert_eq!(report.context.get("matched"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_terminal_step_wins_over_next() {
        let def = WorkflowDefinition::new(
            "wf",
            "a",
            vec![
                upper("a", "a").with_next("b").ending(),
                upper("b", "b").ending(),
            ],
        );
        let gateway = Arc::new(FakeGateway::text_processing());
        let report = engine(gateway.clone()).run(&def, WorkflowContext::new()).await.unwrap();
        assert_eq!(report.step_ids(), vec!["a"]);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_next_fails() {
        let def = WorkflowDefinition::new(
            "wf",
            "a",
            vec![upper("a", "a").with_next("non-existent-step")],
        );
        let err = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NextStepNotFound { ref step } if step == "a"));

        // Neither `next` nor `end`
        let def = WorkflowDefinition::new("wf", "a", vec![upper("a", "a")]);
        let err = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Definition);
    }

    #[tokio::test]
    async fn test_cycle_guard_stops_after_twice_the_steps() {
        let def = WorkflowDefinition::new(
            "wf",
            "a",
            vec![
                upper("a", "a").with_next("b"),
                upper("b", "b").with_next("c"),
                upper("c", "c").with_next("a"),
            ],
        );
        let gateway = Arc::new(FakeGateway::text_processing());
        let err = engine(gateway.clone())
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::StepLimitExceeded { limit: 6 }));
        assert_eq!(err.kind(), ErrorKind::Runaway);
        assert_eq!(gateway.call_count(), 6);
    }

    #[tokio::test]
    async fn test_step_limit_factor() {
        let def = WorkflowDefinition::new("wf", "a", vec![upper("a", "a").with_next("a")]);
        let gateway = Arc::new(FakeGateway::text_processing());
        let err = engine(gateway.clone())
            .with_step_limit_factor(5)
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded { limit: 5 }));
        assert_eq!(gateway.call_count(), 5);
    }

    #[tokio::test]
    async fn test_tool_failure_aborts_run() {
        let gateway = Arc::new(FakeGateway::text_processing().failing("to_upper", "boom"));
        let def = WorkflowDefinition::new(
            "wf",
            "a",
            vec![upper("a", "a").with_next("b"), upper("b", "b").ending()],
        );
        let err = engine(gateway.clone())
            .run(&def, WorkflowContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reserved_step_passes_through() {
        let parallel: WorkflowStep =
            serde_json::from_value(json!({"id": "fan", "type": "parallel", "next": "a"})).unwrap();
        let def = WorkflowDefinition::new("wf", "fan", vec![parallel, upper("a", "a").ending()]);
        let report = engine(Arc::new(FakeGateway::text_processing()))
            .run(&def, WorkflowContext::new())
            .await
            .unwrap();
        assert_eq!(report.step_ids(), vec!["fan", "a"]);
        assert_eq!(report.steps[0].kind, "parallel");
    }

    #[tokio::test]
    async fn test_number_compare_routing() {
        let rule = |op, next: &str| {
            ChoiceRule::new(ChoiceType::NumberCompare, "$.score")
                .with_operator(op)
                .with_value(50)
                .with_next(next)
        };
        let def = WorkflowDefinition::new(
            "wf",
            "grade",
            vec![
                WorkflowStep::choice(
                    "grade",
                    vec![
                        rule(ComparisonOperator::Gte, "pass"),
                        rule(ComparisonOperator::Lt, "fail"),
                    ],
                ),
                upper("pass", "pass").ending(),
                upper("fail", "fail").ending(),
            ],
        );
        let eng = engine(Arc::new(FakeGateway::text_processing()));

        let ctx = WorkflowContext::from_value(json!({"score": 72})).unwrap();
        assert_eq!(eng.run(&def, ctx).await.unwrap().step_ids(), vec!["grade", "pass"]);

        let ctx = WorkflowContext::from_value(json!({"score": 12.5})).unwrap();
        assert_eq!(eng.run(&def, ctx).await.unwrap().step_ids(), vec!["grade", "fail"]);
    }
}
