//! Declarative workflow definitions.
//!
//! A workflow is an ordered list of steps addressed by id, entered at
//! `startAt`. The JSON shape mirrors the document format authors write:
//!
//! ```json
//! { "id": "wf", "version": "1.0.0", "name": "Demo", "startAt": "a",
//!   "steps": [ { "id": "a", "type": "task", "plugin": "p", "tool": "t",
//!                "parameters": { "text": "$.input.text" }, "output": "out",
//!                "end": true } ] }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "startAt")]
    pub start_at: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(
        id: impl Into<String>,
        start_at: impl Into<String>,
        steps: Vec<WorkflowStep>,
    ) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".to_string(),
            name: String::new(),
            description: None,
            start_at: start_at.into(),
            steps,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse a definition from its JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a definition from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        Self::from_json(&content)
    }

    /// Find a step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Check the structural invariants: ids are non-empty and unique, task
    /// steps name both a plugin and a tool, and `startAt` names an existing
    /// step.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(FlowError::EmptyStepId);
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FlowError::DuplicateStepId(step.id.clone()));
            }
            if let StepKind::Task(task) = &step.kind {
                if task.plugin.trim().is_empty() || task.tool.trim().is_empty() {
                    return Err(FlowError::IncompleteTask(step.id.clone()));
                }
            }
        }

        if !seen.contains(self.start_at.as_str()) {
            return Err(FlowError::StartStepNotFound(self.start_at.clone()));
        }
        Ok(())
    }
}

/// One node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Task(TaskStep),
    Choice(ChoiceStep),
    /// Reserved; executes as a pass-through.
    Parallel,
    /// Reserved; executes as a pass-through.
    Map,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Choice(_) => "choice",
            Self::Parallel => "parallel",
            Self::Map => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub plugin: String,
    pub tool: String,
    /// Parameter name → literal value or path expression.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceStep {
    #[serde(default)]
    pub choices: Vec<ChoiceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub mode: ChoiceMode,
}

/// How a choice step picks its successor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChoiceMode {
    /// Follow the `next` of the first rule that matches.
    #[default]
    RouteFirstMatch,
    /// Only compute the first rule's flag; follow the step's own `next`.
    StoreFirstRule,
}

impl WorkflowStep {
    pub fn task(id: impl Into<String>, plugin: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: None,
            end: false,
            kind: StepKind::Task(TaskStep {
                plugin: plugin.into(),
                tool: tool.into(),
                parameters: serde_json::Map::new(),
                output: None,
            }),
        }
    }

    pub fn choice(id: impl Into<String>, choices: Vec<ChoiceRule>) -> Self {
        Self {
            id: id.into(),
            next: None,
            end: false,
            kind: StepKind::Choice(ChoiceStep {
                choices,
                output: None,
                mode: ChoiceMode::default(),
            }),
        }
    }

    /// Bind a task parameter. No-op on other step kinds.
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        if let StepKind::Task(ref mut task) = self.kind {
            task.parameters.insert(name.into(), value.into());
        }
        self
    }

    /// Set the context key receiving the step's result.
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        match self.kind {
            StepKind::Task(ref mut task) => task.output = Some(key.into()),
            StepKind::Choice(ref mut choice) => choice.output = Some(key.into()),
            _ => {}
        }
        self
    }

    pub fn with_mode(mut self, mode: ChoiceMode) -> Self {
        if let StepKind::Choice(ref mut choice) = self.kind {
            choice.mode = mode;
        }
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn ending(mut self) -> Self {
        self.end = true;
        self
    }
}

/// A declarative condition plus a routing target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    #[serde(rename = "type", default)]
    pub choice_type: ChoiceType,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<ComparisonOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl ChoiceRule {
    pub fn new(choice_type: ChoiceType, field: impl Into<String>) -> Self {
        Self {
            choice_type,
            field: field.into(),
            value: None,
            operator: None,
            next: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_operator(mut self, operator: ComparisonOperator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

/// Rule kind. Unrecognized names are kept so a malformed rule evaluates to
/// `false` instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChoiceType {
    StringLength,
    NumberCompare,
    StringContains,
    StringEquals,
    ValueExists,
    Unknown(String),
}

impl Default for ChoiceType {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl ChoiceType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StringLength => "string-length",
            Self::NumberCompare => "number-compare",
            Self::StringContains => "string-contains",
            Self::StringEquals => "string-equals",
            Self::ValueExists => "value-exists",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for ChoiceType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "string-length" => Self::StringLength,
            "number-compare" => Self::NumberCompare,
            "string-contains" => Self::StringContains,
            "string-equals" => Self::StringEquals,
            "value-exists" => Self::ValueExists,
            _ => Self::Unknown(name),
        }
    }
}

impl From<ChoiceType> for String {
    fn from(choice_type: ChoiceType) -> Self {
        choice_type.as_str().to_string()
    }
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator for `string-length` and `number-compare` rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Unknown(String),
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for ComparisonOperator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            _ => Self::Unknown(name),
        }
    }
}

impl From<ComparisonOperator> for String {
    fn from(operator: ComparisonOperator) -> Self {
        operator.as_str().to_string()
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
