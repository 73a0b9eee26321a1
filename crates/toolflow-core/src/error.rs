use thiserror::Error;

/// Failure categories a caller can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The workflow definition is inconsistent (missing or duplicate steps).
    Definition,
    /// A step's parameter bindings do not fit the tool's declared parameters.
    Binding,
    /// A path expression could not be evaluated.
    Resolution,
    /// The gateway or the tool itself failed.
    Tool,
    /// The step ceiling was exceeded.
    Runaway,
    /// Configuration, I/O or (de)serialization outside a run.
    Config,
}

#[derive(Debug, Error)]
pub enum FlowError {
    // Definition errors
    #[error("Step id must not be empty")]
    EmptyStepId,

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Start step \"{0}\" not found")]
    StartStepNotFound(String),

    #[error("Next step not found for step \"{step}\"")]
    NextStepNotFound { step: String },

    #[error("Task step \"{0}\" requires both plugin and tool")]
    IncompleteTask(String),

    // Binding errors
    #[error("Tool definition not found: {0}")]
    ToolNotRegistered(String),

    #[error("Unknown parameter: {parameter} for tool: {tool}")]
    UnknownParameter { tool: String, parameter: String },

    #[error("Required parameter not found: {parameter} for tool: {tool} (step \"{step}\")")]
    MissingRequiredParameter {
        step: String,
        tool: String,
        parameter: String,
    },

    // Resolution errors
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    // Tool errors
    #[error("Plugin not configured: {0}")]
    PluginNotConfigured(String),

    #[error("Failed to connect to plugin {plugin}: {message}")]
    PluginConnect { plugin: String, message: String },

    #[error("Failed to execute tool {tool} in plugin {plugin}: {message}")]
    ToolCall {
        plugin: String,
        tool: String,
        message: String,
    },

    #[error("Tool {tool} in plugin {plugin} timed out after {timeout_secs}s")]
    ToolTimeout {
        plugin: String,
        tool: String,
        timeout_secs: u64,
    },

    #[error("Tool {0} returned empty result")]
    EmptyToolResult(String),

    #[error("Tool {0} returned no text content")]
    MissingTextContent(String),

    // Runaway
    #[error("Maximum step execution count exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyStepId
            | Self::DuplicateStepId(_)
            | Self::StartStepNotFound(_)
            | Self::NextStepNotFound { .. }
            | Self::IncompleteTask(_) => ErrorKind::Definition,
            Self::ToolNotRegistered(_)
            | Self::UnknownParameter { .. }
            | Self::MissingRequiredParameter { .. } => ErrorKind::Binding,
            Self::InvalidPath(_) => ErrorKind::Resolution,
            Self::PluginNotConfigured(_)
            | Self::PluginConnect { .. }
            | Self::ToolCall { .. }
            | Self::ToolTimeout { .. }
            | Self::EmptyToolResult(_)
            | Self::MissingTextContent(_) => ErrorKind::Tool,
            Self::StepLimitExceeded { .. } => ErrorKind::Runaway,
            Self::Config(_) | Self::ConfigNotFound(_) | Self::Io(_) | Self::Json(_) => {
                ErrorKind::Config
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FlowError::EmptyStepId.kind(), ErrorKind::Definition);
        assert_eq!(
            FlowError::NextStepNotFound { step: "a".into() }.kind(),
            ErrorKind::Definition
        );
        assert_eq!(
            FlowError::UnknownParameter {
                tool: "t".into(),
                parameter: "p".into()
            }
            .kind(),
            ErrorKind::Binding
        );
        assert_eq!(
            FlowError::InvalidPath(String::new()).kind(),
            ErrorKind::Resolution
        );
        assert_eq!(
            FlowError::EmptyToolResult("t".into()).kind(),
            ErrorKind::Tool
        );
        assert_eq!(
            FlowError::StepLimitExceeded { limit: 4 }.kind(),
            ErrorKind::Runaway
        );
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = FlowError::MissingRequiredParameter {
            step: "add-greeting".into(),
            tool: "add_prefix".into(),
            parameter: "prefix".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("prefix"));
        assert!(msg.contains("add_prefix"));
        assert!(msg.contains("add-greeting"));
    }
}
