pub mod choice;
pub mod context;
pub mod engine;
pub mod executor;
pub mod mapper;
pub mod path;
pub mod registry;

pub use context::WorkflowContext;
pub use engine::{RunReport, StepRecord, WorkflowEngine, DEFAULT_STEP_LIMIT_FACTOR};
pub use executor::StepExecutor;
pub use path::{resolve, try_resolve, Diagnostic, PathExpr};
pub use registry::ToolRegistry;
