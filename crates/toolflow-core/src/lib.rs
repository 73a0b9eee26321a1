pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{ErrorKind, FlowError, Result};
pub use traits::ToolGateway;
pub use types::*;
pub use workflow::*;
