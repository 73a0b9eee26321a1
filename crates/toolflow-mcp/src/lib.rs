mod gateway;
mod handler;

pub use gateway::McpGateway;
pub use handler::FlowClientHandler;
