use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ToolCallResult, ToolDescriptor};

/// Tool invocation gateway, the boundary through which steps reach tools.
///
/// Implementations own transport, connection lifetime and timeouts. Every
/// call is independent: nothing about a previous call may be assumed.
pub trait ToolGateway: Send + Sync + 'static {
    /// List the tools a plugin exposes.
    fn list_tools<'a>(&'a self, plugin: &'a str) -> BoxFuture<'a, Result<Vec<ToolDescriptor>>>;

    /// Invoke `tool` on `plugin` with a structured argument payload.
    fn call_tool<'a>(
        &'a self,
        plugin: &'a str,
        tool: &'a str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<ToolCallResult>>;
}
