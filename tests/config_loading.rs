use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use toolflow_core::config::{AppConfig, McpJsonConfig, PluginTransport};
use toolflow_core::error::{ErrorKind, FlowError};
use toolflow_engine::{ToolRegistry, WorkflowContext, WorkflowEngine};
use toolflow_test_utils::{greeting_input, text_processing_workflow, FakeGateway};

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write file");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_temp(
        r#"
[engine]
step_limit_factor = 3
default_timeout_secs = 45

[plugins.add_prefix]
timeout_secs = 10

[plugins.add_prefix.transport]
type = "stdio"
command = "node"
args = ["plugins/add-prefix/dist/index.js"]

[plugins.to_upper.transport]
type = "stdio"
command = "node"
args = ["plugins/to-upper/dist/index.js"]

[plugins.to_upper.transport.env]
LOG_LEVEL = "debug"

[[tools]]
name = "add_prefix"
description = "Adds a prefix to the text"
parameters = [
  { name = "text", type = "string", required = true },
  { name = "prefix", type = "string", required = true },
]

[[tools]]
name = "to_upper"
parameters = [{ name = "text", required = true }]
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.step_limit_factor, 3);
    assert_eq!(config.engine.default_timeout_secs, 45);
    assert_eq!(config.plugins.len(), 2);
    assert_eq!(config.timeout_for("add_prefix"), 10);
    assert_eq!(config.timeout_for("to_upper"), 45);

    let PluginTransport::Stdio { command, args, env } = &config.plugins["to_upper"].transport;
    assert_eq!(command, "node");
    assert_eq!(args, &vec!["plugins/to-upper/dist/index.js".to_string()]);
    assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));

    assert_eq!(config.tools.len(), 2);
    let to_upper = &config.tools[1];
    assert_eq!(to_upper.parameters[0].param_type, "string");
    assert!(to_upper.parameters[0].required);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("TOOLFLOW_TEST_PLUGIN_CMD", "/usr/local/bin/upper-plugin");
    let tmp = write_temp(
        r#"
[plugins.to_upper.transport]
type = "stdio"
command = "${TOOLFLOW_TEST_PLUGIN_CMD}"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    let PluginTransport::Stdio { command, .. } = &config.plugins["to_upper"].transport;
    assert_eq!(command, "/usr/local/bin/upper-plugin");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_temp("");
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.step_limit_factor, 2);
    assert_eq!(config.engine.default_timeout_secs, 120);
    assert!(config.plugins.is_empty());
    assert!(config.tools.is_empty());
}

#[test]
fn test_invalid_configs_are_rejected() {
    let tmp = write_temp("[engine]\nstep_limit_factor = 0\n");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let tmp = write_temp("[plugins.broken.transport]\ntype = \"stdio\"\ncommand = \"  \"\n");
    assert!(matches!(AppConfig::load(tmp.path()), Err(FlowError::Config(_))));

    let tmp = write_temp("[engine\n");
    assert!(matches!(AppConfig::load(tmp.path()), Err(FlowError::Config(_))));

    let err = AppConfig::load(std::path::Path::new("/nonexistent/toolflow.toml")).unwrap_err();
    assert!(matches!(err, FlowError::ConfigNotFound(_)));
}

#[test]
fn test_mcp_json_merges_without_overriding() {
    let toml = write_temp(
        r#"
[plugins.to_upper.transport]
type = "stdio"
command = "from-toml"
"#,
    );
    let json = write_temp(
        r#"{
  "mcpServers": {
    "to_upper": { "command": "from-json" },
    "add_prefix": { "command": "node", "args": ["add-prefix.js"] },
    "remote": { "url": "http://localhost:9000/mcp" }
  }
}"#,
    );

    let mut config = AppConfig::load(toml.path()).unwrap();
    let added = config.merge_mcp_json(&McpJsonConfig::load(json.path()).unwrap());

    assert_eq!(added, vec!["add_prefix"]);
    let PluginTransport::Stdio { command, .. } = &config.plugins["to_upper"].transport;
    assert_eq!(command, "from-toml");
    assert!(!config.plugins.contains_key("remote"));
}

#[tokio::test]
async fn test_configured_tools_drive_a_run() {
    let tmp = write_temp(
        r#"
[engine]
step_limit_factor = 1

[[tools]]
name = "add_prefix"
parameters = [
  { name = "text", required = true },
  { name = "prefix", required = true },
]

[[tools]]
name = "to_upper"
parameters = [{ name = "text", required = true }]
"#,
    );
    let config = AppConfig::load(tmp.path()).unwrap();

    let engine = WorkflowEngine::new(
        Arc::new(FakeGateway::text_processing()),
        ToolRegistry::from_definitions(config.tools.clone()),
    )
    .with_step_limit_factor(config.engine.step_limit_factor);

    let context = WorkflowContext::from_value(greeting_input("world", "Hello, ")).unwrap();
    let ctx = engine.execute(&text_processing_workflow(), context).await.unwrap();
    assert_eq!(ctx.get("final"), Some(&json!("! HELLO, WORLD")));
}
