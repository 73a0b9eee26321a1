use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use toolflow_core::config::{AppConfig, McpJsonConfig};
use toolflow_core::traits::ToolGateway;
use toolflow_core::workflow::WorkflowDefinition;
use toolflow_engine::{ToolRegistry, WorkflowContext, WorkflowEngine};
use toolflow_mcp::McpGateway;

const DEFAULT_CONFIG: &str = "toolflow.toml";
const DEFAULT_MCP_JSON: &str = "mcp.config.json";

#[derive(Parser)]
#[command(name = "toolflow", version, about = "Run declarative workflows against MCP tool plugins")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Path to an `mcpServers` JSON file merged into the plugin table
    #[arg(long, default_value = DEFAULT_MCP_JSON)]
    mcp_json: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print the final context
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Initial context as inline JSON
        #[arg(long, conflicts_with = "context_file")]
        context: Option<String>,
        /// Initial context read from a JSON file
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Parse and validate a workflow definition
    Validate {
        /// Workflow definition (JSON)
        workflow: PathBuf,
    },
    /// List tools exposed by the configured plugins
    Tools {
        /// Only list this plugin
        #[arg(long)]
        plugin: Option<String>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("toolflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "toolflow", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { workflow } => {
            let definition = WorkflowDefinition::from_file(workflow)?;
            definition.validate()?;
            println!(
                "{}: ok ({} steps, starts at {})",
                definition.id,
                definition.steps.len(),
                definition.start_at
            );
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli.config, &cli.mcp_json)?;
    let gateway = Arc::new(McpGateway::from_config(&config));

    match cli.command {
        Commands::Run {
            workflow,
            context,
            context_file,
        } => {
            let definition = WorkflowDefinition::from_file(&workflow)?;
            let initial = initial_context(context.as_deref(), context_file.as_deref())?;
            let registry = build_registry(&config, gateway.as_ref()).await?;

            let engine = WorkflowEngine::new(gateway, registry)
                .with_step_limit_factor(config.engine.step_limit_factor);
            let report = engine.run(&definition, initial).await?;

            info!(
                workflow = %definition.id,
                steps = report.steps.len(),
                "Executed: {}",
                report.step_ids().join(" -> ")
            );
            println!("{}", serde_json::to_string_pretty(&report.context.into_value())?);
        }
        Commands::Tools { plugin } => {
            let plugins = match plugin {
                Some(p) => vec![p],
                None => gateway.plugins(),
            };
            if plugins.is_empty() {
                println!("No plugins configured.");
                println!(
                    "Add [plugins.<id>] to {} or entries to {}.",
                    cli.config.display(),
                    cli.mcp_json.display()
                );
            }
            for plugin in &plugins {
                let tools = gateway.list_tools(plugin).await?;
                println!("{} ({} tools)", plugin, tools.len());
                for tool in &tools {
                    if tool.description.is_empty() {
                        println!("  {}", tool.name);
                    } else {
                        println!("  {:<24} {}", tool.name, tool.description);
                    }
                }
            }
        }
        Commands::Completions { .. } | Commands::Validate { .. } => {
            unreachable!("handled before config load")
        }
    }

    Ok(())
}

/// Load the TOML config and merge the `mcpServers` file over it.
///
/// A missing file is only tolerated at its default location.
fn load_config(config_path: &Path, mcp_json_path: &Path) -> anyhow::Result<AppConfig> {
    let mut config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else if config_path == Path::new(DEFAULT_CONFIG) {
        info!("No {} found, using defaults", DEFAULT_CONFIG);
        AppConfig::default()
    } else {
        anyhow::bail!("Config file not found: {}", config_path.display());
    };

    if mcp_json_path.exists() {
        let mcp_json = McpJsonConfig::load(mcp_json_path)?;
        for name in config.merge_mcp_json(&mcp_json) {
            info!(
                plugin = %name,
                path = %mcp_json_path.display(),
                "Loaded plugin from MCP JSON config"
            );
        }
    } else if mcp_json_path != Path::new(DEFAULT_MCP_JSON) {
        warn!(path = %mcp_json_path.display(), "MCP JSON config not found");
    }

    config.validate()?;
    Ok(config)
}

fn initial_context(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<WorkflowContext> {
    let value = match (inline, file) {
        (Some(json), _) => serde_json::from_str(json).context("Invalid --context JSON")?,
        (None, Some(path)) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        }
        (None, None) => serde_json::Value::Object(Default::default()),
    };
    Ok(WorkflowContext::from_value(value)?)
}

/// Static `[[tools]]` metadata wins; otherwise ask every plugin.
async fn build_registry(config: &AppConfig, gateway: &McpGateway) -> anyhow::Result<ToolRegistry> {
    if !config.tools.is_empty() {
        info!(count = config.tools.len(), "Using tool metadata from config");
        return Ok(ToolRegistry::from_definitions(config.tools.iter().cloned()));
    }
    let registry = ToolRegistry::discover(gateway, &gateway.plugins()).await?;
    info!(count = registry.len(), "Discovered plugin tools");
    Ok(registry)
}
