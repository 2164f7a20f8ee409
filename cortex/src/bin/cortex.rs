//! Cortex command line
//!
//! Drives the execution core against the echo capability layer: run a plan
//! through the scheduler, run a primitive sequence through the Motor Cortex,
//! or list the registered primitives.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use cortex::{
    CortexConfig, Directive, EchoExecutor, MotorCortex, Plan, PrimitiveInvocation,
    PrimitiveRegistry, Scheduler, StaticPlanCompiler,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a cortex TOML configuration (defaults, then CORTEX_* variables, when absent)
    #[arg(short, long, global = true, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan through the staged scheduler
    Run {
        /// Plan file (.json or .toml)
        #[arg(short, long)]
        plan: PathBuf,

        #[arg(long, default_value = "goal")]
        directive_type: String,

        /// Directive content; defaults to the plan goal
        #[arg(long)]
        content: Option<String>,

        /// Primitive forced to fail (repeatable)
        #[arg(long = "fail", value_name = "PRIMITIVE")]
        failing: Vec<String>,
    },

    /// Run an explicit primitive sequence through the Motor Cortex
    Motor {
        /// Sequence file (.json or .toml) with an `invocations` list
        #[arg(short, long)]
        sequence: PathBuf,

        /// Primitive forced to fail (repeatable)
        #[arg(long = "fail", value_name = "PRIMITIVE")]
        failing: Vec<String>,
    },

    /// List registered primitives
    Primitives,
}

#[derive(Deserialize)]
struct SequenceFile {
    invocations: Vec<PrimitiveInvocation>,
}

fn load<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(parsed)
}

fn echo_executor(failing: Vec<String>) -> EchoExecutor {
    failing.into_iter().fold(EchoExecutor::new(), EchoExecutor::failing)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cortex=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CortexConfig::from_file(path)?,
        None => CortexConfig::from_env()?,
    };
    let registry = Arc::new(PrimitiveRegistry::with_builtins()?);

    match cli.command {
        Commands::Run {
            plan,
            directive_type,
            content,
            failing,
        } => {
            let plan: Plan = load(&plan)?;
            let content = content.unwrap_or_else(|| plan.goal.clone());
            let compiler = StaticPlanCompiler::new().with_content_plan(content.clone(), plan);
            let scheduler = Scheduler::new(
                config,
                registry,
                Arc::new(compiler),
                Arc::new(echo_executor(failing)),
            );

            let snapshot = scheduler
                .run_directive(Directive::new(directive_type, content))
                .await;
            info!(status = %snapshot.status, "run finished");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Motor { sequence, failing } => {
            let sequence: SequenceFile = load(&sequence)?;
            let motor = MotorCortex::new(registry, Arc::new(echo_executor(failing)));

            let snapshot = motor.execute(sequence.invocations).await?;
            info!(status = %snapshot.status, "sequence finished");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Primitives => {
            for definition in registry.list() {
                let resource = definition
                    .exclusive_resource
                    .as_deref()
                    .map(|r| format!(" exclusive={}", r))
                    .unwrap_or_default();
                println!(
                    "{:<12} {:?}{}  {}",
                    definition.primitive_type,
                    definition.origin,
                    resource,
                    definition.schema.document()
                );
            }
        }
    }

    Ok(())
}
