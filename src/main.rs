//! # tandem
//!
//! Command-line front end: load settings, build the engine and run one
//! request against it.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use tandem_api::dto::GenerateToolRequest;
use tandem_core::ids::ThreadId;
use tandem_settings::{load_settings_from_path, settings_path};
use tandem_telemetry::{init_telemetry, TelemetryConfig};

/// Multi-agent orchestration engine.
#[derive(Parser, Debug)]
#[command(name = "tandem", about = "Multi-agent orchestration engine")]
struct Cli {
    /// Settings file (defaults to `$TANDEM_CONFIG` or `./tandem.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Orchestrate one message and print the final output.
    Run {
        message: String,
        /// Continue an existing thread.
        #[arg(long)]
        thread: Option<String>,
    },
    /// List registered agents and their tools.
    Agents,
    /// Draft a tool for an agent and print the generated code.
    Synthesize {
        #[arg(long)]
        agent: String,
        requirement: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let settings =
        load_settings_from_path(&path).with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let logging = &settings.logging;
    let _telemetry = init_telemetry(TelemetryConfig::from_levels(
        &logging.level,
        &logging.module_levels,
        logging.json,
    ));

    let service = tandem_api::build_service(&settings).context("Failed to build engine")?;

    match cli.command {
        Command::Run { message, thread } => {
            let thread_id = thread.map(ThreadId::from_raw).unwrap_or_default();
            let outcome = service.orchestrator().orchestrate(&thread_id, &message).await;
            tracing::info!(
                thread_id = %thread_id,
                iterations = outcome.iterations,
                termination = ?outcome.termination,
                "run finished"
            );
            println!("{}", outcome.output);
        }
        Command::Agents => {
            let agents = service.dispatch("agents", json!({})).await;
            println!("{}", serde_json::to_string_pretty(&agents)?);
        }
        Command::Synthesize { agent, requirement } => {
            let draft = service
                .generate_tool(GenerateToolRequest {
                    query: requirement,
                    agent_id: agent,
                    existing_tools: None,
                    session_id: None,
                })
                .await
                .context("Tool generation failed")?;
            if let Some(name) = &draft.function_name {
                eprintln!("function: {name}  session: {}", draft.session_id);
            }
            println!("{}", draft.code);
        }
    }
    Ok(())
}
