//! hydra-agents: run task DAGs through multi-agent consensus
//!
//! ```bash
//! # Run a DAG against the configured endpoints
//! HYDRA_GENERATOR_URL=http://gpu-1:8000/v1 hydra-agents run tasks.json
//!
//! # Keep learned patterns between runs
//! HYDRA_MEMORY_DIR=./memory hydra-agents run tasks.json
//!
//! # Continue after a crash or Ctrl-C
//! hydra-agents run tasks.json --resume
//!
//! # Inspect persisted state
//! hydra-agents checkpoints
//! hydra-agents restore
//! HYDRA_BUS_DIR=./bus hydra-agents tail status --from 0
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use hydra_agents::commands::{self, RunOutcome};
use hydra_agents::{build_services, load_dag, AgentsConfig, PROMPT_VERSION};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Orchestrator TOML config (defaults plus HYDRA_* overrides when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a task DAG file and run it to completion
    Run {
        dag: PathBuf,

        /// Restore the latest checkpoint first and skip tasks it already holds
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// List stored checkpoints
    Checkpoints,
    /// Print the task table of the latest readable checkpoint
    Restore,
    /// Follow a file-backed state-bus topic as JSON lines
    Tail {
        topic: String,

        /// First sequence number to print
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Re-read interval for entries written by another process
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
}

async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = commands::load_config(args.config.as_deref())?;

    match args.command {
        Command::Run { dag, resume } => {
            let tasks =
                load_dag(&dag).with_context(|| format!("Failed to load {}", dag.display()))?;
            let agents = AgentsConfig::default();
            info!(
                generator = %agents.generator.url,
                model = %agents.generator.model,
                prompt_version = PROMPT_VERSION,
                tasks = tasks.len(),
                "Hydra orchestrator starting"
            );
            let services = build_services(&agents).context("Failed to build HTTP clients")?;

            let (outcome, summary) =
                commands::run_dag(&config, services, tasks, resume, ctrl_c()).await?;
            print!("{summary}");
            if let RunOutcome::Finished(report) = outcome {
                let failed = report.failed().len();
                let unfinished = report.unfinished().len();
                if failed > 0 || unfinished > 0 {
                    bail!("{failed} task(s) failed, {unfinished} left unfinished");
                }
            }
        }
        Command::Checkpoints => print!("{}", commands::list_checkpoints(&config).await?),
        Command::Restore => print!("{}", commands::restore(&config).await?),
        Command::Tail {
            topic,
            from,
            poll_ms,
        } => {
            commands::tail(
                &config,
                &topic,
                from,
                Duration::from_millis(poll_ms),
                ctrl_c(),
            )
            .await?
        }
    }

    Ok(())
}
