//! CLI for running commands on test-cluster node agents.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod run;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "nodeagent",
    version,
    about = "Run commands on a node agent over WebSocket"
)]
struct Cli {
    /// Log output format (written to stderr).
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command on a node and stream its output.
    Run(Box<run::RunArgs>),
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("nodeagent: {e:#}");
        std::process::exit(1);
    }
    match cli.dispatch().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("nodeagent: {e:#}");
            std::process::exit(1);
        }
    }
}

impl Cli {
    /// Runs the selected subcommand, returning the process exit code.
    async fn dispatch(self) -> Result<i32> {
        match self.command {
            Command::Run(args) => args.run().await,
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to init tracing: {e}"))
}
