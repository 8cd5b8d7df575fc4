//! Thin demonstration binary for the conductor agent runtime.
//!
//! This binary exercises [`conductor_runtime::Agent`] end to end: it loads
//! MCP server configuration, drives a turn loop, and prints the result.
//! Wiring a real LLM HTTP client and a full interactive frontend is outside
//! this crate's scope -- see [`conductor_llm::LlmProvider`] -- so every
//! command here runs against [`conductor_llm::ScriptedProvider`], a
//! deterministic stand-in, rather than a live model.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A thin demonstration client for the conductor agent runtime.
#[derive(Parser)]
#[command(name = "conductor", author, version, about, long_about = None)]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the MCP servers config file. Defaults to the platform config
    /// directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the answer.
    Ask {
        /// The question to ask.
        question: String,
    },
    /// Start an interactive REPL against the demo provider.
    Chat,
    /// List the MCP servers configured for this agent.
    Servers,
    /// Load configuration and connect every auto-start MCP server.
    Doctor,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask { question } => commands::ask(cli.config.as_deref(), &question).await,
        Commands::Chat => commands::chat(cli.config.as_deref()).await,
        Commands::Servers => commands::servers(cli.config.as_deref()),
        Commands::Doctor => commands::doctor(cli.config.as_deref()).await,
    }
}
