//! Cortex CLI — the main entry point.
//!
//! Commands:
//! - `agent`   — Interactive session or single-message mode
//! - `memory`  — Inspect stored conversations
//! - `config`  — Show, validate, or generate configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cortex",
    about = "Cortex — a task-solving agent that plans in code and learns from history",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and print loop events
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the agent (interactive unless --message is given)
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Inspect conversation memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List the most recent conversations
    List {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Find conversations similar to a query
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Count stored conversations
    Count,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration as TOML
    Default,
    /// Print the config file location
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent { message } => commands::agent::run(message, cli.verbose).await?,
        Commands::Memory { action } => match action {
            MemoryAction::List { limit } => commands::memory::list(limit).await?,
            MemoryAction::Search { query, limit } => commands::memory::search(&query, limit).await?,
            MemoryAction::Count => commands::memory::count().await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Default => commands::config_cmd::default_toml(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
