//! StrideChat CLI: the main entry point.
//!
//! Commands:
//! - `sanitize`: show what the PHI sanitizer does to a text
//! - `tokens`: estimate the token cost of a text
//! - `explain`: show which response strategy a message would get
//! - `chat`: interactive session against the dry-run endpoint
//! - `history`: print a persisted session
//! - `config`: show or initialize configuration
//! - `status`: show configuration and pipeline status

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "stridechat",
    about = "StrideChat, privacy-first step-tracking support chat",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.stridechat/config.toml)
    #[arg(short, long, global = true, env = "STRIDECHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Redact PHI from a text and report what was replaced
    Sanitize {
        text: String,
    },

    /// Estimate tokens for a text
    Tokens {
        text: String,

        /// Model to estimate for (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Explain the strategy decision for a message
    Explain {
        text: String,

        /// Pretend the conversation already has this many user turns
        #[arg(short, long)]
        turns: Option<usize>,

        /// Evaluate against a persisted session's history
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Chat interactively (dry-run endpoint, nothing leaves the machine)
    Chat {
        /// Resume or name a session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Print a session's stored history
    History {
        session: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Sanitize { text } => commands::sanitize::run(config_path, &text)?,
        Commands::Tokens { text, model } => commands::tokens::run(config_path, &text, model.as_deref())?,
        Commands::Explain { text, turns, session } => {
            commands::explain::run(config_path, &text, turns, session.as_deref()).await?
        }
        Commands::Chat { session } => commands::chat::run(config_path, session.as_deref()).await?,
        Commands::History { session } => commands::history::run(config_path, &session).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
        Commands::Status => commands::status::run(config_path).await?,
    }

    Ok(())
}
