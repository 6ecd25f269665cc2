//! # pairlink-cli
//!
//! Command-line interface for Pairlink.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pairlink_core::Config;

mod commands;

/// Pairlink - HTTP gateway for a QR-paired messaging account
#[derive(Parser)]
#[command(name = "pairlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve(ServeArgs),
    /// Persisted session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Diagnose installation issues
    Doctor,
    /// Show version information
    Version,
}

/// Overrides for `serve`; they take precedence over every config source.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,

    /// Messaging capability (bridge, loopback)
    #[arg(long)]
    capability: Option<String>,

    /// Session record location
    #[arg(long, value_name = "PATH")]
    session_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show whether a session is persisted
    Show,
    /// Delete the persisted session
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show where configuration is read from
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve(args) => {
            commands::serve::run(args).await?;
        }
        Commands::Session { action } => {
            commands::session::handle(action, &load_config()).await?;
        }
        Commands::Config { action } => {
            commands::config::handle(action, &load_config())?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
        Commands::Version => {
            println!("pairlink {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    })
}
