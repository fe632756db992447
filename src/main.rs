//! support-chat - terminal client for a storefront support chat
//!
//! Keeps a local copy of one customer/support conversation in sync with the
//! server, by polling or over a Socket.IO channel.

mod api;
mod channel;
mod config;
mod error;
mod models;
mod sync;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, DeliveryMode, RoleKind};

#[derive(Parser)]
#[command(name = "support-chat")]
#[command(about = "Terminal client for storefront support chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store server address, session credentials and delivery settings
    Configure {
        #[arg(long)]
        base_url: Option<String>,

        /// Value of the `sessionid` cookie
        #[arg(long)]
        session_id: Option<String>,

        /// Value of the `csrftoken` cookie
        #[arg(long)]
        csrf_token: Option<String>,

        #[arg(long, value_enum)]
        role: Option<RoleKind>,

        /// Customer whose conversation to open (admins) or room to join
        #[arg(long)]
        room_user_id: Option<u64>,

        #[arg(long, value_enum)]
        mode: Option<DeliveryMode>,

        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },

    /// Print the conversation once
    Read {
        /// Print an HTML fragment instead of text
        #[arg(long)]
        html: bool,
    },

    /// Send a message
    Send {
        /// Message content
        message: String,
    },

    /// Follow the conversation and print new messages
    Watch,

    /// Launch the terminal chat widget
    Tui,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let tui_mode = matches!(cli.command, Commands::Tui);

    init_logging(cli.verbose, tui_mode, cli.config.as_deref())?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Configure {
            base_url,
            session_id,
            csrf_token,
            role,
            room_user_id,
            mode,
            poll_interval_ms,
        } => {
            let mut config = Config::load(config_path)?;
            if let Some(v) = base_url {
                config.base_url = v;
            }
            if session_id.is_some() {
                config.session_id = session_id;
            }
            if csrf_token.is_some() {
                config.csrf_token = csrf_token;
            }
            if let Some(v) = role {
                config.role = v;
            }
            if room_user_id.is_some() {
                config.room_user_id = room_user_id;
            }
            if let Some(v) = mode {
                config.mode = v;
            }
            if let Some(v) = poll_interval_ms {
                config.poll_interval_ms = v;
            }
            if let Err(e) = config.validate() {
                tracing::warn!("Configuration incomplete: {:#}", e);
            }
            let path = config.save(config_path)?;
            println!("Configuration saved to {}", path.display());
        }
        Commands::Read { html } => {
            let config = load_valid(config_path)?;
            api::read_messages(&config, html).await?;
        }
        Commands::Send { message } => {
            let config = load_valid(config_path)?;
            tracing::info!("Sending message...");
            api::send_message(&config, &message).await?;
        }
        Commands::Watch => {
            let config = load_valid(config_path)?;
            api::watch(&config).await?;
        }
        Commands::Tui => {
            let config = load_valid(config_path)?;
            tui::run(&config).await?;
        }
    }

    Ok(())
}

fn load_valid(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Logs go to stderr, or to a file next to the config while the TUI owns
/// the terminal.
fn init_logging(verbose: bool, tui_mode: bool, config_path: Option<&Path>) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if tui_mode {
        let dir = match config_path.and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => Config::config_dir()?,
        };
        std::fs::create_dir_all(&dir).context("Failed to create log directory")?;
        let log_path = dir.join("support-chat.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}
