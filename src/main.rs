//! Feedchat CLI - terminal client for the feed platform's direct messages
//!
//! Real-time messaging over the platform's event channel, with REST fallbacks
//! for history and presence-adjacent lookups.

mod api;
mod channel;
mod config;
mod error;
mod models;
mod session;
mod state;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "feedchat-cli")]
#[command(about = "Terminal client for the feed platform's direct messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        /// Account email
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Backend base URL (stored for later commands)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current session status
    Status,

    /// List users known to the chat service
    Online,

    /// List recent conversations
    Conversations,

    /// Print message history with a peer
    History {
        /// Peer username
        peer: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Send a single message and exit
    Send {
        /// Peer username
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Show moderation send-eligibility
    CanChat,

    /// Open the interactive messaging session
    Connect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            email,
            password,
            server,
        } => {
            session::login(&email, password, server).await?;
        }
        Commands::Logout => {
            session::logout().await?;
        }
        Commands::Status => {
            session::status().await?;
        }
        Commands::Online => {
            api::online().await?;
        }
        Commands::Conversations => {
            api::conversations().await?;
        }
        Commands::History { peer, limit } => {
            api::history(&peer, limit).await?;
        }
        Commands::Send { to, message } => {
            channel::send_once(&to, &message).await?;
        }
        Commands::CanChat => {
            api::can_chat().await?;
        }
        Commands::Connect => {
            channel::connect_and_run().await?;
        }
    }

    Ok(())
}
