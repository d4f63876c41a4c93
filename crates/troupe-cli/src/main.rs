use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;

use config::TroupeConfig;
use console::ConsoleChat;

use troupe_core::{PersonaId, RoomId};
use troupe_gateway::{ChatClient, Gateway, InboundRequest, LlmBus, OutboundReply, ReplyPublisher};
use troupe_hub::{ActorSystem, ConversationManager, Router};

#[derive(Parser)]
#[command(name = "troupe")]
#[command(version)]
#[command(about = "troupe — a multi-agent chat hub")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub with a console chat client
    Start {
        /// Attach an echo responder to the LLM bus (no model backend needed)
        #[arg(long)]
        echo: bool,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Config => cmd_config(&cli.config),
        Commands::Start { echo } => cmd_start(&cli.config, echo).await,
    }
}

fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        std::fs::write(&config_path, default_config)?;
        info!("Created default config at {}", config_path.display());
    }

    println!("troupe initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your personas and gateway.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = TroupeConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>, echo: bool) -> Result<()> {
    let cfg = TroupeConfig::load(config_path)?;
    let roster = cfg.roster()?;
    info!(
        "Starting troupe hub with {} personas (coordinator: {})",
        roster.len(),
        roster.coordinator()
    );

    let rooms: Vec<RoomId> = cfg
        .gateway
        .rooms
        .iter()
        .map(|r| RoomId::new(r.as_str()))
        .collect();
    let console_room = rooms
        .first()
        .cloned()
        .unwrap_or_else(|| RoomId::new("console"));

    let system = Arc::new(ActorSystem::new());
    let conversations = Arc::new(ConversationManager::new(Duration::from_secs(
        cfg.gateway.idle_timeout_secs,
    )));
    let router = Arc::new(Router::new(
        system.clone(),
        conversations.clone(),
        roster.coordinator().clone(),
    ));

    let bus = LlmBus::new(cfg.gateway.bus_capacity);
    let requests = bus.requests();
    let replies = bus.replies();
    let (request_rx, reply_rx) = bus.split();

    let chat = Arc::new(ConsoleChat::new(console_room, &roster));

    let gateway = Arc::new(
        Gateway::new(
            chat.clone(),
            roster,
            system,
            conversations,
            router,
            requests,
        )
        .with_rooms(rooms)
        .with_mailbox_capacity(cfg.gateway.mailbox_capacity)
        .with_history_window(cfg.gateway.history_window)
        .with_send_timeout(Duration::from_secs(cfg.gateway.send_timeout_secs)),
    );

    let (events_tx, events_rx) = mpsc::channel(64);
    chat.start(events_tx).await?;
    gateway.start().await?;

    if echo {
        info!("Echo responder attached to the LLM bus");
        tokio::spawn(run_echo(request_rx, replies));
    } else {
        warn!("No model backend attached; requests will be drained and logged");
        tokio::spawn(drain_requests(request_rx));
    }

    let cancel = CancellationToken::new();
    let run_handle = {
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            gateway.run(events_rx, reply_rx, cancel).await;
        })
    };

    println!("Type a message (mention personas with @name); Ctrl-C to quit.");
    signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    let _ = run_handle.await;

    Ok(())
}

/// Minimal stand-in for a model backend: answer every persona request with
/// an echo of its content.
async fn run_echo(mut requests: mpsc::Receiver<InboundRequest>, replies: ReplyPublisher) {
    while let Some(req) = requests.recv().await {
        let Some(agent) = req.metadata.get("agent") else {
            continue;
        };
        let reply = OutboundReply {
            room: req.room.clone(),
            persona: PersonaId::new(agent.as_str()),
            content: format!("echoing: {}", req.content),
        };
        if replies.publish(reply).await.is_err() {
            break;
        }
    }
}

async fn drain_requests(mut requests: mpsc::Receiver<InboundRequest>) {
    while let Some(req) = requests.recv().await {
        info!(
            "Dropped model request (session: {}, {} chars)",
            req.session_key,
            req.content.len()
        );
    }
}
