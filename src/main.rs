//! agent-chat-bridge: drive an interactive CLI agent from a chat service
//!
//! Runs the agent CLI in a PTY, receives messages from Telegram (or the
//! local console) and relays the agent's output back.
//!
//! Usage:
//!   TELEGRAM_BOT_TOKEN=... AUTHORIZED_USER_ID=... agent-chat-bridge
//!   agent-chat-bridge --chat-service console --agent-type codex-cli

use agent_chat_bridge::config::{Args, TransportSettings};
use agent_chat_bridge::transport::{ConsoleTransport, InboundMessage, TelegramTransport};
use agent_chat_bridge::{create_agent, AgentChatBridge, ChatTransport};
use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::sync::Arc;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!("agent-chat-bridge v{}", env!("CARGO_PKG_VERSION"));

    let settings = args.into_settings().context("Invalid configuration")?;
    info!("Agent: {} ({:?})", settings.agent.name, settings.agent.command);
    info!("Chat service: {}", settings.transport.kind());

    let agent = create_agent(settings.agent_kind, settings.agent.clone())
        .context("Failed to create agent")?;

    let transport: Arc<dyn ChatTransport> = match &settings.transport {
        TransportSettings::Telegram { bot_token } => Arc::new(TelegramTransport::new(bot_token)),
        TransportSettings::Console => Arc::new(ConsoleTransport::new(
            settings.bridge.authorized_user_id.clone(),
        )),
    };

    let bridge = Arc::new(AgentChatBridge::new(
        agent,
        Arc::clone(&transport),
        settings.bridge.clone(),
    ));

    // Start transport
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let transport_handle = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = transport.run(inbound_tx, cancel_rx).await {
                error!("Transport error: {}", e);
            }
        })
    };

    bridge.announce().await;

    // Set up signal handlers
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        select! {
            _ = sigint.recv() => {
                info!("SIGINT received");
                break;
            }

            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }

            msg = inbound_rx.recv() => {
                let Some(msg) = msg else {
                    info!("Transport closed");
                    break;
                };
                debug!(sender = %msg.sender_id, "Inbound message");
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    bridge.process_message(&msg.text, &msg.sender_id).await;
                });
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    bridge.shutdown().await;

    let _ = cancel_tx.send(true);
    transport_handle.abort();

    info!("Goodbye!");
    Ok(())
}
