//! The chat bridge: one authorized user, one agent, one transport.
//!
//! Inbound messages pass through, in order: authorization, command routing,
//! size check, rate check, dispatch. Agent output that nobody asked for is
//! forwarded by a background relay loop through the noise filter.

use crate::agent::AgentInterface;
use crate::dispatch::{CommandDispatcher, DispatchOptions};
use crate::error::AgentError;
use crate::filter::{FilterDecision, NoiseFilter};
use crate::rate_limit::RateLimiter;
use crate::transport::ChatTransport;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handler for a bridge-level custom command. Receives the agent and the
/// command's arguments; `None` falls through to the agent's own commands.
pub type CommandHandler =
    Arc<dyn Fn(Arc<dyn AgentInterface>, String) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Wrap an async closure as a [`CommandHandler`]
pub fn command_handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(Arc<dyn AgentInterface>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    Arc::new(
        move |agent: Arc<dyn AgentInterface>, args: String| -> BoxFuture<'static, Option<String>> {
            Box::pin(f(agent, args))
        },
    )
}

pub const NOTICE_UNAUTHORIZED: &str = "❌ Unauthorized";
pub const NOTICE_ALREADY_RUNNING: &str = "ℹ️ Agent already running";
pub const NOTICE_STOPPED: &str = "🛑 Agent stopped";
pub const NOTICE_RATE_LIMITED: &str = "⏳ Please wait before sending another message";
pub const NOTICE_NOT_RUNNING: &str = "❌ Agent not running. Use /start";
pub const NOTICE_SENT: &str = "📤 Message sent...";
pub const NOTICE_NO_OUTPUT: &str = "(no output)";
pub const STARTUP_NOTICE: &str = "🤖 Agent-Chat Bridge Started\n\nUse /start to begin an agent session";

const STARTED_USAGE: &str = "✅ Agent started\n\n\
Commands:\n\
• Natural language: show me the current directory\n\
• CLI commands: git status, ls\n\
• /stop - Stop agent\n\
• /status - Check status\n\
• /help - Show help";

/// Bridge policy
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The only sender whose messages are processed
    pub authorized_user_id: String,
    /// Longest accepted free-text message, in characters
    pub max_message_length: usize,
    /// Minimum interval between accepted free-text messages, and between
    /// relayed output messages
    pub rate_limit: Duration,
    /// Pause between relay loop iterations
    pub relay_interval: Duration,
    pub dispatch: DispatchOptions,
}

impl BridgeConfig {
    pub fn new(authorized_user_id: impl Into<String>) -> Self {
        Self {
            authorized_user_id: authorized_user_id.into(),
            max_message_length: 10_000,
            rate_limit: Duration::from_millis(500),
            relay_interval: Duration::from_secs(2),
            dispatch: DispatchOptions::default(),
        }
    }
}

pub struct AgentChatBridge {
    agent: Arc<dyn AgentInterface>,
    transport: Arc<dyn ChatTransport>,
    config: BridgeConfig,
    dispatcher: CommandDispatcher,
    rate_limiter: Mutex<RateLimiter>,
    commands: RwLock<HashMap<String, CommandHandler>>,
    relay: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    relay_starts: AtomicUsize,
}

impl AgentChatBridge {
    pub fn new(
        agent: Arc<dyn AgentInterface>,
        transport: Arc<dyn ChatTransport>,
        config: BridgeConfig,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(Arc::clone(&agent), config.dispatch.clone());
        let rate_limiter = Mutex::new(RateLimiter::new(config.rate_limit));
        Self {
            agent,
            transport,
            config,
            dispatcher,
            rate_limiter,
            commands: RwLock::new(HashMap::new()),
            relay: tokio::sync::Mutex::new(None),
            relay_starts: AtomicUsize::new(0),
        }
    }

    pub fn agent(&self) -> &Arc<dyn AgentInterface> {
        &self.agent
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Register a bridge-level command (e.g. "/deploy"). Consulted before
    /// the agent's own custom commands.
    pub fn register_command(&self, name: impl Into<String>, handler: CommandHandler) {
        let name = name.into();
        debug!(command = %name, "Registered custom command");
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, handler);
    }

    /// Number of times the relay loop has been launched
    pub fn relay_starts(&self) -> usize {
        self.relay_starts.load(Ordering::SeqCst)
    }

    /// Whether a relay loop is currently alive
    pub async fn relay_active(&self) -> bool {
        self.relay
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Send the startup notice to the authorized user
    pub async fn announce(&self) {
        self.reply(&self.config.authorized_user_id, STARTUP_NOTICE).await;
    }

    /// Handle one inbound message end to end. Every outcome is reported to
    /// the sender as a text notice.
    pub async fn process_message(&self, text: &str, sender_id: &str) {
        if sender_id != self.config.authorized_user_id {
            warn!(sender = %sender_id, "Rejected message from unauthorized user");
            self.reply(sender_id, NOTICE_UNAUTHORIZED).await;
            return;
        }

        let trimmed = text.trim();
        if trimmed.starts_with('/') {
            let (command, args) = split_command(trimmed);
            if let Some(reply) = self.route_command(command, args).await {
                self.reply(sender_id, &reply).await;
                return;
            }
        }

        let length = text.chars().count();
        if length > self.config.max_message_length {
            debug!(length, "Rejected oversized message");
            let notice = format!(
                "❌ Message too long (max {} characters)",
                self.config.max_message_length
            );
            self.reply(sender_id, &notice).await;
            return;
        }

        let allowed = self
            .rate_limiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check(sender_id);
        if allowed.is_err() {
            self.reply(sender_id, NOTICE_RATE_LIMITED).await;
            return;
        }

        if !self.agent.is_running() {
            self.reply(sender_id, NOTICE_NOT_RUNNING).await;
            return;
        }

        self.reply(sender_id, NOTICE_SENT).await;

        let result = self
            .dispatcher
            .dispatch(trimmed, self.agent.command_timeout())
            .await;
        let reply = if result.is_error() {
            format!("❌ {}", result.content)
        } else if result.content.trim().is_empty() {
            NOTICE_NO_OUTPUT.to_string()
        } else {
            result.content
        };
        self.reply(sender_id, &reply).await;
    }

    /// Reply text for a recognized command, or `None` to treat the text as
    /// free text for the agent
    async fn route_command(&self, command: &str, args: &str) -> Option<String> {
        match command {
            "/start" => return Some(self.start_agent().await),
            "/stop" => {
                self.agent.stop().await;
                return Some(NOTICE_STOPPED.to_string());
            }
            "/status" => return Some(self.status_text()),
            "/help" => return Some(self.help_text()),
            _ => {}
        }

        let handler = self
            .commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(command)
            .cloned();
        if let Some(handler) = handler {
            if let Some(reply) = handler(Arc::clone(&self.agent), args.to_string()).await {
                return Some(reply);
            }
        }

        if self.agent.custom_commands().contains_key(command) {
            return self.agent.handle_custom_command(command, args).await;
        }
        None
    }

    async fn start_agent(&self) -> String {
        if self.agent.is_running() {
            return NOTICE_ALREADY_RUNNING.to_string();
        }

        match self.agent.start().await {
            Ok(()) => {
                info!(agent = %self.agent.name(), "Agent started");
                self.ensure_relay().await;
                STARTED_USAGE.to_string()
            }
            Err(AgentError::AlreadyRunning) => NOTICE_ALREADY_RUNNING.to_string(),
            Err(e) => {
                warn!(agent = %self.agent.name(), "Agent failed to start: {}", e);
                format!("❌ Failed to start agent: {}", e)
            }
        }
    }

    fn status_text(&self) -> String {
        let running = self.agent.is_running();
        let state = if running { "🟢 Running" } else { "🔴 Stopped" };
        let mut text = format!("Status: {}\nAgent: {}", state, self.agent.name());
        if running {
            if let Some(prompt) = self.agent.input_prompt() {
                text.push_str(&format!("\n⏸️ Waiting for input: {}", prompt));
            }
        }
        text
    }

    fn help_text(&self) -> String {
        let mut text = String::from(
            "🤖 Agent-Chat Bridge\n\n\
             Commands:\n\
             /start - Start agent\n\
             /stop - Stop agent\n\
             /status - Check status\n\
             /help - Show this help",
        );

        let mut bridge_commands: Vec<String> = self
            .commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        bridge_commands.sort();
        for name in bridge_commands {
            text.push_str(&format!("\n{}", name));
        }

        let custom = self.agent.custom_commands();
        if !custom.is_empty() {
            text.push_str(&format!("\n\n{} commands:", self.agent.name()));
            for (name, description) in custom {
                text.push_str(&format!("\n{} - {}", name, description));
            }
        }

        let extra = self.agent.custom_help();
        if !extra.is_empty() {
            text.push_str("\n\n");
            text.push_str(&extra);
        }
        text
    }

    /// Launch the relay loop unless one is already alive
    async fn ensure_relay(&self) {
        let mut relay = self.relay.lock().await;
        if relay.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Relay loop already running");
            return;
        }

        self.relay_starts.fetch_add(1, Ordering::SeqCst);
        *relay = Some(tokio::spawn(relay_loop(
            Arc::clone(&self.agent),
            Arc::clone(&self.transport),
            self.config.authorized_user_id.clone(),
            self.config.relay_interval,
            self.config.rate_limit,
        )));
    }

    /// Stop the agent and wait for the relay loop to wind down
    pub async fn shutdown(&self) {
        self.agent.stop().await;
        if let Some(handle) = self.relay.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn reply(&self, user_id: &str, text: &str) {
        if let Err(e) = self.transport.send_message(user_id, text).await {
            warn!(user = %user_id, "Failed to deliver message: {}", e);
        }
    }
}

/// Forward unsolicited agent output until the agent stops, then flush
/// whatever the agent printed before it went away
async fn relay_loop(
    agent: Arc<dyn AgentInterface>,
    transport: Arc<dyn ChatTransport>,
    user_id: String,
    interval: Duration,
    min_send_interval: Duration,
) {
    info!(agent = %agent.name(), "Relay loop started");
    let mut relay = Relay {
        transport,
        user_id,
        filter: NoiseFilter::new(agent.config()),
        limiter: RateLimiter::new(min_send_interval),
    };

    while agent.is_running() {
        if let Some(output) = agent.get_output().await {
            relay.forward(&output.content).await;
        }
        tokio::time::sleep(interval).await;
    }

    while let Some(output) = agent.get_output().await {
        relay.forward(&output.content).await;
    }

    info!(agent = %agent.name(), "Relay loop stopped");
}

/// Outbound side of the relay loop
struct Relay {
    transport: Arc<dyn ChatTransport>,
    user_id: String,
    filter: NoiseFilter,
    limiter: RateLimiter,
}

impl Relay {
    async fn forward(&mut self, content: &str) {
        let (text, fingerprint) = match self.filter.evaluate(content) {
            FilterDecision::Relay { text, fingerprint } => (text, fingerprint),
            FilterDecision::Suppress(reason) => {
                debug!(?reason, "Suppressed agent output");
                return;
            }
        };

        if let Err(wait) = self.limiter.check(&self.user_id) {
            tokio::time::sleep(wait).await;
            self.limiter.record(&self.user_id);
        }
        info!(len = text.len(), "Relaying agent output");
        if let Err(e) = self.transport.send_message(&self.user_id, &text).await {
            warn!("Failed to relay output: {}", e);
        }
        self.filter.remember(fingerprint);
    }
}

/// Split "/cmd@bot args" into ("/cmd", "args")
fn split_command(text: &str) -> (&str, &str) {
    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (text, ""),
    };
    let command = head.split_once('@').map_or(head, |(cmd, _)| cmd);
    (command, args)
}
