//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment (a `.env` file is
//! loaded first by the binary). [`Args::into_settings`] validates the whole
//! set before anything is spawned.

use crate::bridge::BridgeConfig;
use crate::error::ConfigError;
use crate::protocol::AgentConfig;
use crate::transport::TransportKind;
use crate::variants::AgentKind;
use clap::Parser;
use std::time::Duration;

/// Identity used for the console transport when none is configured
pub const CONSOLE_USER_ID: &str = "console";

/// Bridge an interactive CLI agent to a chat service
#[derive(Parser, Debug)]
#[command(name = "agent-chat-bridge")]
#[command(about = "Bridge an interactive CLI agent to a chat service")]
#[command(version)]
pub struct Args {
    /// Chat service (telegram, console)
    #[arg(long, env = "CHAT_SERVICE", default_value = "telegram")]
    pub chat_service: String,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// The only user allowed to drive the agent
    #[arg(long, env = "AUTHORIZED_USER_ID")]
    pub authorized_user_id: Option<String>,

    /// Agent variant (cline, codex-cli)
    #[arg(long, env = "AGENT_TYPE", default_value = "cline")]
    pub agent_type: String,

    /// Override the agent command line (whitespace separated)
    #[arg(long, env = "AGENT_COMMAND")]
    pub agent_command: Option<String>,

    /// Seconds to wait for a reply to a message (default depends on agent)
    #[arg(long, env = "COMMAND_TIMEOUT_SECS")]
    pub command_timeout_secs: Option<u64>,

    /// Minimum milliseconds between messages from the user
    #[arg(long, env = "RATE_LIMIT_MS", default_value = "500")]
    pub rate_limit_ms: u64,

    /// Longest accepted message, in characters
    #[arg(long, env = "MAX_MESSAGE_LENGTH", default_value = "10000")]
    pub max_message_length: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Transport with its credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSettings {
    Telegram { bot_token: String },
    Console,
}

impl TransportSettings {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSettings::Telegram { .. } => TransportKind::Telegram,
            TransportSettings::Console => TransportKind::Console,
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: TransportSettings,
    pub agent_kind: AgentKind,
    pub agent: AgentConfig,
    pub bridge: BridgeConfig,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let transport_kind: TransportKind = self.chat_service.parse()?;
        let agent_kind: AgentKind = self.agent_type.parse()?;

        let user_id = self
            .authorized_user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let (transport, user_id) = match transport_kind {
            TransportKind::Telegram => {
                let bot_token = self
                    .telegram_bot_token
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
                let user_id = user_id.ok_or(ConfigError::Missing("AUTHORIZED_USER_ID"))?;
                if user_id.parse::<i64>().is_err() {
                    return Err(ConfigError::InvalidUserId(user_id));
                }
                (TransportSettings::Telegram { bot_token }, user_id)
            }
            TransportKind::Console => (
                TransportSettings::Console,
                user_id.unwrap_or_else(|| CONSOLE_USER_ID.to_string()),
            ),
        };

        let mut agent = agent_kind.default_config();
        if let Some(command) = self.agent_command {
            let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if argv.is_empty() {
                return Err(ConfigError::Missing("AGENT_COMMAND"));
            }
            agent.command = argv;
        }
        if let Some(secs) = self.command_timeout_secs {
            agent.command_timeout = Duration::from_secs(secs);
        }
        for pattern in &agent.prompt_patterns {
            regex::Regex::new(pattern)?;
        }

        let mut bridge = BridgeConfig::new(user_id);
        bridge.rate_limit = Duration::from_millis(self.rate_limit_ms);
        bridge.max_message_length = self.max_message_length;

        Ok(Settings {
            transport,
            agent_kind,
            agent,
            bridge,
        })
    }
}
