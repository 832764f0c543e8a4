//! Agent flavours and the factory that builds them from a configuration tag.

use crate::agent::{AgentInterface, PtyAgent};
use crate::error::{AgentError, ConfigError};
use crate::protocol::{AgentConfig, Message};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long a mode switch waits for the CLI to redraw
const MODE_SWITCH_WAIT: Duration = Duration::from_millis(1500);

/// Agent variant selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Cline,
    CodexCli,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Cline => "cline",
            AgentKind::CodexCli => "codex-cli",
        }
    }

    /// Default configuration for this variant
    pub fn default_config(&self) -> AgentConfig {
        match self {
            AgentKind::Cline => AgentConfig::cline(),
            AgentKind::CodexCli => AgentConfig::codex_cli(),
        }
    }
}

impl FromStr for AgentKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cline" => Ok(AgentKind::Cline),
            "codex" | "codex-cli" => Ok(AgentKind::CodexCli),
            other => Err(ConfigError::UnknownAgent(other.to_string())),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the agent for `kind` from `config`
pub fn create_agent(
    kind: AgentKind,
    config: AgentConfig,
) -> Result<Arc<dyn AgentInterface>, AgentError> {
    info!(kind = %kind, name = %config.name, "Creating agent");
    Ok(match kind {
        AgentKind::Cline => Arc::new(ClineAgent::new(config)?),
        AgentKind::CodexCli => Arc::new(PtyAgent::new(config)?),
    })
}

/// Cline CLI, with plan/act mode switching
pub struct ClineAgent {
    inner: PtyAgent,
}

impl ClineAgent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        Ok(Self {
            inner: PtyAgent::new(config)?,
        })
    }

    async fn switch_mode(&self, command: &str, title: &str) -> String {
        if let Err(e) = self.inner.send_command(command).await {
            return format!("❌ {e}");
        }
        tokio::time::sleep(MODE_SWITCH_WAIT.min(self.inner.command_timeout())).await;

        match self.inner.get_output().await {
            Some(output) => format!("{title}\n\n{}", output.content),
            None => title.to_string(),
        }
    }
}

#[async_trait]
impl AgentInterface for ClineAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn config(&self) -> &AgentConfig {
        self.inner.config()
    }

    async fn start(&self) -> Result<(), AgentError> {
        self.inner.start().await
    }

    async fn stop(&self) {
        self.inner.stop().await
    }

    async fn send_command(&self, command: &str) -> Result<(), AgentError> {
        self.inner.send_command(command).await
    }

    async fn get_output(&self) -> Option<Message> {
        self.inner.get_output().await
    }

    fn pending_output(&self) -> usize {
        self.inner.pending_output()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn waiting_for_input(&self) -> bool {
        self.inner.waiting_for_input()
    }

    fn input_prompt(&self) -> Option<String> {
        self.inner.input_prompt()
    }

    fn custom_commands(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("/plan".to_string(), "Switch to plan mode".to_string()),
            ("/act".to_string(), "Switch to act mode".to_string()),
        ])
    }

    fn custom_help(&self) -> String {
        [
            "Usage Examples:",
            "• Show me all Python files in this project",
            "• Explain what main.rs does",
            "• /plan, then describe a change to get a plan first",
            "",
            "Cline will execute commands and edit files in act mode.",
        ]
        .join("\n")
    }

    async fn handle_custom_command(&self, command: &str, _args: &str) -> Option<String> {
        match command {
            "/plan" => Some(self.switch_mode("/plan", "🧠 Switched to Plan Mode").await),
            "/act" => Some(self.switch_mode("/act", "⚡ Switched to Act Mode").await),
            _ => None,
        }
    }
}
