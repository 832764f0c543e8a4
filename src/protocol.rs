//! Shared types for the agent bridge.
//!
//! Defines the message envelope passed across every boundary (process to
//! bridge, bridge to transport) and the static per-agent configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Kind of a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserInput,
    AgentOutput,
    Command,
    Error,
    ToolCall,
    ToolResult,
}

/// Immutable message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub content: String,
    pub sender: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageKind, content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            sender: sender.into(),
            timestamp_ms: current_timestamp_ms(),
            metadata: Map::new(),
        }
    }

    pub fn agent_output(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::new(MessageKind::AgentOutput, content, sender)
    }

    pub fn error(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, content, sender)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

/// Thresholds for the UI-noise heuristic in [`crate::filter::NoiseFilter`].
///
/// These were tuned against one CLI's rendering; re-validate them against the
/// target agent before relying on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterThresholds {
    /// UI indicators per word above which a block is mostly UI
    pub mostly_ui_ratio: f64,
    /// Indicator count that makes a short block mostly UI
    pub mostly_ui_min_score: usize,
    /// Length (chars) under which `mostly_ui_min_score` applies
    pub mostly_ui_max_len: usize,
    /// Indicator count that suppresses a short block outright
    pub dense_ui_min_score: usize,
    /// Length (chars) under which `dense_ui_min_score` applies
    pub dense_ui_max_len: usize,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            mostly_ui_ratio: 0.3,
            mostly_ui_min_score: 2,
            mostly_ui_max_len: 100,
            dense_ui_min_score: 3,
            dense_ui_max_len: 50,
        }
    }
}

/// Static configuration for one agent process. Never mutated after the
/// agent is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Command to run (e.g., ["cline"])
    pub command: Vec<String>,
    /// Display name
    pub name: String,
    /// Lowercase keywords marking a welcome screen (never filtered)
    pub welcome_keywords: Vec<String>,
    /// Lowercase keywords marking a mode switch (never filtered)
    pub mode_keywords: Vec<String>,
    /// Substrings counted as UI chrome by the noise filter
    pub ui_indicators: Vec<String>,
    /// Substrings marking a genuine response
    pub response_markers: Vec<String>,
    /// Substrings marking a UI frame that is redrawn repeatedly
    pub repetitive_ui_markers: Vec<String>,
    /// Glyphs a fragment may consist of and still be dropped as decoration
    pub ui_glyphs: Vec<String>,
    /// Maximum trimmed length of a decorative fragment
    pub decorative_max_len: usize,
    /// Interactive prompt regexes, matched case-insensitively in order
    pub prompt_patterns: Vec<String>,
    pub filter: FilterThresholds,
    /// Number of recent fingerprints remembered by the noise filter
    pub dedup_window: usize,
    /// Capacity of the output queue (oldest fragments are dropped)
    pub queue_capacity: usize,
    /// Soft cap on the size of one output chunk, in characters
    pub max_chunk_chars: usize,
    /// Maximum wait for a reply to a dispatched command
    pub command_timeout: Duration,
    /// Delay after spawn before checking the child is still alive
    pub start_grace: Duration,
    /// Delay between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
    pub terminal_rows: u16,
    pub terminal_cols: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            name: "Agent".to_string(),
            welcome_keywords: vec![],
            mode_keywords: vec![],
            ui_indicators: vec![],
            response_markers: vec![],
            repetitive_ui_markers: vec![],
            ui_glyphs: ["╭", "╰", "│", "┃", "╮", "╯"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            decorative_max_len: 3,
            prompt_patterns: default_prompt_patterns(),
            filter: FilterThresholds::default(),
            dedup_window: 10,
            queue_capacity: 100,
            max_chunk_chars: 4000,
            command_timeout: Duration::from_secs(30),
            start_grace: Duration::from_millis(500),
            stop_grace: Duration::from_millis(500),
            terminal_rows: 24,
            terminal_cols: 80,
        }
    }
}

impl AgentConfig {
    /// Configuration for an arbitrary command with default patterns
    pub fn for_command(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            command,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Preset for the Cline CLI
    pub fn cline() -> Self {
        Self {
            command: vec!["cline".to_string()],
            name: "Cline".to_string(),
            welcome_keywords: strings(&["cline cli"]),
            mode_keywords: strings(&["switch to plan", "switch to act", "plan mode", "act mode"]),
            ui_indicators: strings(&["╭", "╰", "│", "┃", "/plan or /act"]),
            response_markers: strings(&["###"]),
            repetitive_ui_markers: strings(&["/plan or /act"]),
            command_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Preset for the Codex CLI
    pub fn codex_cli() -> Self {
        Self {
            command: vec!["codex".to_string()],
            name: "Codex CLI".to_string(),
            ui_indicators: strings(&["╭", "╰", "│", "┃"]),
            command_timeout: Duration::from_secs(45),
            ..Self::default()
        }
    }
}

/// Prompt patterns for confirmations, input requests and pagers
pub fn default_prompt_patterns() -> Vec<String> {
    strings(&[
        r"\[y/N\]\s*$",
        r"\[Y/n\]\s*$",
        r"\(y/n\)\s*$",
        r"Continue\?\s*$",
        r"Proceed\?\s*$",
        r"Are you sure\?\s*$",
        r"Enter .*:\s*$",
        r"Password:\s*$",
        r"Press.*Enter.*to.*continue\s*$",
        r"Press.*any.*key\s*$",
        r"\[[^\[\]\s]+\]\s*$",
        r"Press .*to exit\s*$",
        r"Press .* to return\s*$",
    ])
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_serialization() {
        let msg = Message::agent_output("hello", "Cline");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"agent_output\""));
        assert!(!json.contains("metadata"));

        let kind: MessageKind = serde_json::from_str("\"tool_result\"").unwrap();
        assert_eq!(kind, MessageKind::ToolResult);
    }

    #[test]
    fn test_message_metadata() {
        let msg = Message::new(MessageKind::Command, "/start", "user456")
            .with_metadata("chat", Value::from("telegram"));
        assert_eq!(msg.metadata["chat"], "telegram");
        assert!(Message::new(MessageKind::Command, "/stop", "u").metadata.is_empty());
    }

    #[test]
    fn test_cline_preset() {
        let config = AgentConfig::cline();
        assert_eq!(config.command, vec!["cline"]);
        assert_eq!(config.welcome_keywords, vec!["cline cli"]);
        assert_eq!(config.mode_keywords.len(), 4);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.queue_capacity, 100);
    }
}
