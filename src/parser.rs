//! Output parser for raw agent terminal output.
//!
//! Per read chunk:
//! - Strips ANSI escape sequences and stray control characters
//! - Drops fragments that are nothing but box-drawing decoration
//! - Detects interactive prompts (confirmations, input requests, pagers)

use crate::error::AgentError;
use crate::protocol::AgentConfig;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use tracing::debug;

static ANSI_PATTERN: OnceLock<Regex> = OnceLock::new();

fn ansi_pattern() -> &'static Regex {
    ANSI_PATTERN.get_or_init(|| {
        // OSC (terminated by BEL or ST), CSI, then two-byte escapes
        Regex::new(r"\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B\[[0-?]*[ -/]*[@-~]|\x1B[=>@-Z\\-_]")
            .unwrap()
    })
}

/// Strip ANSI escape sequences and control characters (except newline and tab)
pub fn strip_ansi(text: &str) -> String {
    ansi_pattern()
        .replace_all(text, "")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Result of parsing one chunk of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Output with escape sequences removed
    pub clean: String,
    /// Whether the chunk is decoration and must not be queued
    pub decorative: bool,
    /// Prompt line if the chunk ends in an interactive prompt
    pub prompt: Option<String>,
}

/// Output parser state. Immutable once built, so it can be shared with the
/// reader thread.
#[derive(Debug)]
pub struct OutputParser {
    prompt_patterns: Vec<Regex>,
    welcome_keywords: Vec<String>,
    mode_keywords: Vec<String>,
    ui_glyphs: Vec<String>,
    decorative_max_len: usize,
}

impl OutputParser {
    /// Create a new output parser from the agent's pattern tables
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let prompt_patterns = config
            .prompt_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AgentError::InvalidConfig(format!("prompt pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            prompt_patterns,
            welcome_keywords: lowercase(&config.welcome_keywords),
            mode_keywords: lowercase(&config.mode_keywords),
            ui_glyphs: config.ui_glyphs.clone(),
            decorative_max_len: config.decorative_max_len,
        })
    }

    /// Process a decoded chunk of raw terminal output
    pub fn process(&self, raw: &str) -> ParsedChunk {
        let clean = strip_ansi(raw);

        if self.is_decorative(&clean) {
            debug!("Filtered UI fragment: {:?}", clean);
            return ParsedChunk {
                clean,
                decorative: true,
                prompt: None,
            };
        }

        let prompt = self.detect_prompt(&clean);
        ParsedChunk {
            clean,
            decorative: false,
            prompt,
        }
    }

    /// Whether cleaned text is mostly-empty UI decoration.
    ///
    /// Welcome-screen and mode-switch keywords always win, however sparse the
    /// fragment is.
    pub fn is_decorative(&self, clean: &str) -> bool {
        let lower = clean.to_lowercase();
        if contains_any(&lower, &self.welcome_keywords) || contains_any(&lower, &self.mode_keywords)
        {
            return false;
        }

        let trimmed = clean.trim();
        if trimmed.is_empty() || trimmed.chars().count() > self.decorative_max_len {
            return false;
        }

        if self.ui_glyphs.iter().any(|g| g == trimmed) {
            return true;
        }

        // A short run of glyphs, possibly separated by whitespace
        trimmed.chars().all(|c| {
            c.is_whitespace() || self.ui_glyphs.iter().any(|g| g.chars().eq(std::iter::once(c)))
        })
    }

    /// Return the prompt line if the text ends with an interactive prompt
    pub fn detect_prompt(&self, clean: &str) -> Option<String> {
        let pattern = self.prompt_patterns.iter().find(|p| p.is_match(clean))?;
        debug!(pattern = %pattern.as_str(), "Prompt pattern matched");

        let line = clean
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_else(|| clean.trim());
        Some(line.to_string())
    }
}

fn lowercase(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}
