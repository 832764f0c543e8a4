//! UI-noise filter for the relay loop.
//!
//! Interactive CLIs redraw their whole frame on every keystroke. This filter
//! decides which output blocks are worth relaying: it drops exact repeats
//! (by fingerprint of the whitespace-normalized text) and blocks that are
//! mostly terminal chrome.

use crate::parser::strip_ansi;
use crate::protocol::{AgentConfig, FilterThresholds};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Why a block was not relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Nothing left after normalization
    Empty,
    /// Same fingerprint seen recently
    Duplicate,
    /// Redrawn UI frame without a genuine response in it
    RepetitiveUi,
    /// Short block dense with UI indicators
    DenseUi,
}

/// Outcome of [`NoiseFilter::evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Relay `text`; call [`NoiseFilter::remember`] with `fingerprint` once sent
    Relay { text: String, fingerprint: u64 },
    Suppress(SuppressReason),
}

/// Heuristic classifier with a bounded window of recent fingerprints
#[derive(Debug)]
pub struct NoiseFilter {
    ui_indicators: Vec<String>,
    response_markers: Vec<String>,
    repetitive_ui_markers: Vec<String>,
    thresholds: FilterThresholds,
    recent: VecDeque<u64>,
    window: usize,
}

impl NoiseFilter {
    pub fn new(config: &AgentConfig) -> Self {
        let window = config.dedup_window.max(1);
        Self {
            ui_indicators: config.ui_indicators.clone(),
            response_markers: config.response_markers.clone(),
            repetitive_ui_markers: config.repetitive_ui_markers.clone(),
            thresholds: config.filter.clone(),
            recent: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Classify one output block
    pub fn evaluate(&mut self, content: &str) -> FilterDecision {
        let text = normalize_lines(&strip_ansi(content));
        let trimmed_len = text.trim().chars().count();
        if trimmed_len == 0 {
            return FilterDecision::Suppress(SuppressReason::Empty);
        }

        let fingerprint = fingerprint(&text);
        if self.recent.contains(&fingerprint) {
            debug!("Suppressed duplicate output block");
            return FilterDecision::Suppress(SuppressReason::Duplicate);
        }

        let ui_score = self.ui_score(&text);
        let word_count = text.split_whitespace().count().max(1);
        let ui_ratio = ui_score as f64 / word_count as f64;
        let t = &self.thresholds;

        let is_response = contains_any(&text, &self.response_markers);
        let is_repetitive = ui_score >= 1 && contains_any(&text, &self.repetitive_ui_markers);
        let is_mostly_ui = ui_ratio > t.mostly_ui_ratio
            || (ui_score >= t.mostly_ui_min_score && trimmed_len <= t.mostly_ui_max_len);

        if is_repetitive && !is_response && is_mostly_ui {
            debug!(ui_score, ui_ratio, "Suppressed repetitive UI frame");
            // Remembered so exact redraws are caught as duplicates
            self.remember(fingerprint);
            return FilterDecision::Suppress(SuppressReason::RepetitiveUi);
        }

        if ui_score >= t.dense_ui_min_score && trimmed_len <= t.dense_ui_max_len {
            debug!(ui_score, "Suppressed dense UI block");
            if is_repetitive {
                self.remember(fingerprint);
            }
            return FilterDecision::Suppress(SuppressReason::DenseUi);
        }

        FilterDecision::Relay { text, fingerprint }
    }

    /// Record a fingerprint in the dedup window, evicting the oldest
    pub fn remember(&mut self, fingerprint: u64) {
        if self.recent.contains(&fingerprint) {
            return;
        }
        if self.recent.len() >= self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(fingerprint);
    }

    /// Number of configured UI indicators present in `text`
    pub fn ui_score(&self, text: &str) -> usize {
        self.ui_indicators
            .iter()
            .filter(|i| !i.is_empty() && text.contains(i.as_str()))
            .count()
    }
}

/// Trim every line, drop repeated lines and collapse blank runs
fn normalize_lines(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(line);
            }
        } else if seen.insert(line) {
            lines.push(line);
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Hash of the whitespace-normalized text
pub fn fingerprint(text: &str) -> u64 {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

fn contains_any(text: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && text.contains(n.as_str()))
}
