//! Error types for the agent bridge.

use thiserror::Error;

/// Errors raised by an agent process.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Spawn failed, or the child exited during the start grace period
    #[error("agent failed to start: {0}")]
    ProcessStartFailure(String),

    /// Write or dispatch attempted while the agent is stopped
    #[error("agent not running")]
    NotRunning,

    /// `start` called on an agent that is already running
    #[error("agent already running")]
    AlreadyRunning,

    /// Writing to the terminal failed
    #[error("failed to write to agent terminal: {0}")]
    WriteFailure(String),

    /// Agent configuration could not be compiled (bad pattern, empty command)
    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from a chat transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    Api(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}

/// Errors found while validating configuration, before anything is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("authorized user id must be numeric, got '{0}'")]
    InvalidUserId(String),

    #[error("unknown agent type: {0}")]
    UnknownAgent(String),

    #[error("unknown chat service: {0}")]
    UnknownTransport(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
