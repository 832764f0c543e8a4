//! Chat transports the bridge can be driven through.
//!
//! A [`ChatTransport`] delivers text to a user and feeds inbound messages
//! into a channel until cancelled. User identities are opaque strings; the
//! bridge only compares them.

mod console;
mod telegram;

pub use console::ConsoleTransport;
pub use telegram::{split_message, TelegramTransport, TELEGRAM_MAX_MESSAGE_CHARS};

use crate::error::{ConfigError, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, watch};

/// One message received from the chat service. Replies go to the sender's
/// private chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: text.into(),
        }
    }
}

/// Capability set of a chat service
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `text` to `user_id`
    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError>;

    /// Receive messages into `inbound` until `cancel` fires or the source ends
    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), TransportError>;
}

/// Transport selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Telegram,
    Console,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telegram" => Ok(TransportKind::Telegram),
            "console" => Ok(TransportKind::Console),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Telegram => f.write_str("telegram"),
            TransportKind::Console => f.write_str("console"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("Telegram".parse::<TransportKind>().unwrap(), TransportKind::Telegram);
        assert_eq!("console".parse::<TransportKind>().unwrap(), TransportKind::Console);
        assert!(matches!(
            "discord".parse::<TransportKind>(),
            Err(ConfigError::UnknownTransport(s)) if s == "discord"
        ));
    }

    #[test]
    fn test_inbound_message_new() {
        let msg = InboundMessage::new("42", "/status");
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.text, "/status");
    }
}
