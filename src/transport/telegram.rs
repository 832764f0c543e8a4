//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates` (acknowledging each update through `offset`) and
//! sends replies with `sendMessage`, split to Telegram's length limit.

use super::{ChatTransport, InboundMessage};
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Telegram rejects messages longer than this
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds
const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

/// Bot API client bound to one bot token
pub struct TelegramTransport {
    client: Client,
    base_url: String,
    poll_timeout: u64,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(bot_token, "https://api.telegram.org")
    }

    /// Point the client at another API host (local Bot API server, tests)
    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
            poll_timeout: POLL_TIMEOUT_SECS,
        }
    }

    async fn send_part(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
        });

        debug!(chat_id, len = text.len(), "sendMessage");

        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<serde_json::Value> = resp.json().await?;
        if !api_resp.ok {
            let desc = api_resp.description.unwrap_or_default();
            warn!("sendMessage failed: {}", desc);
            return Err(TransportError::Api(desc));
        }
        Ok(())
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError> {
        let mut body = json!({
            "timeout": self.poll_timeout,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }

        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<Vec<Update>> = resp.json().await?;
        if !api_resp.ok {
            let desc = api_resp.description.unwrap_or_default();
            return Err(TransportError::Api(desc));
        }
        Ok(api_resp.result.unwrap_or_default())
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        let chat_id: i64 = user_id
            .trim()
            .parse()
            .map_err(|_| TransportError::InvalidRecipient(user_id.to_string()))?;

        for part in split_message(text, TELEGRAM_MAX_MESSAGE_CHARS) {
            self.send_part(chat_id, &part).await?;
        }
        Ok(())
    }

    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut offset: Option<i64> = None;
        let mut backoff_secs = 1u64;

        info!("Telegram poller started");

        loop {
            if *cancel.borrow() {
                info!("Telegram poller shutting down");
                return Ok(());
            }

            let updates = tokio::select! {
                result = self.get_updates(offset) => result,
                _ = cancel.changed() => {
                    info!("Telegram poller cancelled");
                    return Ok(());
                }
            };

            match updates {
                Ok(updates) => {
                    backoff_secs = 1;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let Some(msg) = into_inbound(update) else {
                            continue;
                        };
                        if inbound.send(msg).await.is_err() {
                            warn!("Inbound channel closed, stopping poller");
                            return Err(TransportError::Closed);
                        }
                    }
                }
                Err(e) => {
                    warn!(backoff_secs, "getUpdates failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                        _ = cancel.changed() => return Ok(()),
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }
}

/// Text messages with a known sender; everything else is skipped
fn into_inbound(update: Update) -> Option<InboundMessage> {
    let msg = update.message?;
    let text = msg.text?;
    let Some(from) = msg.from else {
        debug!(update_id = update.update_id, "Ignoring message without sender");
        return None;
    };
    Some(InboundMessage {
        sender_id: from.id.to_string(),
        text,
    })
}

/// Split `text` into parts of at most `max_chars` characters, preferring to
/// break after a newline
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let hard_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => hard_end,
        };
        parts.push(rest[..end].to_string());
        rest = &rest[end..];
    }

    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 4096), vec!["hello"]);
        assert_eq!(split_message("", 4096), vec![""]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let parts = split_message("aaaa\nbbbb\ncc", 7);
        assert_eq!(parts, vec!["aaaa\n", "bbbb\ncc"]);

        let parts = split_message("aaaa\nbbbb\ncccc", 6);
        assert_eq!(parts, vec!["aaaa\n", "bbbb\n", "cccc"]);
    }

    #[test]
    fn test_split_hard_cut_counts_chars() {
        let text = "é".repeat(10);
        let parts = split_message(&text, 4);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 4));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_deserialize_updates() {
        let json = r#"{
            "ok": true,
            "result": [
                {
                    "update_id": 10,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 123456, "is_bot": false, "first_name": "A"},
                        "chat": {"id": 123456, "type": "private"},
                        "date": 1700000000,
                        "text": "/status@my_bot"
                    }
                },
                {
                    "update_id": 11,
                    "message": {
                        "message_id": 2,
                        "chat": {"id": -100, "type": "channel"},
                        "date": 1700000001,
                        "text": "no sender"
                    }
                },
                {"update_id": 12}
            ]
        }"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(resp.ok);

        let inbound: Vec<_> = resp.result.unwrap().into_iter().filter_map(into_inbound).collect();
        assert_eq!(
            inbound,
            vec![InboundMessage {
                sender_id: "123456".to_string(),
                text: "/status@my_bot".to_string(),
            }]
        );
    }

    #[test]
    fn test_api_error_response() {
        let json = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));
    }

    #[tokio::test]
    async fn test_send_to_non_numeric_user_rejected() {
        let transport = TelegramTransport::with_base_url("token", "http://127.0.0.1:9");
        let err = transport.send_message("alice", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRecipient(u) if u == "alice"));
    }
}
