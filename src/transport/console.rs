//! Local terminal transport: stdin lines in, stdout out.

use super::{ChatTransport, InboundMessage};
use crate::error::TransportError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

/// Reads one message per stdin line, attributed to a fixed identity
pub struct ConsoleTransport {
    user_id: String,
    stdout: Mutex<tokio::io::Stdout>,
}

impl ConsoleTransport {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        debug!(user_id, "Console reply");
        let mut out = self.stdout.lock().await;
        out.write_all(format_reply(text).as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }

    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Console transport reading stdin");

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = cancel.changed() => return Ok(()),
            };

            let Some(line) = line else {
                info!("stdin closed");
                return Ok(());
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let msg = InboundMessage::new(self.user_id.clone(), text);
            if inbound.send(msg).await.is_err() {
                return Err(TransportError::Closed);
            }
        }
    }
}

fn format_reply(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}
