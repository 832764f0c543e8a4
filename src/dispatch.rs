//! Synchronous "send and collect reply" on top of an agent.
//!
//! Write and read are not atomic with respect to the reader thread or the
//! relay loop: a dispatch captures what the agent produced within the wait
//! window, best effort. Long-running commands need repeated `get_output`.

use crate::agent::AgentInterface;
use crate::protocol::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Wait-window tuning for [`CommandDispatcher`]
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// How often the queue is checked while waiting
    pub poll_interval: Duration,
    /// Once output has arrived, stop waiting after this long without change
    pub quiet_period: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            quiet_period: Duration::from_millis(500),
        }
    }
}

/// Serializes writes to an agent and collects the next chunk of output
pub struct CommandDispatcher {
    agent: Arc<dyn AgentInterface>,
    options: DispatchOptions,
}

impl CommandDispatcher {
    pub fn new(agent: Arc<dyn AgentInterface>, options: DispatchOptions) -> Self {
        Self { agent, options }
    }

    /// Send `command`, wait at most `timeout` for output to accumulate, then
    /// drain once.
    ///
    /// Returns an `Error` message if the write failed, and an `AgentOutput`
    /// message (possibly with empty content) otherwise.
    pub async fn dispatch(&self, command: &str, timeout: Duration) -> Message {
        if let Err(e) = self.agent.send_command(command).await {
            warn!("Dispatch to {} failed: {}", self.agent.name(), e);
            return Message::error(e.to_string(), self.agent.name());
        }

        self.wait_for_output(timeout).await;

        match self.agent.get_output().await {
            Some(output) => output,
            None => {
                debug!("No output from {} within {:?}", self.agent.name(), timeout);
                Message::agent_output("", self.agent.name())
            }
        }
    }

    /// Block until the deadline, or until output has arrived and settled
    async fn wait_for_output(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut last_pending = self.agent.pending_output();
        let mut changed_at = Instant::now();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;

            let pending = self.agent.pending_output();
            if pending != last_pending {
                last_pending = pending;
                changed_at = Instant::now();
            } else if pending > 0 && changed_at.elapsed() >= self.options.quiet_period {
                return;
            }
        }
    }
}
