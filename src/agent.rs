//! Agent processes driven through a PTY.
//!
//! [`AgentInterface`] is the capability set the bridge talks to.
//! [`PtyAgent`] implements it for interactive CLIs: it owns the PTY session,
//! a background reader thread that cleans and classifies output, the bounded
//! output queue, and the serialized write path.

use crate::error::AgentError;
use crate::parser::OutputParser;
use crate::protocol::{AgentConfig, Message};
use crate::pty::{Pty, ReadEvent};
use crate::queue::OutputQueue;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Enter key sent after every command
pub const LINE_TERMINATOR: &str = "\r";

/// Read buffer size for the reader thread
const READ_BUFFER_SIZE: usize = 4096;
/// Poll timeout for each read attempt
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Sleep between polls when nothing arrived
const IDLE_SLEEP: Duration = Duration::from_millis(50);
/// Sleep after a failed read
const ERROR_SLEEP: Duration = Duration::from_millis(100);
/// Consecutive read failures before the reader gives up
const MAX_READ_ERRORS: u32 = 10;
/// How long `stop` waits for the reader thread to notice
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Capability set of an agent, whether terminal-driven or otherwise
#[async_trait]
pub trait AgentInterface: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    fn config(&self) -> &AgentConfig;

    /// Maximum wait for a reply to a dispatched command
    fn command_timeout(&self) -> Duration {
        self.config().command_timeout
    }

    /// Start the agent session
    async fn start(&self) -> Result<(), AgentError>;

    /// Stop the agent session. Best effort, never fails.
    async fn stop(&self);

    /// Write one command line to the agent
    async fn send_command(&self, command: &str) -> Result<(), AgentError>;

    /// Drain pending output into one size-bounded message
    async fn get_output(&self) -> Option<Message>;

    /// Number of output fragments waiting to be drained
    fn pending_output(&self) -> usize;

    fn is_running(&self) -> bool;

    /// Whether the agent is blocked on an interactive prompt
    fn waiting_for_input(&self) -> bool;

    /// The prompt the agent is blocked on, if any
    fn input_prompt(&self) -> Option<String>;

    /// Agent-specific commands (command → description)
    fn custom_commands(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Extra help text shown by `/help`
    fn custom_help(&self) -> String {
        String::new()
    }

    /// Handle an agent-specific command. `None` means not handled.
    async fn handle_custom_command(&self, _command: &str, _args: &str) -> Option<String> {
        None
    }
}

/// Interactive prompt state, written by the reader thread and cleared by
/// `send_command`
#[derive(Debug, Default, Clone)]
pub struct PromptState {
    pub waiting_for_input: bool,
    pub input_prompt: String,
    pub last_prompt_at: Option<Instant>,
}

/// One PTY session, from `start` to `stop`
struct Session {
    pty: Arc<Pty>,
    stop_reading: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// State shared between the agent and its reader thread
struct Shared {
    name: String,
    parser: OutputParser,
    queue: OutputQueue,
    prompt: Mutex<PromptState>,
    running: AtomicBool,
}

impl Shared {
    fn prompt(&self) -> MutexGuard<'_, PromptState> {
        self.prompt.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clean, classify and enqueue one decoded chunk
    fn process_output(&self, raw: &str) {
        let chunk = self.parser.process(raw);
        if chunk.decorative {
            return;
        }

        if let Some(prompt) = chunk.prompt {
            info!(agent = %self.name, prompt = %prompt, "Interactive prompt detected");
            let mut state = self.prompt();
            state.waiting_for_input = true;
            state.input_prompt = prompt;
            state.last_prompt_at = Some(Instant::now());
        }

        self.queue.push(chunk.clean);
    }
}

/// PTY-backed CLI agent (Cline, Codex, ...)
pub struct PtyAgent {
    config: AgentConfig,
    shared: Arc<Shared>,
    /// Exclusive write lock; also guards the session lifecycle
    session: tokio::sync::Mutex<Option<Session>>,
}

impl PtyAgent {
    /// Create a stopped agent. Fails if a prompt pattern does not compile.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let parser = OutputParser::new(&config)?;
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            parser,
            queue: OutputQueue::new(config.queue_capacity),
            prompt: Mutex::new(PromptState::default()),
            running: AtomicBool::new(false),
        });

        Ok(Self {
            config,
            shared,
            session: tokio::sync::Mutex::new(None),
        })
    }

    /// Feed a decoded chunk through the output pipeline, exactly as the
    /// reader thread does for terminal output
    pub fn process_output(&self, raw: &str) {
        self.shared.process_output(raw);
    }

    /// Snapshot of the prompt state
    pub fn prompt_state(&self) -> PromptState {
        self.shared.prompt().clone()
    }

    /// PID of the running child
    pub async fn child_pid(&self) -> Option<i32> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.pty.child_pid().as_raw())
    }

    fn reader_loop(pty: Arc<Pty>, shared: Arc<Shared>, stop_reading: Arc<AtomicBool>) {
        info!("{} output reader started", shared.name);
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut error_count = 0;

        while !stop_reading.load(Ordering::SeqCst) && shared.running.load(Ordering::SeqCst) {
            match pty.read_timeout(&mut buf, POLL_TIMEOUT) {
                Ok(ReadEvent::Data(n)) => {
                    error_count = 0;
                    let output = String::from_utf8_lossy(&buf[..n]);
                    shared.process_output(&output);
                }
                Ok(ReadEvent::Idle) => std::thread::sleep(IDLE_SLEEP),
                Ok(ReadEvent::Eof) => {
                    warn!("EOF from {}", shared.name);
                    shared.running.store(false, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    if error_count > MAX_READ_ERRORS {
                        error!("{} too many read errors: {}", shared.name, e);
                        break;
                    }
                    std::thread::sleep(ERROR_SLEEP);
                }
            }
        }

        info!("{} output reader stopped", shared.name);
    }
}

#[async_trait]
impl AgentInterface for PtyAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn start(&self) -> Result<(), AgentError> {
        let mut session = self.session.lock().await;
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(AgentError::AlreadyRunning);
        }
        // Leftovers from a previous session (reader exited on its own)
        if let Some(old) = session.take() {
            old.stop_reading.store(true, Ordering::SeqCst);
            old.pty.terminate(Duration::ZERO);
        }

        let pty = Pty::spawn(
            &self.config.command,
            self.config.terminal_rows,
            self.config.terminal_cols,
        )
        .map_err(|e| {
            error!("Failed to start {}: {:#}", self.config.name, e);
            AgentError::ProcessStartFailure(format!("{e:#}"))
        })?;

        tokio::time::sleep(self.config.start_grace).await;
        if let Some(code) = pty.check_child() {
            error!("{} process died immediately (exit code {})", self.config.name, code);
            return Err(AgentError::ProcessStartFailure(format!(
                "{} process died immediately (exit code {})",
                self.config.name, code
            )));
        }

        self.shared.queue.clear();
        *self.shared.prompt() = PromptState::default();
        self.shared.running.store(true, Ordering::SeqCst);

        let pty = Arc::new(pty);
        let stop_reading = Arc::new(AtomicBool::new(false));
        let reader = {
            let pty = Arc::clone(&pty);
            let shared = Arc::clone(&self.shared);
            let stop_reading = Arc::clone(&stop_reading);
            std::thread::Builder::new()
                .name(format!("{}-reader", self.config.name))
                .spawn(move || Self::reader_loop(pty, shared, stop_reading))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                pty.terminate(self.config.stop_grace);
                return Err(AgentError::ProcessStartFailure(format!(
                    "failed to spawn reader thread: {e}"
                )));
            }
        };

        *session = Some(Session {
            pty,
            stop_reading,
            reader: Some(reader),
        });

        info!("{} session started", self.config.name);
        Ok(())
    }

    async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let taken = {
            let mut session = self.session.lock().await;
            // A start that held the lock may have set the flag again
            self.shared.running.store(false, Ordering::SeqCst);
            session.take()
        };
        let Some(mut session) = taken else {
            return;
        };
        session.stop_reading.store(true, Ordering::SeqCst);

        let pty = Arc::clone(&session.pty);
        let grace = self.config.stop_grace;
        let reader = session.reader.take();
        let stopped = tokio::task::spawn_blocking(move || {
            pty.terminate(grace);
            if let Some(reader) = reader {
                let start = Instant::now();
                while !reader.is_finished() && start.elapsed() < READER_JOIN_TIMEOUT {
                    std::thread::sleep(Duration::from_millis(10));
                }
                if reader.is_finished() {
                    let _ = reader.join();
                } else {
                    warn!("Reader thread did not exit in time, abandoning it");
                }
            }
        })
        .await;

        if let Err(e) = stopped {
            warn!("Error while stopping {}: {}", self.config.name, e);
        }
        info!("{} session stopped", self.config.name);
    }

    async fn send_command(&self, command: &str) -> Result<(), AgentError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return Err(AgentError::NotRunning);
        };
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(AgentError::NotRunning);
        }

        let line = format!("{command}{LINE_TERMINATOR}");

        // Clear and write under the prompt lock so the reader cannot slip a
        // stale prompt in between
        let mut prompt = self.shared.prompt();
        prompt.waiting_for_input = false;
        prompt.input_prompt.clear();

        session.pty.write_all(line.as_bytes()).map_err(|e| {
            error!("Failed to send command to {}: {}", self.config.name, e);
            AgentError::WriteFailure(e.to_string())
        })?;
        drop(prompt);

        debug!("Sent {} bytes to {}", line.len(), self.config.name);
        Ok(())
    }

    async fn get_output(&self) -> Option<Message> {
        let combined = self.shared.queue.drain_up_to(self.config.max_chunk_chars);
        let trimmed = combined.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Message::agent_output(trimmed, &self.config.name))
    }

    fn pending_output(&self) -> usize {
        self.shared.queue.len()
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn waiting_for_input(&self) -> bool {
        self.shared.prompt().waiting_for_input
    }

    fn input_prompt(&self) -> Option<String> {
        let state = self.shared.prompt();
        if state.waiting_for_input {
            Some(state.input_prompt.clone())
        } else {
            None
        }
    }
}

impl Drop for PtyAgent {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.stop_reading.store(true, Ordering::SeqCst);
        }
    }
}
