//! agent-chat-bridge: drive an interactive CLI agent from a chat service.
//!
//! The agent runs inside a PTY. Its output is cleaned of terminal escapes,
//! classified (decoration, interactive prompts) and queued; the bridge turns
//! chat messages into terminal input and relays filtered output back.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod parser;
pub mod protocol;
pub mod pty;
pub mod queue;
pub mod rate_limit;
pub mod transport;
pub mod variants;

pub use agent::{AgentInterface, PtyAgent};
pub use bridge::{command_handler, AgentChatBridge, BridgeConfig, CommandHandler};
pub use dispatch::{CommandDispatcher, DispatchOptions};
pub use error::{AgentError, ConfigError, TransportError};
pub use filter::NoiseFilter;
pub use protocol::{AgentConfig, Message, MessageKind};
pub use rate_limit::RateLimiter;
pub use transport::{ChatTransport, InboundMessage};
pub use variants::{create_agent, AgentKind};
