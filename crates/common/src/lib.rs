//! Types and utilities shared across the gateway crates: the channel
//! grammar, the closed message-type enum, principal identity, config, and
//! error envelopes.

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod tracing_setup;

pub use auth::{AgentAccessResolver, AuthContext, NoAgentAccess};
pub use channel::{Channel, ChannelParseError, ChannelScope};
pub use config::GatewayConfig;
pub use error::{ApiErrorBody, ApiErrorEnvelope, ConfigError};
pub use message::{HubMessage, MessageMetadata, MessageType};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
