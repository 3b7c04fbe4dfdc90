//! Chat platform integration for the bytebot gateway
//!
//! This crate holds the [`ChatPlatform`] abstraction and its Discord
//! implementation, the inbound and outbound relays that move messages
//! between the platform and the bus, and the [`Supervisor`] that wires
//! them together.

pub mod base;
pub mod discord;
pub mod relay;
pub mod supervisor;

pub use base::{ChannelError, ChatPlatform, ChatPlatformPtr, PlatformEvent, Result};
pub use discord::DiscordClient;
pub use relay::{InboundOutcome, InboundRelay, OutboundOutcome, OutboundRelay, RelayState};
pub use supervisor::{RetryPolicy, Supervisor};
