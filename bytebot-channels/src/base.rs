//! Chat platform abstraction shared by the relays

use async_trait::async_trait;
use bytebot_core::{Message, MessageReference, User};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Event surfaced by a platform session
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Session established; `user_id` is the bot's own identity
    Ready { user_id: String },
    /// A message was posted somewhere the bot can see
    MessageCreate(Message),
}

/// A chat platform session the gateway bridges to the bus
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Platform name, used in logs and hierarchical topics
    fn name(&self) -> &str;

    /// The bot's own user id, once known
    fn self_user_id(&self) -> Option<String>;

    /// Authenticate and record the bot's own identity
    async fn verify(&self) -> Result<User>;

    /// Drive the event session until cancelled or fatally failed
    ///
    /// Events are forwarded on `events`. Transient disconnects are handled
    /// internally; an `Err` means the session cannot continue.
    async fn run(
        &self,
        events: mpsc::Sender<PlatformEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Post a plain message to a channel
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<Message>;

    /// Post a threaded reply to the referenced message
    async fn send_reply(
        &self,
        channel_id: &str,
        content: &str,
        reference: &MessageReference,
        mention_author: bool,
    ) -> Result<Message>;
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel error: {0}")]
    Error(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),

    #[error(transparent)]
    Core(#[from] bytebot_core::Error),
}

impl ChannelError {
    /// Errors that end the session instead of triggering a reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::AuthError(_)
                | ChannelError::InvalidConfig(_)
                | ChannelError::NotConfigured(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Shared platform handle
pub type ChatPlatformPtr = Arc<dyn ChatPlatform>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ChannelError::AuthError("4004".into()).is_fatal());
        assert!(ChannelError::InvalidConfig("4014".into()).is_fatal());
        assert!(!ChannelError::ConnectionError("reset".into()).is_fatal());
        assert!(!ChannelError::ApiError("429".into()).is_fatal());
    }

    #[test]
    fn test_core_error_converts() {
        let err: ChannelError = bytebot_core::Error::Bus("down".into()).into();
        assert_eq!(err.to_string(), "Bus error: down");
    }
}
