//! Inbound relay: platform events to bus envelopes

use super::{RelayState, StateCell};
use crate::base::{ChatPlatformPtr, PlatformEvent};
use bytebot_core::bus::MessageBus;
use bytebot_core::topic::TopicNamer;
use bytebot_core::{Envelope, Message};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Result of relaying one platform message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Wrapped and published
    Published { topic: String, id: Uuid },
    /// Authored by the gateway's own account
    SelfMessage,
    /// Encoding or publishing failed; the event is gone
    Dropped,
}

/// Wraps platform messages in envelopes and publishes them to the bus
pub struct InboundRelay {
    identity: String,
    bus: Arc<dyn MessageBus>,
    platform: ChatPlatformPtr,
    topics: TopicNamer,
    state: StateCell,
}

impl InboundRelay {
    pub fn new(
        identity: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        platform: ChatPlatformPtr,
        topics: TopicNamer,
    ) -> Self {
        Self {
            identity: identity.into(),
            bus,
            platform,
            topics,
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    /// Relay a single platform message
    ///
    /// Failures are logged and the message dropped; platform events cannot
    /// be redelivered, so nothing here is retried.
    pub async fn handle_message(&self, message: Message) -> InboundOutcome {
        let author = message.author_id();
        if !author.is_empty() && self.platform.self_user_id().as_deref() == Some(author) {
            debug!(message_id = %message.id, "Ignoring message from self");
            return InboundOutcome::SelfMessage;
        }

        let topic = self.topics.inbound_topic_for(&message);
        let channel_id = message.channel_id.clone();
        let envelope = Envelope::inbound(message, self.identity.as_str());
        let id = envelope.metadata.id;

        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    id = %id,
                    source = %envelope.metadata.source,
                    channel_id = %channel_id,
                    error = %e,
                    "Unable to encode message"
                );
                return InboundOutcome::Dropped;
            }
        };

        match self.bus.publish(&topic, bytes).await {
            Ok(()) => {
                debug!(
                    id = %id,
                    source = %envelope.metadata.source,
                    dest = %envelope.metadata.dest,
                    topic = %topic,
                    channel_id = %channel_id,
                    "Published message to bus"
                );
                InboundOutcome::Published { topic, id }
            }
            Err(e) => {
                error!(
                    id = %id,
                    source = %envelope.metadata.source,
                    topic = %topic,
                    error = %e,
                    "Unable to publish message to bus"
                );
                InboundOutcome::Dropped
            }
        }
    }

    /// Consume platform events until cancelled or the event stream ends
    pub async fn run(&self, mut events: mpsc::Receiver<PlatformEvent>, cancel: CancellationToken) {
        info!(identity = %self.identity, bus = %self.bus.name(), "Inbound relay listening");
        self.state.set(RelayState::Listening);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(PlatformEvent::Ready { user_id }) => {
                    info!(user_id = %user_id, platform = %self.platform.name(), "Platform session ready");
                }
                Some(PlatformEvent::MessageCreate(message)) => {
                    self.state.set(RelayState::Processing);
                    self.handle_message(message).await;
                    self.state.set(RelayState::Listening);
                }
                None => {
                    info!("Platform event stream closed");
                    break;
                }
            }
        }

        self.state.set(RelayState::Stopped);
        info!("Inbound relay stopped");
    }
}
