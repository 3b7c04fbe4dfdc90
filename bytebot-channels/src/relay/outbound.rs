//! Outbound relay: bus envelopes to platform sends

use super::{RelayState, StateCell};
use crate::base::{ChannelError, ChatPlatformPtr, Result};
use bytebot_core::bus::{BusMessage, MessageBus, Subscriber, Subscription};
use bytebot_core::topic::{TopicAddr, TopicNamer, TopicScheme, EMPTY_SEGMENT};
use bytebot_core::utils::payload_preview;
use bytebot_core::{Envelope, MessageReference, Metadata};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PREVIEW_LEN: usize = 256;

/// Result of handling one bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Plain message sent
    Sent,
    /// Threaded reply sent
    Replied,
    /// Addressed to another consumer
    Ignored,
    /// Not a valid envelope
    DecodeFailed,
    /// The platform rejected the send
    SendFailed,
}

/// Consumes envelopes from the bus and delivers them to the platform
///
/// Delivery is at most once: a failed send is logged and not retried.
pub struct OutboundRelay {
    identity: String,
    platform: ChatPlatformPtr,
    topics: TopicNamer,
    subscription: Subscription,
    state: StateCell,
}

impl OutboundRelay {
    pub fn new(identity: impl Into<String>, platform: ChatPlatformPtr, topics: TopicNamer) -> Self {
        let subscription = topics.outbound_subscription();
        Self {
            identity: identity.into(),
            platform,
            topics,
            subscription,
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Open the relay's subscription on `bus`
    pub async fn subscribe(&self, bus: &dyn MessageBus) -> Result<Subscriber> {
        let subscriber = bus.subscribe(&self.subscription).await?;
        info!(subscription = %self.subscription, bus = %bus.name(), "Subscribed to outbound topic");
        Ok(subscriber)
    }

    /// Whether an envelope with `metadata` is meant for this gateway
    ///
    /// A wildcard subscription sees traffic for every gateway, so only
    /// envelopes explicitly addressed here are accepted. An exact topic is
    /// already scoped to this gateway and also accepts unaddressed envelopes.
    fn accepts(&self, metadata: &Metadata) -> bool {
        if self.subscription.is_pattern() {
            metadata.is_addressed_to(&self.identity)
        } else {
            metadata.is_addressed_to(&self.identity) || metadata.is_unaddressed()
        }
    }

    /// Decode, filter and dispatch a single bus message
    pub async fn handle(&self, msg: BusMessage) -> OutboundOutcome {
        let Envelope {
            mut payload,
            metadata,
        } = match Envelope::decode(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %msg.topic,
                    payload = %payload_preview(&msg.payload, PREVIEW_LEN),
                    error = %e,
                    "Unable to decode envelope from bus"
                );
                return OutboundOutcome::DecodeFailed;
            }
        };

        if !self.accepts(&metadata) {
            debug!(
                id = %metadata.id,
                source = %metadata.source,
                dest = %metadata.dest,
                topic = %msg.topic,
                "Ignoring envelope addressed to another consumer"
            );
            return OutboundOutcome::Ignored;
        }

        if payload.channel_id.is_empty() && self.topics.scheme() == TopicScheme::Hierarchical {
            if let Some(addr) = TopicAddr::parse(&msg.topic)
                .ok()
                .filter(|addr| addr.channel != EMPTY_SEGMENT)
            {
                payload.channel_id = addr.channel.clone();
                if payload.guild_id.is_empty() {
                    payload.guild_id = addr.guild_id().to_string();
                }
            }
        }

        let result = if metadata.reply {
            let reference = payload
                .message_reference
                .clone()
                .filter(|r| !r.message_id.is_empty())
                .unwrap_or_else(|| MessageReference {
                    message_id: metadata.in_reply_to.clone(),
                    channel_id: payload.channel_id.clone(),
                    guild_id: payload.guild_id.clone(),
                });
            self.platform
                .send_reply(
                    &payload.channel_id,
                    &payload.content,
                    &reference,
                    metadata.mention_user,
                )
                .await
                .map(|_| OutboundOutcome::Replied)
        } else {
            self.platform
                .send_message(&payload.channel_id, &payload.content)
                .await
                .map(|_| OutboundOutcome::Sent)
        };

        match result {
            Ok(outcome) => {
                debug!(
                    id = %metadata.id,
                    source = %metadata.source,
                    dest = %metadata.dest,
                    topic = %msg.topic,
                    channel_id = %payload.channel_id,
                    reply = metadata.reply,
                    "Delivered message to platform"
                );
                outcome
            }
            Err(e) => {
                error!(
                    id = %metadata.id,
                    source = %metadata.source,
                    dest = %metadata.dest,
                    topic = %msg.topic,
                    channel_id = %payload.channel_id,
                    error = %e,
                    "Unable to send message to platform"
                );
                OutboundOutcome::SendFailed
            }
        }
    }

    /// Process messages until cancelled
    ///
    /// Returns an error if the subscription channel closes underneath the
    /// relay; there is no buffer to fall back on, so the caller should
    /// treat that as fatal.
    pub async fn run(&self, mut subscriber: Subscriber, cancel: CancellationToken) -> Result<()> {
        self.state.set(RelayState::Subscribed);
        info!(subscription = %subscriber.subscription(), identity = %self.identity, "Outbound relay running");

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    self.state.set(RelayState::Stopped);
                    info!("Outbound relay stopped");
                    return Ok(());
                }
                msg = subscriber.recv() => msg,
            };

            let Some(msg) = msg else {
                self.state.set(RelayState::Stopped);
                error!(subscription = %subscriber.subscription(), "Bus subscription closed");
                return Err(ChannelError::SubscriptionLost(
                    subscriber.subscription().to_string(),
                ));
            };

            self.state.set(RelayState::Dispatching);
            self.handle(msg).await;
            self.state.set(RelayState::Subscribed);
        }
    }
}
