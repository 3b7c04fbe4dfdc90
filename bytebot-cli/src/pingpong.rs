//! Demo application answering `ping` with `pong`

use anyhow::{Context, Result};
use bytebot_core::bus::{BusMessage, MessageBus};
use bytebot_core::topic::TopicNamer;
use bytebot_core::utils::payload_preview;
use bytebot_core::{Envelope, ReplyComposer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PING: &str = "ping";
const PONG: &str = "pong";

/// Listens on the gateway's inbound topics and publishes a plain `pong`
/// back to the originating channel
pub struct PingPong {
    composer: ReplyComposer,
    bus: Arc<dyn MessageBus>,
    topics: TopicNamer,
}

impl PingPong {
    pub fn new(app_id: impl Into<String>, bus: Arc<dyn MessageBus>, topics: TopicNamer) -> Self {
        Self {
            composer: ReplyComposer::new(app_id),
            bus,
            topics,
        }
    }

    /// Answer one inbound message; returns the topic a reply went to
    pub async fn handle(&self, msg: &BusMessage) -> Result<Option<String>> {
        let inbound = match Envelope::decode(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %msg.topic,
                    payload = %payload_preview(&msg.payload, 120),
                    "Unable to decode inbound envelope: {}",
                    e
                );
                return Ok(None);
            }
        };

        if inbound.payload.content.trim() != PING {
            return Ok(None);
        }

        let (id, source, dest) = inbound.correlation();
        debug!(
            id = %id,
            source = %source,
            dest = %dest,
            channel_id = %inbound.payload.channel_id,
            "Received ping"
        );

        let reply = self.composer.respond(&inbound, PONG, false, false);
        let topic = self.topics.reply_topic(&reply);
        let payload = reply.encode().context("encode pong")?;
        self.bus
            .publish(&topic, payload)
            .await
            .with_context(|| format!("publish pong to {}", topic))?;
        Ok(Some(topic))
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let subscription = self.topics.inbound_subscription();
        let mut subscriber = self
            .bus
            .subscribe(&subscription)
            .await
            .with_context(|| format!("subscribe to {}", subscription))?;
        info!(
            app_id = %self.composer.source_app(),
            subscription = %subscription,
            "Pingpong listening"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = subscriber.recv() => {
                    let Some(msg) = msg else {
                        anyhow::bail!("subscription {} closed", subscription);
                    };
                    if let Err(e) = self.handle(&msg).await {
                        warn!(topic = %msg.topic, "Failed to answer ping: {:#}", e);
                    }
                }
            }
        }
    }
}
