//! Reply composer
//!
//! Builds the outbound envelope an application publishes in response to an
//! inbound one. The reply is addressed back to whoever produced the inbound
//! envelope and always targets the originating conversation.

use super::{Envelope, Message, MessageReference, Metadata};

/// Composes responses on behalf of one application identity
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    source_app: String,
}

impl ReplyComposer {
    pub fn new(source_app: impl Into<String>) -> Self {
        Self {
            source_app: source_app.into(),
        }
    }

    pub fn source_app(&self) -> &str {
        &self.source_app
    }

    /// Build a new envelope answering `inbound` with `content`
    ///
    /// With `should_reply` the envelope is marked as a threaded reply to the
    /// inbound message and carries the thread reference. `should_mention` is
    /// recorded as-is; the platform send step decides whether it applies.
    /// The caller is responsible for `content` being non-empty.
    pub fn respond(
        &self,
        inbound: &Envelope,
        content: &str,
        should_reply: bool,
        should_mention: bool,
    ) -> Envelope {
        let origin = &inbound.payload;

        let mut metadata = Metadata::new(self.source_app.clone(), inbound.metadata.source.clone());
        metadata.mention_user = should_mention;

        let mut payload = Message::new(origin.channel_id.clone(), content);
        payload.guild_id = origin.guild_id.clone();

        if should_reply {
            metadata.reply = true;
            metadata.in_reply_to = origin.id.clone();
            payload.message_reference = Some(MessageReference {
                message_id: origin.id.clone(),
                channel_id: origin.channel_id.clone(),
                guild_id: origin.guild_id.clone(),
            });
        }

        Envelope::new(payload, metadata)
    }
}
