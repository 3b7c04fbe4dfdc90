//! Envelope protocol
//!
//! An [`Envelope`] is the unit placed on the bus: an opaque platform payload
//! plus relay-owned routing [`Metadata`]. The two are separate sub-documents
//! on the wire so consumers can route on metadata without understanding the
//! payload schema.

pub mod codec;
pub mod reply;

pub use codec::{decode, decode_metadata, encode, CodecError};
pub use reply::ReplyComposer;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Platform-native message body carried as the envelope payload
///
/// Only the fields the relays route on are named; everything else the
/// platform sends is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform message identifier
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub id: String,
    /// Channel or thread the message belongs to
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub channel_id: String,
    /// Guild/server identifier; empty for direct messages
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub guild_id: String,
    /// Text content
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub content: String,
    /// Author of the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    /// Thread reference used for threaded replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
    /// Remaining platform fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a plain text message for a channel
    pub fn new(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Set the author of the message
    pub fn with_author(mut self, author: User) -> Self {
        self.author = Some(author);
        self
    }

    /// Author id, or an empty string when the payload carries no author
    pub fn author_id(&self) -> &str {
        self.author.as_ref().map(|a| a.id.as_str()).unwrap_or("")
    }
}

/// Message author
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub id: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub username: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub discriminator: String,
    #[serde(
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "null_as_default"
    )]
    pub bot: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            ..Self::default()
        }
    }
}

/// Reference to a prior message, used to render a threaded reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub message_id: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub channel_id: String,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub guild_id: String,
}

/// Relay-owned routing metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Gateway instance or application that produced the envelope
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub source: String,
    /// Intended consumer; empty means unaddressed
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub dest: String,
    /// Minted once at creation, used for tracing only
    #[serde(
        default,
        skip_serializing_if = "Uuid::is_nil",
        deserialize_with = "uuid_or_empty"
    )]
    pub id: Uuid,
    /// Render as a threaded reply to `in_reply_to`
    #[serde(
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "null_as_default"
    )]
    pub reply: bool,
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub in_reply_to: String,
    /// Advisory: notify the original author when replying
    #[serde(
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "null_as_default"
    )]
    pub mention_user: bool,
}

impl Metadata {
    /// Create metadata with a freshly minted id
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    /// True when no consumer has been named
    pub fn is_unaddressed(&self) -> bool {
        self.dest.is_empty()
    }

    /// Check whether this envelope is addressed to `identity`
    pub fn is_addressed_to(&self, identity: &str) -> bool {
        self.dest == identity
    }
}

/// The unit of exchange on the bus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque platform payload
    #[serde(default, alias = "message", deserialize_with = "null_as_default")]
    pub payload: Message,
    /// Routing metadata; required on the wire
    pub metadata: Metadata,
}

impl Envelope {
    pub fn new(payload: Message, metadata: Metadata) -> Self {
        Self { payload, metadata }
    }

    /// Wrap a platform event produced by the gateway `source`
    pub fn inbound(payload: Message, source: impl Into<String>) -> Self {
        Self::new(payload, Metadata::new(source, ""))
    }

    /// Compose a response to this envelope, see [`ReplyComposer`]
    pub fn respond(
        &self,
        source_app: &str,
        content: &str,
        should_reply: bool,
        should_mention: bool,
    ) -> Envelope {
        ReplyComposer::new(source_app).respond(self, content, should_reply, should_mention)
    }

    /// `(id, source, dest)` used to correlate log lines
    pub fn correlation(&self) -> (String, &str, &str) {
        (
            self.metadata.id.to_string(),
            self.metadata.source.as_str(),
            self.metadata.dest.as_str(),
        )
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Producers outside this crate sometimes send `"id": ""`.
fn uuid_or_empty<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Uuid::nil()),
        Some(raw) if raw.is_empty() => Ok(Uuid::nil()),
        Some(raw) => Uuid::parse_str(&raw).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new_mints_id() {
        let a = Metadata::new("gw1", "");
        let b = Metadata::new("gw1", "");
        assert!(!a.id.is_nil());
        assert_ne!(a.id, b.id);
        assert!(a.is_unaddressed());
    }

    #[test]
    fn test_inbound_envelope_is_unaddressed() {
        let msg = Message::new("c1", "ping").with_author(User::new("u1", "someone"));
        let env = Envelope::inbound(msg, "gw1");
        assert_eq!(env.metadata.source, "gw1");
        assert_eq!(env.metadata.dest, "");
        assert_eq!(env.payload.author_id(), "u1");
    }

    #[test]
    fn test_author_id_without_author() {
        assert_eq!(Message::new("c1", "hi").author_id(), "");
    }
}
