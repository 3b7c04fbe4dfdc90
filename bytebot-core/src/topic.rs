//! Topic naming
//!
//! Two conventions are supported:
//!
//! - flat: one topic per direction, `<app-id>-inbound` / `<app-id>-outbound`
//! - hierarchical: dot-delimited addresses,
//!   `inbound.<platform>.<guild>.<channel>.<user>` and
//!   `outbound.<platform>.<guild>.<channel>`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bus::Subscription;
use crate::config::GatewayConfig;
use crate::envelope::{Envelope, Message};
use crate::{Error, Result};

/// Segment used when a message has no guild (direct messages)
pub const DIRECT_MESSAGE_GUILD: &str = "@me";

/// Segment rendered for an empty id
pub const EMPTY_SEGMENT: &str = "_";

/// Topic naming convention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicScheme {
    #[default]
    Flat,
    Hierarchical,
}

impl FromStr for TopicScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(TopicScheme::Flat),
            "hierarchical" | "dotted" => Ok(TopicScheme::Hierarchical),
            other => Err(Error::Topic(format!("unknown topic scheme '{}'", other))),
        }
    }
}

impl fmt::Display for TopicScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicScheme::Flat => f.write_str("flat"),
            TopicScheme::Hierarchical => f.write_str("hierarchical"),
        }
    }
}

/// Message direction relative to the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// `<app-id>-inbound` / `<app-id>-outbound`
pub fn flat_topic(app_id: &str, direction: Direction) -> String {
    format!("{}-{}", app_id, direction.as_str())
}

/// Parsed hierarchical topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddr {
    pub direction: Direction,
    pub platform: String,
    pub server: String,
    pub channel: String,
    /// Only present on inbound addresses
    pub user: Option<String>,
}

impl TopicAddr {
    /// Inbound address for a platform message
    pub fn inbound(platform: &str, message: &Message) -> Self {
        Self {
            direction: Direction::Inbound,
            platform: platform.to_string(),
            server: guild_segment(&message.guild_id),
            channel: segment(&message.channel_id),
            user: Some(segment(message.author_id())),
        }
    }

    /// Outbound address for a conversation
    pub fn outbound(platform: &str, guild_id: &str, channel_id: &str) -> Self {
        Self {
            direction: Direction::Outbound,
            platform: platform.to_string(),
            server: guild_segment(guild_id),
            channel: segment(channel_id),
            user: None,
        }
    }

    /// Parse `inbound.<platform>.<server>.<channel>.<user>` or
    /// `outbound.<platform>.<server>.<channel>`
    pub fn parse(topic: &str) -> Result<Self> {
        let parts: Vec<&str> = topic.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Topic(format!("empty segment in topic '{}'", topic)));
        }

        match parts.as_slice() {
            ["inbound", platform, server, channel, user] => Ok(Self {
                direction: Direction::Inbound,
                platform: platform.to_string(),
                server: server.to_string(),
                channel: channel.to_string(),
                user: Some(user.to_string()),
            }),
            ["outbound", platform, server, channel] => Ok(Self {
                direction: Direction::Outbound,
                platform: platform.to_string(),
                server: server.to_string(),
                channel: channel.to_string(),
                user: None,
            }),
            _ => Err(Error::Topic(format!(
                "'{}' is not a hierarchical topic address",
                topic
            ))),
        }
    }

    /// Guild id with the direct-message placeholder mapped back to empty
    pub fn guild_id(&self) -> &str {
        if self.server == DIRECT_MESSAGE_GUILD {
            ""
        } else {
            &self.server
        }
    }
}

impl fmt::Display for TopicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.direction.as_str(),
            self.platform,
            self.server,
            self.channel
        )?;
        if let Some(user) = &self.user {
            write!(f, ".{}", user)?;
        }
        Ok(())
    }
}

fn segment(raw: &str) -> String {
    if raw.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        raw.replace('.', "_")
    }
}

fn guild_segment(guild_id: &str) -> String {
    if guild_id.is_empty() {
        DIRECT_MESSAGE_GUILD.to_string()
    } else {
        segment(guild_id)
    }
}

/// Resolves topic names for one gateway (or the applications talking to it)
#[derive(Debug, Clone)]
pub struct TopicNamer {
    scheme: TopicScheme,
    platform: String,
    inbound_topic: String,
    outbound_topic: String,
    /// Outbound topic set explicitly in configuration rather than derived
    configured_outbound: Option<String>,
}

impl TopicNamer {
    pub fn new(
        scheme: TopicScheme,
        platform: impl Into<String>,
        inbound_topic: impl Into<String>,
        outbound_topic: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            platform: platform.into(),
            inbound_topic: inbound_topic.into(),
            outbound_topic: outbound_topic.into(),
            configured_outbound: None,
        }
    }

    /// Pin the flat outbound topic for replies, whatever their `dest`
    pub fn with_configured_outbound(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.outbound_topic = topic.clone();
        self.configured_outbound = Some(topic);
        self
    }

    /// Build a namer from gateway configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        let namer = Self::new(
            config.topic_scheme,
            config.platform.clone(),
            config.inbound_topic(),
            config.outbound_topic(),
        );
        let configured = config.outbound_topic.trim();
        if configured.is_empty() {
            namer
        } else {
            namer.with_configured_outbound(configured)
        }
    }

    pub fn scheme(&self) -> TopicScheme {
        self.scheme
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Topic the gateway publishes a platform message to
    pub fn inbound_topic_for(&self, message: &Message) -> String {
        match self.scheme {
            TopicScheme::Flat => self.inbound_topic.clone(),
            TopicScheme::Hierarchical => TopicAddr::inbound(&self.platform, message).to_string(),
        }
    }

    /// Subscription the gateway's outbound relay listens on
    pub fn outbound_subscription(&self) -> Subscription {
        match self.scheme {
            TopicScheme::Flat => Subscription::Topic(self.outbound_topic.clone()),
            TopicScheme::Hierarchical => {
                Subscription::Pattern(format!("outbound.{}.*", self.platform))
            }
        }
    }

    /// Subscription an application uses to receive the gateway's messages
    pub fn inbound_subscription(&self) -> Subscription {
        match self.scheme {
            TopicScheme::Flat => Subscription::Topic(self.inbound_topic.clone()),
            TopicScheme::Hierarchical => {
                Subscription::Pattern(format!("inbound.{}.*", self.platform))
            }
        }
    }

    /// Topic an application publishes a composed reply to
    ///
    /// Flat replies go to the configured outbound topic when there is one,
    /// otherwise to `<dest>-outbound`.
    pub fn reply_topic(&self, reply: &Envelope) -> String {
        match (self.scheme, &self.configured_outbound) {
            (TopicScheme::Flat, Some(topic)) => topic.clone(),
            (TopicScheme::Flat, None) if reply.metadata.dest.is_empty() => {
                self.outbound_topic.clone()
            }
            (TopicScheme::Flat, None) => flat_topic(&reply.metadata.dest, Direction::Outbound),
            (TopicScheme::Hierarchical, _) => TopicAddr::outbound(
                &self.platform,
                &reply.payload.guild_id,
                &reply.payload.channel_id,
            )
            .to_string(),
        }
    }
}
