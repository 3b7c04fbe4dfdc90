//! Message bus abstraction
//!
//! The gateway talks to the pub/sub transport through [`MessageBus`]. Redis
//! is the production transport; [`MemoryBus`] provides the same topic and
//! pattern semantics in-process.

pub mod memory;
pub mod pattern;
pub mod redis;

pub use memory::MemoryBus;
pub use pattern::GlobPattern;
pub use redis::RedisBus;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// What a subscriber listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// A single exact topic
    Topic(String),
    /// A Redis-style glob pattern over topic names
    Pattern(String),
}

impl Subscription {
    pub fn is_pattern(&self) -> bool {
        matches!(self, Subscription::Pattern(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Subscription::Topic(t) | Subscription::Pattern(t) => t,
        }
    }

    /// Compile the subscription for repeated matching
    pub fn matcher(&self) -> TopicMatcher {
        match self {
            Subscription::Topic(t) => TopicMatcher::Exact(t.clone()),
            Subscription::Pattern(p) => TopicMatcher::Glob(GlobPattern::new(p)),
        }
    }

    /// Check whether a published topic is delivered to this subscription
    ///
    /// Patterns are compiled on every call; hold a [`TopicMatcher`] when
    /// matching many topics.
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher().matches(topic)
    }
}

/// Compiled form of a [`Subscription`]
#[derive(Debug, Clone)]
pub enum TopicMatcher {
    Exact(String),
    Glob(GlobPattern),
}

impl TopicMatcher {
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicMatcher::Exact(t) => t == topic,
            TopicMatcher::Glob(pattern) => pattern.matches(topic),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message delivered on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published to
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Receiving half of a subscription
///
/// Dropping the subscriber unsubscribes.
pub struct Subscriber {
    subscription: Subscription,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscriber {
    pub fn new(subscription: Subscription, rx: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self { subscription, rx }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the next message; `None` once the subscription channel is gone
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by probes and tests
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Pub/sub transport used by the relays
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Transport name for log lines
    fn name(&self) -> &str;

    /// Verify the transport is reachable
    async fn ping(&self) -> crate::Result<()>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> crate::Result<()>;

    /// Open a subscription
    async fn subscribe(&self, subscription: &Subscription) -> crate::Result<Subscriber>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_matches() {
        let topic = Subscription::Topic("gw1-outbound".to_string());
        assert!(topic.matches("gw1-outbound"));
        assert!(!topic.matches("gw2-outbound"));
        assert!(!topic.is_pattern());

        let pattern = Subscription::Pattern("outbound.discord.*".to_string());
        assert!(pattern.matches("outbound.discord.g1.c1"));
        assert!(!pattern.matches("inbound.discord.g1.c1.u1"));
        assert_eq!(pattern.to_string(), "outbound.discord.*");
    }

    #[test]
    fn test_matcher_is_reusable() {
        let matcher = Subscription::Pattern("outbound.discord.*".to_string()).matcher();
        let topics = [
            "outbound.discord.g1.c1",
            "outbound.discord.@me.c2",
            "inbound.discord.g1.c1.u1",
        ];
        let hits: Vec<bool> = topics.iter().map(|t| matcher.matches(t)).collect();
        assert_eq!(hits, vec![true, true, false]);

        let exact = Subscription::Topic("gw1-outbound".to_string()).matcher();
        assert!(exact.matches("gw1-outbound"));
        assert!(!exact.matches("gw1-outbound-2"));
    }
}
