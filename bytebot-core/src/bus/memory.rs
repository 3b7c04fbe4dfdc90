//! In-process message bus

use super::{BusMessage, MessageBus, Subscriber, Subscription, TopicMatcher};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

struct Route {
    matcher: TopicMatcher,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// In-process bus with the same topic/pattern semantics as Redis pub/sub
///
/// Messages published with no live subscriber are dropped, as Redis does.
#[derive(Clone, Default)]
pub struct MemoryBus {
    routes: Arc<RwLock<Vec<Route>>>,
    /// Publishes in order, for inspection
    published: Arc<RwLock<VecDeque<BusMessage>>>,
    /// Oldest publishes are forgotten past this many; `None` keeps all
    history_limit: Option<usize>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that remembers only the last `limit` publishes
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            history_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Messages published so far, oldest first
    pub async fn published(&self) -> Vec<BusMessage> {
        self.published.read().await.iter().cloned().collect()
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        let mut routes = self.routes.write().await;
        routes.retain(|r| !r.tx.is_closed());
        routes.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> crate::Result<()> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> crate::Result<()> {
        let msg = BusMessage::new(topic, payload);
        {
            let mut published = self.published.write().await;
            published.push_back(msg.clone());
            if let Some(limit) = self.history_limit {
                while published.len() > limit {
                    published.pop_front();
                }
            }
        }

        let mut routes = self.routes.write().await;
        routes.retain(|r| !r.tx.is_closed());

        let mut delivered = 0usize;
        for route in routes.iter().filter(|r| r.matcher.matches(topic)) {
            if route.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!(topic, delivered, "Published message on memory bus");
        Ok(())
    }

    async fn subscribe(&self, subscription: &Subscription) -> crate::Result<Subscriber> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().await.push(Route {
            matcher: subscription.matcher(),
            tx,
        });

        debug!(subscription = %subscription, "Subscribed on memory bus");
        Ok(Subscriber::new(subscription.clone(), rx))
    }
}
