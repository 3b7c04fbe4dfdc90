//! Connection supervisor
//!
//! Verifies the bus and the platform session before the relays start,
//! retrying each once after a fixed backoff, then runs the platform session
//! and both relays until shutdown or a fatal failure.

use crate::base::{ChannelError, ChatPlatformPtr, Result};
use crate::relay::{InboundRelay, OutboundRelay};
use bytebot_core::bus::MessageBus;
use bytebot_core::config::{Config, SupervisorConfig};
use bytebot_core::topic::TopicNamer;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Platform events buffered between the session and the inbound relay
const EVENT_BUFFER: usize = 256;

/// Startup retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the single retry
    pub backoff: Duration,
    /// Upper bound on the bus ping
    pub ping_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SupervisorConfig> for RetryPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            backoff: Duration::from_secs(config.retry_backoff_secs),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying exactly once after the backoff
    pub async fn retry_once<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(
                    step = what,
                    error = %e,
                    backoff_secs = self.backoff.as_secs_f64(),
                    "Startup step failed, retrying once"
                );
                tokio::time::sleep(self.backoff).await;
                op().await.map_err(|e| {
                    error!(step = what, error = %e, "Startup step failed after retry");
                    e
                })
            }
        }
    }
}

enum Exit {
    Shutdown,
    Outbound(std::result::Result<Result<()>, tokio::task::JoinError>),
    Platform(std::result::Result<Result<()>, tokio::task::JoinError>),
}

/// Owns the bus and platform handles and the lifetime of both relays
pub struct Supervisor {
    identity: String,
    bus: Arc<dyn MessageBus>,
    platform: ChatPlatformPtr,
    topics: TopicNamer,
    policy: RetryPolicy,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(config: &Config, bus: Arc<dyn MessageBus>, platform: ChatPlatformPtr) -> Self {
        Self {
            identity: config.gateway.id.clone(),
            bus,
            platform,
            topics: TopicNamer::from_config(&config.gateway),
            policy: RetryPolicy::from(&config.supervisor),
            shutdown_grace: Duration::from_secs(config.supervisor.shutdown_grace_secs),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Ping the bus and verify the platform session
    pub async fn connect(&self) -> Result<()> {
        let bus = self.bus.as_ref();
        let ping_timeout = self.policy.ping_timeout;

        self.policy
            .retry_once("bus ping", || async move {
                match tokio::time::timeout(ping_timeout, bus.ping()).await {
                    Ok(result) => result.map_err(ChannelError::from),
                    Err(_) => Err(ChannelError::ConnectionError(format!(
                        "{} ping timed out after {:?}",
                        bus.name(),
                        ping_timeout
                    ))),
                }
            })
            .await?;
        info!(bus = %self.bus.name(), "Bus connection verified");

        let user = self
            .policy
            .retry_once("platform verify", || self.platform.verify())
            .await?;
        info!(
            platform = %self.platform.name(),
            user_id = %user.id,
            username = %user.username,
            "Platform session verified"
        );
        Ok(())
    }

    /// Connect, start the relays and run until `shutdown` resolves
    ///
    /// Returns an error when startup fails after its retry, when the bus
    /// subscription is lost, or when the platform session ends on its own.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.connect().await?;

        let outbound = Arc::new(OutboundRelay::new(
            self.identity.clone(),
            self.platform.clone(),
            self.topics.clone(),
        ));
        let subscriber = self
            .policy
            .retry_once("outbound subscribe", || outbound.subscribe(self.bus.as_ref()))
            .await?;

        let inbound = Arc::new(InboundRelay::new(
            self.identity.clone(),
            self.bus.clone(),
            self.platform.clone(),
            self.topics.clone(),
        ));

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let mut platform_task = tokio::spawn({
            let platform = self.platform.clone();
            let cancel = cancel.clone();
            async move { platform.run(events_tx, cancel).await }
        });
        let inbound_task = tokio::spawn({
            let cancel = cancel.clone();
            async move { inbound.run(events_rx, cancel).await }
        });
        let mut outbound_task = tokio::spawn({
            let outbound = outbound.clone();
            let cancel = cancel.clone();
            async move { outbound.run(subscriber, cancel).await }
        });

        let aborts = [
            platform_task.abort_handle(),
            inbound_task.abort_handle(),
            outbound_task.abort_handle(),
        ];

        info!(
            identity = %self.identity,
            scheme = %self.topics.scheme(),
            "Gateway running"
        );

        tokio::pin!(shutdown);
        let exit = tokio::select! {
            _ = &mut shutdown => Exit::Shutdown,
            res = &mut outbound_task => Exit::Outbound(res),
            res = &mut platform_task => Exit::Platform(res),
        };

        let mut pending: Vec<JoinHandle<()>> = vec![inbound_task];
        let result = match exit {
            Exit::Shutdown => {
                info!("Shutdown requested");
                pending.push(tokio::spawn(async move {
                    let _ = outbound_task.await;
                }));
                pending.push(tokio::spawn(async move {
                    let _ = platform_task.await;
                }));
                Ok(())
            }
            Exit::Outbound(res) => {
                pending.push(tokio::spawn(async move {
                    let _ = platform_task.await;
                }));
                let err = match res {
                    Ok(Ok(())) => ChannelError::SubscriptionLost("outbound relay stopped".into()),
                    Ok(Err(e)) => e,
                    Err(e) => ChannelError::Error(format!("outbound relay task failed: {}", e)),
                };
                error!(error = %err, "Outbound relay failed");
                Err(err)
            }
            Exit::Platform(res) => {
                pending.push(tokio::spawn(async move {
                    let _ = outbound_task.await;
                }));
                let err = match res {
                    Ok(Ok(())) => ChannelError::ConnectionError("platform session ended".into()),
                    Ok(Err(e)) => e,
                    Err(e) => ChannelError::Error(format!("platform task failed: {}", e)),
                };
                error!(error = %err, "Platform session failed");
                Err(err)
            }
        };

        cancel.cancel();
        if tokio::time::timeout(self.shutdown_grace, join_all(pending))
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.shutdown_grace.as_secs_f64(),
                "Tasks did not stop within the grace period"
            );
            aborts.iter().for_each(|h| h.abort());
        }

        info!("Gateway stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::RecordingPlatform;
    use async_trait::async_trait;
    use bytebot_core::bus::{MemoryBus, Subscriber, Subscription};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bus whose ping fails a configurable number of times
    struct FlakyBus {
        inner: MemoryBus,
        ping_failures: AtomicUsize,
        pings: AtomicUsize,
    }

    impl FlakyBus {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryBus::new(),
                ping_failures: AtomicUsize::new(failures),
                pings: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn ping(&self) -> bytebot_core::Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            let remaining = self.ping_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.ping_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(bytebot_core::Error::Bus("connection refused".into()));
            }
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> bytebot_core::Result<()> {
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, subscription: &Subscription) -> bytebot_core::Result<Subscriber> {
            self.inner.subscribe(subscription).await
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(10),
            ping_timeout: Duration::from_millis(200),
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.gateway.id = "gw1".to_string();
        config
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff, Duration::from_secs(3));
        assert_eq!(RetryPolicy::from(&SupervisorConfig::default()), policy);
    }

    #[tokio::test]
    async fn test_connect_retries_once() {
        let bus = Arc::new(FlakyBus::new(1));
        let platform = Arc::new(RecordingPlatform::new("bot1"));
        platform.fail_verify(1);

        let supervisor = Supervisor::new(&config(), bus.clone(), platform.clone())
            .with_policy(fast_policy());
        supervisor.connect().await.unwrap();

        assert_eq!(bus.pings.load(Ordering::SeqCst), 2);
        assert_eq!(platform.verify_calls(), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_fatal() {
        let bus = Arc::new(FlakyBus::new(2));
        let platform = Arc::new(RecordingPlatform::new("bot1"));

        let supervisor = Supervisor::new(&config(), bus.clone(), platform.clone())
            .with_policy(fast_policy());
        let err = supervisor.connect().await.unwrap_err();

        assert!(matches!(err, ChannelError::Core(_)));
        assert_eq!(bus.pings.load(Ordering::SeqCst), 2);
        assert_eq!(platform.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_platform_verify_failure_is_fatal() {
        let bus = Arc::new(FlakyBus::new(0));
        let platform = Arc::new(RecordingPlatform::new("bot1"));
        platform.fail_verify(2);

        let supervisor =
            Supervisor::new(&config(), bus, platform.clone()).with_policy(fast_policy());
        assert!(supervisor.connect().await.is_err());
        assert_eq!(platform.verify_calls(), 2);
    }

    #[tokio::test]
    async fn test_run_exits_cleanly_on_shutdown() {
        let bus = Arc::new(MemoryBus::new());
        let platform = Arc::new(RecordingPlatform::new("bot1"));
        let supervisor = Supervisor::new(&config(), bus.clone(), platform)
            .with_policy(fast_policy())
            .with_shutdown_grace(Duration::from_secs(1));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            supervisor
                .run(async {
                    let _ = rx.await;
                })
                .await
        });

        for _ in 0..100 {
            if bus.subscriber_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.subscriber_count().await, 1);

        tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_platform_failure_is_fatal() {
        let bus = Arc::new(MemoryBus::new());
        let platform = Arc::new(RecordingPlatform::new("bot1"));
        platform.fail_run(ChannelError::AuthError("close code 4004".into()));

        let supervisor = Supervisor::new(&config(), bus, platform)
            .with_policy(fast_policy())
            .with_shutdown_grace(Duration::from_secs(1));

        let err = supervisor
            .run(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::AuthError(_)));
    }
}
