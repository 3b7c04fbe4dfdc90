//! Health probe exercising the bus and the platform session

use bytebot_channels::ChatPlatformPtr;
use bytebot_core::bus::{MessageBus, Subscription};
use bytebot_core::config::Config;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const PROBE_CONTENT: &str = "bytebot health check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    /// Not checked yet
    Unknown,
}

/// Status of one dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentReport {
    pub fn up() -> Self {
        Self {
            status: ComponentStatus::Up,
            error: None,
        }
    }

    pub fn down(error: impl ToString) -> Self {
        Self {
            status: ComponentStatus::Down,
            error: Some(error.to_string()),
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: ComponentStatus::Unknown,
            error: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ComponentStatus::Up
    }
}

/// Result of one probe run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub bus: ComponentReport,
    pub platform: ComponentReport,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(bus: ComponentReport, platform: ComponentReport) -> Self {
        Self {
            healthy: bus.is_up() && platform.is_up(),
            bus,
            platform,
            checked_at: Utc::now(),
        }
    }

    /// Report used before the first probe completes
    pub fn pending() -> Self {
        Self::new(ComponentReport::unknown(), ComponentReport::unknown())
    }
}

/// Exercises a trivial subscribe/unsubscribe on the bus and a trivial call
/// against the platform session
pub struct HealthProbe {
    identity: String,
    bus: Arc<dyn MessageBus>,
    platform: ChatPlatformPtr,
    /// Channel for the self-message; empty re-verifies the session instead
    channel_id: String,
}

impl HealthProbe {
    pub fn new(config: &Config, bus: Arc<dyn MessageBus>, platform: ChatPlatformPtr) -> Self {
        Self {
            identity: config.gateway.id.clone(),
            bus,
            platform,
            channel_id: config.health.channel_id.clone(),
        }
    }

    /// Topic subscribed to (and immediately dropped) by the bus check
    pub fn health_topic(&self) -> String {
        format!("{}-health", self.identity)
    }

    pub async fn check(&self) -> HealthReport {
        let report = HealthReport::new(self.check_bus().await, self.check_platform().await);
        if report.healthy {
            debug!("Health check passed");
        } else {
            warn!(
                bus = ?report.bus.status,
                platform = ?report.platform.status,
                "Health check failed"
            );
        }
        report
    }

    async fn check_bus(&self) -> ComponentReport {
        let subscription = Subscription::Topic(self.health_topic());
        match self.bus.subscribe(&subscription).await {
            Ok(subscriber) => {
                drop(subscriber);
                ComponentReport::up()
            }
            Err(e) => ComponentReport::down(e),
        }
    }

    async fn check_platform(&self) -> ComponentReport {
        let result = if self.channel_id.is_empty() {
            self.platform.verify().await.map(|_| ())
        } else {
            self.platform
                .send_message(&self.channel_id, PROBE_CONTENT)
                .await
                .map(|_| ())
        };

        match result {
            Ok(()) => ComponentReport::up(),
            Err(e) => ComponentReport::down(e),
        }
    }
}
