//! Periodic health probing

use crate::probe::HealthProbe;
use crate::state::HealthState;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs the probe on a fixed interval and publishes each report to [`HealthState`]
pub struct HealthMonitor {
    probe: HealthProbe,
    state: HealthState,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(probe: HealthProbe, state: HealthState, interval: Duration) -> Self {
        Self {
            probe,
            state,
            interval,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    /// Probe immediately, then every interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            topic = %self.probe.health_topic(),
            interval_secs = self.interval.as_secs(),
            "Health monitor started"
        );

        loop {
            let report = self.probe.check().await;
            self.state.update(report).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Health monitor stopped");
    }
}
