use crate::probe::HealthReport;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Latest health report, shared between the monitor and the HTTP handlers
#[derive(Clone)]
pub struct HealthState {
    latest: Arc<RwLock<HealthReport>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(RwLock::new(HealthReport::pending())),
        }
    }

    pub async fn latest(&self) -> HealthReport {
        self.latest.read().await.clone()
    }

    pub async fn update(&self, report: HealthReport) {
        *self.latest.write().await = report;
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
