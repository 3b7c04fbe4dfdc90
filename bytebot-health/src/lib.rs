//! Health checks for the bytebot gateway
//!
//! A [`HealthMonitor`] periodically runs a [`HealthProbe`] against the bus
//! and the platform session; the latest report is served over HTTP.

pub mod monitor;
pub mod probe;
pub mod server;
pub mod state;

pub use monitor::HealthMonitor;
pub use probe::{ComponentReport, ComponentStatus, HealthProbe, HealthReport};
pub use server::{router, run_server};
pub use state::HealthState;

use anyhow::Context;
use bytebot_core::config::HealthConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the monitor and the HTTP endpoint until `cancel` fires
pub async fn serve(
    config: &HealthConfig,
    probe: HealthProbe,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid health.bind address '{}'", config.bind))?;

    let state = HealthState::new();
    let monitor = HealthMonitor::new(
        probe,
        state.clone(),
        Duration::from_secs(config.interval_secs.max(1)),
    );

    // The monitor stops with the server, even if the server fails to bind
    let monitor_cancel = cancel.child_token();
    let server = async {
        let result = run_server(state, addr, cancel).await;
        monitor_cancel.cancel();
        result
    };

    let (_, served) = tokio::join!(monitor.run(monitor_cancel.clone()), server);
    served
}
