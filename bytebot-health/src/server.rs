use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::probe::HealthReport;
use crate::state::HealthState;

/// `GET /healthz` reports the latest probe, `GET /livez` only that the process answers
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/livez", get(livez_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.latest().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn livez_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn run_server(
    state: HealthState,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health endpoint listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            tracing::info!("Health endpoint shutting down");
        })
        .await?;

    Ok(())
}
