//! Health check and metrics endpoints for probes and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::{AppState, db::DbPool, jobs::ReconciliationScheduler};
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Service version
    pub version: String,
    /// Individual subsystem statuses
    pub subsystems: SubsystemStatus,
}

/// Status of individual subsystems.
#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    /// Database connection status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
    /// Daily reconciliation schedule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ScheduleStatus>,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    /// Whether the component is healthy
    pub healthy: bool,
    /// Optional message with details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Latency of the health check in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// State of the daily reconciliation trigger.
#[derive(Debug, Serialize)]
pub struct ScheduleStatus {
    pub schedule_enabled: bool,
    /// A reconciliation run is in progress
    pub running: bool,
    /// Next trigger instant (RFC 3339, in the schedule's zone)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

/// Full health check with subsystem status.
///
/// Reports database connectivity and the reconciliation schedule. Only the
/// database affects the overall status.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => Some(database_status(db).await),
        None => None,
    };
    let reconciliation = state.scheduler.as_deref().map(schedule_status);

    let healthy = database.as_ref().is_none_or(|db| db.healthy);
    let health = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subsystems: SubsystemStatus {
            database,
            reconciliation,
        },
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(health))
}

async fn database_status(db: &DbPool) -> ComponentStatus {
    let start = std::time::Instant::now();
    let healthy = db.health_check().await.is_ok();

    ComponentStatus {
        healthy,
        message: (!healthy).then(|| "Database connection failed".to_string()),
        latency_ms: Some(start.elapsed().as_millis() as u64),
    }
}

fn schedule_status(scheduler: &ReconciliationScheduler) -> ScheduleStatus {
    let settings = scheduler.settings();
    let next_run = settings
        .enabled
        .then(|| settings.next_fire_after(chrono::Utc::now()).ok())
        .flatten()
        .map(|at| at.with_timezone(&settings.time_zone).to_rfc3339());

    ScheduleStatus {
        schedule_enabled: settings.enabled,
        running: scheduler.is_running(),
        next_run,
    }
}

/// Liveness probe. Always 200 while the process is serving.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe. 503 while the configured database is unreachable.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(db) = &state.db
        && db.health_check().await.is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => {
                let metrics: String = handle.render();
                (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    metrics,
                )
            }
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
