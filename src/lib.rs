//! Maintenance service for a learning-management data store.
//!
//! Its one job finds timetable entries whose subject no longer exists and
//! deletes them. Run it on demand through [`jobs::reconcile`] or
//! [`jobs::OrphanTimetableReconciler`], or let a host process fire it daily
//! through [`jobs::ReconciliationScheduler`].

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;

/// Shared state of the host process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::ReconcilerConfig>,
    pub db: Option<Arc<db::DbPool>>,
    /// Daily trigger, present whenever a database is configured. Dormant
    /// unless the schedule is enabled.
    pub scheduler: Option<Arc<jobs::ReconciliationScheduler>>,
    /// Task tracker for background runs.
    /// Ensures in-flight reconciliations finish during graceful shutdown.
    pub task_tracker: TaskTracker,
}

impl AppState {
    pub async fn new(config: config::ReconcilerConfig) -> Result<Self, AppError> {
        let (db, scheduler) = if config.database.is_none() {
            (None, None)
        } else {
            let pool = db::DbPool::from_config(&config.database).await?;
            if config.database.run_migrations() {
                pool.run_migrations().await?;
            }
            let db = Arc::new(pool);

            let reconciler = Arc::new(jobs::OrphanTimetableReconciler::from_pool(
                &db,
                config.reconciliation.timeout(),
            ));
            let settings = jobs::ScheduleSettings::from_config(&config.reconciliation)?;
            let scheduler = Arc::new(jobs::ReconciliationScheduler::new(reconciler, settings));

            (Some(db), Some(scheduler))
        };

        Ok(Self {
            config: Arc::new(config),
            db,
            scheduler,
            task_tracker: TaskTracker::new(),
        })
    }
}

/// Errors building [`AppState`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Operational router: health probes and Prometheus metrics.
pub fn build_app(config: &config::ReconcilerConfig, state: AppState) -> Router {
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .route("/metrics", get(routes::health::metrics));

    if !config.observability.metrics.enabled {
        tracing::debug!("Metrics disabled; /metrics will report not initialized");
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
