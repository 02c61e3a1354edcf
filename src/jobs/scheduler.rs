//! Daily trigger for the orphaned timetable reconciliation.
//!
//! The scheduler fires once per calendar day at a fixed wall-clock time in a
//! named time zone, whatever zone the host runs in. A trigger that arrives
//! while the previous run is still going is skipped. Failures are logged and
//! the scheduler waits for the next day.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{OrphanTimetableReconciler, ReconcileError, ReconcileResult};
use crate::{
    config::{ConfigError, ReconciliationConfig},
    observability::metrics,
};

/// How far past a nonexistent local time (DST gap) to search for the first
/// valid instant.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// When and whether the daily trigger fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub trigger_time: NaiveTime,
    pub time_zone: Tz,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            time_zone: chrono_tz::Asia::Kolkata,
        }
    }
}

impl ScheduleSettings {
    pub fn from_config(config: &ReconciliationConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.schedule_active(),
            trigger_time: config.trigger_time()?,
            time_zone: config.time_zone()?,
        })
    }

    /// First trigger instant strictly after `now`.
    ///
    /// A trigger time that falls in a DST gap rolls forward to the first
    /// valid local minute; one that occurs twice fires at the earlier one.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let today = now.with_timezone(&self.time_zone).date_naive();

        for offset in 0..=2 {
            let date = today
                .checked_add_days(Days::new(offset))
                .ok_or(ScheduleError::DateOutOfRange)?;
            let candidate = self.resolve(date)?;
            if candidate > now {
                return Ok(candidate);
            }
        }

        Err(ScheduleError::DateOutOfRange)
    }

    fn resolve(&self, date: NaiveDate) -> Result<DateTime<Utc>, ScheduleError> {
        let mut local = date.and_time(self.trigger_time);
        for _ in 0..=MAX_GAP_MINUTES {
            if let Some(instant) = self.time_zone.from_local_datetime(&local).earliest() {
                return Ok(instant.with_timezone(&Utc));
            }
            local = local
                .checked_add_signed(TimeDelta::minutes(1))
                .ok_or(ScheduleError::DateOutOfRange)?;
        }
        Err(ScheduleError::NoValidLocalTime {
            date,
            time: self.trigger_time,
            time_zone: self.time_zone,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("No valid instant for {time} on {date} in {time_zone}")]
    NoValidLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        time_zone: Tz,
    },

    #[error("Next trigger date is out of range")]
    DateOutOfRange,
}

/// What a single trigger did.
#[derive(Debug)]
pub enum FireOutcome {
    /// A previous run was still in flight.
    Skipped,
    Completed(ReconcileResult),
    Failed(ReconcileError),
}

/// Releases the in-flight flag when the run ends, including on unwind.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the daily trigger for one reconciler.
pub struct ReconciliationScheduler {
    reconciler: Arc<OrphanTimetableReconciler>,
    settings: ScheduleSettings,
    in_flight: AtomicBool,
}

impl ReconciliationScheduler {
    pub fn new(reconciler: Arc<OrphanTimetableReconciler>, settings: ScheduleSettings) -> Self {
        Self {
            reconciler,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    /// Whether a run started by this scheduler is in progress.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one reconciliation unless one is already in flight.
    ///
    /// Never returns an error: failures are logged and reported in the outcome.
    pub async fn fire(&self) -> FireOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Previous orphaned timetable reconciliation still running, skipping");
            metrics::record_reconciliation_run("skipped", 0.0);
            return FireOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        match self.reconciler.reconcile().await {
            Ok(result) => FireOutcome::Completed(result),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    store_unavailable = e.is_store_unavailable(),
                    "Scheduled orphaned timetable reconciliation failed"
                );
                FireOutcome::Failed(e)
            }
        }
    }

    /// Fire on a separate task tracked by `tracker`. A panic inside the run
    /// is logged and does not reach the caller.
    pub fn trigger(self: &Arc<Self>, tracker: &TaskTracker) {
        let this = Arc::clone(self);
        let run = tokio::spawn(async move { this.fire().await });
        tracker.spawn(async move {
            if let Err(e) = run.await {
                tracing::error!(error = %e, "Orphaned timetable reconciliation task panicked");
            }
        });
    }

    /// Sleep until each trigger instant and fire, until `shutdown` is cancelled.
    ///
    /// Returns immediately when the schedule is disabled.
    pub async fn run(self: Arc<Self>, tracker: TaskTracker, shutdown: CancellationToken) {
        if !self.settings.enabled {
            tracing::info!(
                "Orphaned timetable reconciliation schedule disabled; \
                 set APP_ENV=production or RECONCILIATION_SCHEDULE_ENABLED=true to enable"
            );
            return;
        }

        tracing::info!(
            trigger_time = %self.settings.trigger_time,
            time_zone = %self.settings.time_zone,
            "Starting orphaned timetable reconciliation schedule"
        );

        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            // Never pick the same instant twice if the timer woke slightly early
            let after = last_fire.map_or(now, |last| last.max(now));
            let next = match self.settings.next_fire_after(after) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot compute next reconciliation time, stopping schedule");
                    return;
                }
            };

            tracing::debug!(
                next_run = %next.with_timezone(&self.settings.time_zone),
                "Next orphaned timetable reconciliation scheduled"
            );

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Orphaned timetable reconciliation schedule stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            last_fire = Some(next);
            self.trigger(&tracker);
        }
    }
}
