//! Background jobs for the reconciler.
//!
//! - **Orphaned timetable reconciliation**: deletes timetable entries whose
//!   subject no longer exists. Callable directly via
//!   [`OrphanTimetableReconciler::reconcile`] or [`reconcile`].
//! - **Daily schedule**: [`ReconciliationScheduler`] fires the reconciliation
//!   once per day at a fixed time in a named time zone.
//!
//! # Example
//!
//! ```toml
//! [reconciliation]
//! environment = "production"
//! trigger_time = "02:00"
//! time_zone = "Asia/Kolkata"
//! timeout_secs = 300
//! ```

#[cfg(test)]
mod mocks;
mod orphan_timetables;
mod scheduler;

pub use orphan_timetables::{
    DEFAULT_RECONCILE_TIMEOUT, OrphanTimetableReconciler, ReconcileError, ReconcileResult,
    reconcile,
};
pub use scheduler::{FireOutcome, ReconciliationScheduler, ScheduleError, ScheduleSettings};
