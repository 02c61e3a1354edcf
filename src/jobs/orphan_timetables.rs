//! Orphaned timetable reconciliation.
//!
//! Timetable entries reference their subject by id only, and deleting a
//! subject does not cascade. This job restores the invariant that every
//! timetable entry names an existing subject:
//! 1. Read the identifiers of every subject
//! 2. Find, in one query, the entries whose subject id is not among them
//! 3. Delete those entries in one statement and report how many went
//!
//! The subject snapshot is not locked. A subject created between steps 1 and 3
//! could make a matching entry look orphaned, so the delete re-checks subject
//! existence on the store side and leaves such entries alone.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{DbError, DbPool, SubjectRepo, TimetableRepo},
    observability::metrics,
};

/// Bound on a single run when no configuration is supplied.
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of one successful reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Timetable entries the store actually removed.
    pub deleted_count: u64,
    /// Subjects present when the run took its snapshot.
    pub live_references: usize,
    /// Entries matched as orphans before the delete.
    pub orphans_found: usize,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
}

impl ReconcileResult {
    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }
}

/// Reconciliation failures. Every variant means no further deletions were
/// attempted in that run.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Data store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),

    #[error("Reconciliation did not finish within {0:?}")]
    Timeout(Duration),
}

impl ReconcileError {
    /// Both variants are store unavailability from the caller's point of view.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }

    /// Label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Finds and deletes timetable entries whose subject no longer exists.
pub struct OrphanTimetableReconciler {
    subjects: Arc<dyn SubjectRepo>,
    timetables: Arc<dyn TimetableRepo>,
    timeout: Duration,
}

impl OrphanTimetableReconciler {
    pub fn new(
        subjects: Arc<dyn SubjectRepo>,
        timetables: Arc<dyn TimetableRepo>,
        timeout: Duration,
    ) -> Self {
        Self {
            subjects,
            timetables,
            timeout,
        }
    }

    pub fn from_pool(db: &DbPool, timeout: Duration) -> Self {
        Self::new(db.subjects(), db.timetables(), timeout)
    }

    /// Run one reconciliation pass.
    ///
    /// Fails closed: any store error, or exceeding the configured timeout,
    /// ends the run before (or instead of) the delete. Safe to call again
    /// after a failure or back to back.
    pub async fn reconcile(&self) -> Result<ReconcileResult, ReconcileError> {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.run_pass()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReconcileError::Timeout(self.timeout)),
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(mut result) => {
                result.duration_ms = elapsed.as_millis() as u64;

                metrics::record_reconciliation_run("success", elapsed.as_secs_f64());
                metrics::record_reconciliation_deletions(result.deleted_count);
                metrics::record_orphans_found(result.orphans_found);

                tracing::info!(
                    live_references = result.live_references,
                    orphans_found = result.orphans_found,
                    deleted_count = result.deleted_count,
                    duration_ms = result.duration_ms,
                    "Orphaned timetable reconciliation complete"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::record_reconciliation_run(e.outcome(), elapsed.as_secs_f64());
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> Result<ReconcileResult, ReconcileError> {
        let live_ids = self.subjects.list_ids().await?;
        let orphans = self.timetables.list_orphans(&live_ids).await?;

        if orphans.is_empty() {
            return Ok(ReconcileResult {
                live_references: live_ids.len(),
                ..Default::default()
            });
        }

        let orphan_ids: Vec<Uuid> = orphans.iter().map(|o| o.id).collect();
        tracing::debug!(
            count = orphan_ids.len(),
            "Deleting orphaned timetable entries"
        );

        let deleted_count = self.timetables.delete_orphans(&orphan_ids).await?;
        if deleted_count < orphan_ids.len() as u64 {
            tracing::debug!(
                matched = orphan_ids.len(),
                deleted = deleted_count,
                "Some orphans were removed or regained their subject before the delete"
            );
        }

        Ok(ReconcileResult {
            deleted_count,
            live_references: live_ids.len(),
            orphans_found: orphans.len(),
            duration_ms: 0,
        })
    }
}

/// Run one pass against `db` with the default timeout.
pub async fn reconcile(db: &DbPool) -> Result<ReconcileResult, ReconcileError> {
    OrphanTimetableReconciler::from_pool(db, DEFAULT_RECONCILE_TIMEOUT)
        .reconcile()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::NaiveTime;

    use super::*;
    use crate::{
        jobs::mocks::{MockSubjects, MockTimetables},
        models::{CreateSubject, CreateTimetableEntry, DayOfWeek, TimetableRef},
    };

    fn mock_reconciler(
        subjects: MockSubjects,
        timetables: Arc<MockTimetables>,
    ) -> OrphanTimetableReconciler {
        OrphanTimetableReconciler::new(Arc::new(subjects), timetables, DEFAULT_RECONCILE_TIMEOUT)
    }

    #[test]
    fn test_result_serializes_deleted_count() {
        let result = ReconcileResult {
            deleted_count: 3,
            live_references: 2,
            orphans_found: 3,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["deletedCount"], 3);
        assert_eq!(json["liveReferences"], 2);
    }

    #[test]
    fn test_timeout_is_store_unavailable() {
        let err = ReconcileError::Timeout(Duration::from_secs(1));
        assert!(err.is_store_unavailable());
        assert_eq!(err.outcome(), "timeout");

        let err = ReconcileError::StoreUnavailable(DbError::Internal("down".into()));
        assert!(err.is_store_unavailable());
        assert_eq!(err.outcome(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_no_orphans_issues_no_delete() {
        let live = Uuid::new_v4();
        let timetables = Arc::new(MockTimetables::with_entries(vec![TimetableRef {
            id: Uuid::new_v4(),
            subject_id: live,
        }]));
        let reconciler = mock_reconciler(MockSubjects::with_ids(vec![live]), timetables.clone());

        let result = reconciler.reconcile().await.unwrap();

        assert_eq!(result.deleted_count, 0);
        assert_eq!(result.live_references, 1);
        assert_eq!(timetables.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_store_issues_no_delete() {
        let timetables = Arc::new(MockTimetables::with_entries(vec![]));
        let reconciler = mock_reconciler(MockSubjects::with_ids(vec![]), timetables.clone());

        let result = reconciler.reconcile().await.unwrap();

        assert_eq!(result.deleted_count, 0);
        assert_eq!(result.live_references, 0);
        assert_eq!(result.orphans_found, 0);
        assert_eq!(timetables.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_orphans_deleted_in_one_call() {
        let live = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let timetables = Arc::new(MockTimetables::with_entries(vec![
            TimetableRef { id: Uuid::new_v4(), subject_id: live },
            TimetableRef { id: Uuid::new_v4(), subject_id: gone },
            TimetableRef { id: Uuid::new_v4(), subject_id: gone },
        ]));
        let reconciler = mock_reconciler(MockSubjects::with_ids(vec![live]), timetables.clone());

        let result = reconciler.reconcile().await.unwrap();

        assert_eq!(result.deleted_count, 2);
        assert_eq!(result.orphans_found, 2);
        assert_eq!(timetables.delete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(timetables.remaining(), 1);
    }

    #[tokio::test]
    async fn test_subject_read_failure_deletes_nothing() {
        let timetables = Arc::new(MockTimetables::with_entries(vec![TimetableRef {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
        }]));
        let reconciler = mock_reconciler(MockSubjects::failing(), timetables.clone());

        let err = reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
        assert_eq!(timetables.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(timetables.remaining(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_is_store_unavailable() {
        let timetables = Arc::new(
            MockTimetables::with_entries(vec![TimetableRef {
                id: Uuid::new_v4(),
                subject_id: Uuid::new_v4(),
            }])
            .failing_delete(),
        );
        let reconciler = mock_reconciler(MockSubjects::with_ids(vec![]), timetables.clone());

        let err = reconciler.reconcile().await.unwrap_err();

        assert!(err.is_store_unavailable());
        assert_eq!(timetables.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_times_out() {
        let timetables = Arc::new(MockTimetables::with_entries(vec![]));
        let reconciler = OrphanTimetableReconciler::new(
            Arc::new(MockSubjects::hanging()),
            timetables.clone(),
            Duration::from_secs(5),
        );

        let err = reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(timetables.delete_calls.load(Ordering::SeqCst), 0);
    }

    // ── SQLite-backed runs ──────────────────────────────────────────────────

    #[cfg(feature = "database-sqlite")]
    mod sqlite {
        use super::*;
        use crate::db::tests::harness::create_sqlite_db;

        async fn subject(db: &DbPool, name: &str) -> Uuid {
            db.subjects()
                .create(CreateSubject { name: name.into() })
                .await
                .expect("Failed to create subject")
                .id
        }

        async fn entry(db: &DbPool, subject_id: Uuid) -> Uuid {
            db.timetables()
                .create(CreateTimetableEntry {
                    subject_id,
                    day_of_week: DayOfWeek::Monday,
                    start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    room: Some("B-204".into()),
                })
                .await
                .expect("Failed to create timetable entry")
                .id
        }

        #[tokio::test]
        async fn test_single_orphan_removed() {
            let db = create_sqlite_db().await;
            let a = subject(&db, "Algebra").await;
            let b = subject(&db, "Biology").await;
            let keep_a = entry(&db, a).await;
            let keep_b = entry(&db, b).await;
            let orphan = entry(&db, Uuid::new_v4()).await;

            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 1);
            assert_eq!(result.live_references, 2);
            let timetables = db.timetables();
            assert!(timetables.get_by_id(keep_a).await.unwrap().is_some());
            assert!(timetables.get_by_id(keep_b).await.unwrap().is_some());
            assert!(timetables.get_by_id(orphan).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_all_valid_untouched() {
            let db = create_sqlite_db().await;
            let a = subject(&db, "Algebra").await;
            let b = subject(&db, "Biology").await;
            entry(&db, a).await;
            entry(&db, b).await;

            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 0);
            assert_eq!(db.timetables().count().await.unwrap(), 2);
        }

        #[tokio::test]
        async fn test_no_subjects_removes_everything() {
            let db = create_sqlite_db().await;
            for _ in 0..3 {
                entry(&db, Uuid::new_v4()).await;
            }

            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 3);
            assert_eq!(result.live_references, 0);
            assert_eq!(db.timetables().count().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_empty_collections() {
            let db = create_sqlite_db().await;

            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 0);
            assert_eq!(result.orphans_found, 0);
        }

        #[tokio::test]
        async fn test_subjects_without_entries() {
            let db = create_sqlite_db().await;
            for name in ["Algebra", "Biology", "Chemistry"] {
                subject(&db, name).await;
            }

            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 0);
            assert_eq!(result.live_references, 3);
        }

        #[tokio::test]
        async fn test_unreachable_store_fails_closed() {
            let db = create_sqlite_db().await;
            entry(&db, Uuid::new_v4()).await;
            db.close().await;

            let err = reconcile(&db).await.unwrap_err();

            assert!(err.is_store_unavailable());
        }

        #[tokio::test]
        async fn test_idempotent() {
            let db = create_sqlite_db().await;
            let a = subject(&db, "Algebra").await;
            entry(&db, a).await;
            entry(&db, Uuid::new_v4()).await;
            entry(&db, Uuid::new_v4()).await;

            let first = reconcile(&db).await.unwrap();
            let second = reconcile(&db).await.unwrap();

            assert_eq!(first.deleted_count, 2);
            assert_eq!(second.deleted_count, 0);
            assert_eq!(db.timetables().count().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_deleted_subject_orphans_its_entries() {
            let db = create_sqlite_db().await;
            let a = subject(&db, "Algebra").await;
            let b = subject(&db, "Biology").await;
            entry(&db, a).await;
            entry(&db, a).await;
            let keep = entry(&db, b).await;

            db.subjects().delete(a).await.unwrap();
            let result = reconcile(&db).await.unwrap();

            assert_eq!(result.deleted_count, 2);
            let remaining = db.timetables().list_by_subject(b).await.unwrap();
            assert_eq!(remaining.len(), 1);
            assert_eq!(remaining[0].id, keep);
            assert!(db.timetables().list_by_subject(a).await.unwrap().is_empty());
        }
    }

    // ── PostgreSQL-backed run ───────────────────────────────────────────────

    #[cfg(feature = "database-postgres")]
    mod postgres {
        use super::*;
        use crate::db::tests::harness::postgres::{
            create_isolated_postgres_pool, run_postgres_migrations,
        };

        #[tokio::test]
        #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
        async fn test_reconcile_against_postgres() {
            let pool = create_isolated_postgres_pool().await;
            run_postgres_migrations(&pool).await;
            let db = DbPool::from_postgres(pool, None);

            let live = db
                .subjects()
                .create(CreateSubject { name: "Chemistry".into() })
                .await
                .unwrap()
                .id;
            for subject_id in [live, Uuid::new_v4(), Uuid::new_v4()] {
                db.timetables()
                    .create(CreateTimetableEntry {
                        subject_id,
                        day_of_week: DayOfWeek::Friday,
                        start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                        end_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
                        room: None,
                    })
                    .await
                    .unwrap();
            }

            let first = reconcile(&db).await.unwrap();
            let second = reconcile(&db).await.unwrap();

            assert_eq!(first.deleted_count, 2);
            assert_eq!(second.deleted_count, 0);
            assert_eq!(db.timetables().count().await.unwrap(), 1);
        }
    }
}
