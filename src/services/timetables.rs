use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{DbError, DbPool, DbResult},
    models::{CreateTimetableEntry, TimetableEntry},
};

/// Service layer for timetable writes.
///
/// Rejects entries that point at a missing subject. This only prevents new
/// orphans; entries orphaned later by a subject deletion are removed by
/// [`crate::jobs::OrphanTimetableReconciler`].
#[derive(Clone)]
pub struct TimetableService {
    db: Arc<DbPool>,
}

impl TimetableService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Create a timetable entry after checking that its subject exists
    pub async fn create(&self, input: CreateTimetableEntry) -> DbResult<TimetableEntry> {
        input
            .validate()
            .map_err(|e| DbError::Validation(e.to_string()))?;

        if self.db.subjects().get_by_id(input.subject_id).await?.is_none() {
            return Err(DbError::Validation(format!(
                "Subject {} does not exist",
                input.subject_id
            )));
        }

        self.db.timetables().create(input).await
    }

    /// Get a timetable entry by ID
    pub async fn get_by_id(&self, id: Uuid) -> DbResult<Option<TimetableEntry>> {
        self.db.timetables().get_by_id(id).await
    }

    /// List entries scheduled for a subject
    pub async fn list_by_subject(&self, subject_id: Uuid) -> DbResult<Vec<TimetableEntry>> {
        self.db.timetables().list_by_subject(subject_id).await
    }
}
