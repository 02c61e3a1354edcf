use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateTimetableEntry, TimetableEntry, TimetableRef},
};

/// Repository trait for timetable entries.
#[async_trait]
pub trait TimetableRepo: Send + Sync {
    /// Insert an entry as given. Subject existence is checked by the service
    /// layer, not here.
    async fn create(&self, input: CreateTimetableEntry) -> DbResult<TimetableEntry>;

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<TimetableEntry>>;

    async fn list_by_subject(&self, subject_id: Uuid) -> DbResult<Vec<TimetableEntry>>;

    async fn count(&self) -> DbResult<i64>;

    /// Entries whose `subject_id` is not in `live_subject_ids`, in a single
    /// query. An empty `live_subject_ids` matches every entry.
    async fn list_orphans(&self, live_subject_ids: &[Uuid]) -> DbResult<Vec<TimetableRef>>;

    /// Delete the given entries in one statement, skipping any whose subject
    /// exists at delete time. Returns the number of rows actually removed.
    async fn delete_orphans(&self, ids: &[Uuid]) -> DbResult<u64>;
}
