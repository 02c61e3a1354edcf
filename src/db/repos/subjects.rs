use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateSubject, Subject},
};

/// Repository trait for subjects, the reference side of timetable entries.
#[async_trait]
pub trait SubjectRepo: Send + Sync {
    async fn create(&self, input: CreateSubject) -> DbResult<Subject>;

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Subject>>;

    /// Delete a subject. Timetable entries pointing at it are left in place.
    async fn delete(&self, id: Uuid) -> DbResult<()>;

    /// Identifiers of every subject, unfiltered and unpaginated.
    async fn list_ids(&self) -> DbResult<Vec<Uuid>>;
}
