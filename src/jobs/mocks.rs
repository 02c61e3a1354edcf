//! In-memory repositories for exercising the jobs without a database.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    db::{DbError, DbResult, SubjectRepo, TimetableRepo},
    models::{CreateSubject, CreateTimetableEntry, Subject, TimetableEntry, TimetableRef},
};

enum SubjectsBehavior {
    Ids(Vec<Uuid>),
    Fail,
    Hang,
    /// Signal `entered`, then wait for `release` before answering.
    Gate {
        ids: Vec<Uuid>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    },
}

pub struct MockSubjects {
    behavior: SubjectsBehavior,
}

impl MockSubjects {
    pub fn with_ids(ids: Vec<Uuid>) -> Self {
        Self {
            behavior: SubjectsBehavior::Ids(ids),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: SubjectsBehavior::Fail,
        }
    }

    pub fn hanging() -> Self {
        Self {
            behavior: SubjectsBehavior::Hang,
        }
    }

    pub fn gated(ids: Vec<Uuid>, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            behavior: SubjectsBehavior::Gate {
                ids,
                entered,
                release,
            },
        }
    }
}

#[async_trait]
impl SubjectRepo for MockSubjects {
    async fn create(&self, _input: CreateSubject) -> DbResult<Subject> {
        Err(DbError::Internal("not supported by mock".into()))
    }

    async fn get_by_id(&self, _id: Uuid) -> DbResult<Option<Subject>> {
        Ok(None)
    }

    async fn delete(&self, _id: Uuid) -> DbResult<()> {
        Err(DbError::NotFound)
    }

    async fn list_ids(&self) -> DbResult<Vec<Uuid>> {
        match &self.behavior {
            SubjectsBehavior::Ids(ids) => Ok(ids.clone()),
            SubjectsBehavior::Fail => Err(DbError::Internal("connection refused".into())),
            SubjectsBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(Vec::new())
            }
            SubjectsBehavior::Gate {
                ids,
                entered,
                release,
            } => {
                entered.notify_one();
                release.notified().await;
                Ok(ids.clone())
            }
        }
    }
}

pub struct MockTimetables {
    entries: Mutex<Vec<TimetableRef>>,
    fail_delete: bool,
    pub delete_calls: AtomicUsize,
}

impl MockTimetables {
    pub fn with_entries(entries: Vec<TimetableRef>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fail_delete: false,
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl TimetableRepo for MockTimetables {
    async fn create(&self, _input: CreateTimetableEntry) -> DbResult<TimetableEntry> {
        Err(DbError::Internal("not supported by mock".into()))
    }

    async fn get_by_id(&self, _id: Uuid) -> DbResult<Option<TimetableEntry>> {
        Ok(None)
    }

    async fn list_by_subject(&self, _subject_id: Uuid) -> DbResult<Vec<TimetableEntry>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> DbResult<i64> {
        Ok(self.remaining() as i64)
    }

    async fn list_orphans(&self, live_subject_ids: &[Uuid]) -> DbResult<Vec<TimetableRef>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| !live_subject_ids.contains(&e.subject_id))
            .copied()
            .collect())
    }

    async fn delete_orphans(&self, ids: &[Uuid]) -> DbResult<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete {
            return Err(DbError::Internal("connection reset".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        Ok((before - entries.len()) as u64)
    }
}
