use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_uuid, uuid_list_json};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TimetableRepo,
    },
    models::{CreateTimetableEntry, TimetableEntry, TimetableRef},
};

pub struct SqliteTimetableRepo {
    pool: SqlitePool,
}

impl SqliteTimetableRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &SqliteRow) -> DbResult<TimetableEntry> {
        let day_str: String = row.get("day_of_week");

        Ok(TimetableEntry {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            subject_id: parse_uuid(&row.get::<String, _>("subject_id"))?,
            day_of_week: day_str.parse().map_err(|e: String| DbError::Internal(e))?,
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            room: row.get("room"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TimetableRepo for SqliteTimetableRepo {
    async fn create(&self, input: CreateTimetableEntry) -> DbResult<TimetableEntry> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO timetables (id, subject_id, day_of_week, start_time, end_time, room, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.subject_id.to_string())
        .bind(input.day_of_week.as_str())
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(&input.room)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TimetableEntry {
            id,
            subject_id: input.subject_id,
            day_of_week: input.day_of_week,
            start_time: input.start_time,
            end_time: input.end_time,
            room: input.room,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<TimetableEntry>> {
        let result = sqlx::query(
            r#"
            SELECT id, subject_id, day_of_week, start_time, end_time, room, created_at
            FROM timetables
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        result.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn list_by_subject(&self, subject_id: Uuid) -> DbResult<Vec<TimetableEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, day_of_week, start_time, end_time, room, created_at
            FROM timetables
            WHERE subject_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(subject_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn count(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM timetables")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    async fn list_orphans(&self, live_subject_ids: &[Uuid]) -> DbResult<Vec<TimetableRef>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id
            FROM timetables
            WHERE subject_id NOT IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(uuid_list_json(live_subject_ids)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TimetableRef {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    subject_id: parse_uuid(&row.get::<String, _>("subject_id"))?,
                })
            })
            .collect()
    }

    async fn delete_orphans(&self, ids: &[Uuid]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM timetables
            WHERE id IN (SELECT value FROM json_each(?))
            AND NOT EXISTS (SELECT 1 FROM subjects WHERE subjects.id = timetables.subject_id)
            "#,
        )
        .bind(uuid_list_json(ids)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
