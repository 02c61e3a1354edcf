use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TimetableRepo,
    },
    models::{CreateTimetableEntry, TimetableEntry, TimetableRef},
};

pub struct PostgresTimetableRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresTimetableRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            read_pool: read_pool.unwrap_or_else(|| write_pool.clone()),
            write_pool,
        }
    }

    fn entry_from_row(row: &PgRow) -> DbResult<TimetableEntry> {
        let day_str: String = row.get("day_of_week");

        Ok(TimetableEntry {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            day_of_week: day_str.parse().map_err(|e: String| DbError::Internal(e))?,
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            room: row.get("room"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TimetableRepo for PostgresTimetableRepo {
    async fn create(&self, input: CreateTimetableEntry) -> DbResult<TimetableEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO timetables (id, subject_id, day_of_week, start_time, end_time, room)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, subject_id, day_of_week, start_time, end_time, room, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.subject_id)
        .bind(input.day_of_week.as_str())
        .bind(input.start_time)
        .bind(input.end_time)
        .bind(&input.room)
        .fetch_one(&self.write_pool)
        .await?;

        Self::entry_from_row(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<TimetableEntry>> {
        let result = sqlx::query(
            r#"
            SELECT id, subject_id, day_of_week, start_time, end_time, room, created_at
            FROM timetables
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
        .await?;

        result.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn list_by_subject(&self, subject_id: Uuid) -> DbResult<Vec<TimetableEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, day_of_week, start_time, end_time, room, created_at
            FROM timetables
            WHERE subject_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn count(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM timetables")
            .fetch_one(&self.read_pool)
            .await?;

        Ok(row.get("count"))
    }

    async fn list_orphans(&self, live_subject_ids: &[Uuid]) -> DbResult<Vec<TimetableRef>> {
        // `<> ALL('{}')` is true, so an empty live set matches every entry.
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id
            FROM timetables
            WHERE subject_id <> ALL($1)
            "#,
        )
        .bind(live_subject_ids)
        .fetch_all(&self.write_pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TimetableRef {
                id: row.get("id"),
                subject_id: row.get("subject_id"),
            })
            .collect())
    }

    async fn delete_orphans(&self, ids: &[Uuid]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM timetables t
            WHERE t.id = ANY($1)
            AND NOT EXISTS (SELECT 1 FROM subjects s WHERE s.id = t.subject_id)
            "#,
        )
        .bind(ids)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }
}
