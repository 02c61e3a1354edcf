use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::SubjectRepo,
    },
    models::{CreateSubject, Subject},
};

pub struct SqliteSubjectRepo {
    pool: SqlitePool,
}

impl SqliteSubjectRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubjectRepo for SqliteSubjectRepo {
    async fn create(&self, input: CreateSubject) -> DbResult<Subject> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO subjects (id, name, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Subject {
            id,
            name: input.name,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Subject>> {
        let result = sqlx::query(
            r#"
            SELECT id, name, created_at
            FROM subjects
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match result {
            Some(row) => Ok(Some(Subject {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                name: row.get("name"),
                created_at: row.get("created_at"),
            })),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM subjects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn list_ids(&self) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM subjects")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect()
    }
}
