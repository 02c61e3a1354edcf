use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::SubjectRepo,
    },
    models::{CreateSubject, Subject},
};

pub struct PostgresSubjectRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresSubjectRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        Self {
            read_pool: read_pool.unwrap_or_else(|| write_pool.clone()),
            write_pool,
        }
    }
}

#[async_trait]
impl SubjectRepo for PostgresSubjectRepo {
    async fn create(&self, input: CreateSubject) -> DbResult<Subject> {
        let row = sqlx::query(
            r#"
            INSERT INTO subjects (id, name)
            VALUES ($1, $2)
            RETURNING id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .fetch_one(&self.write_pool)
        .await?;

        Ok(Subject {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Subject>> {
        let result = sqlx::query(
            r#"
            SELECT id, name, created_at
            FROM subjects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(result.map(|row| Subject {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM subjects WHERE id = $1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // Reads from the primary: a lagging replica would make live subjects look
    // deleted and their timetable entries look orphaned.
    async fn list_ids(&self) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM subjects")
            .fetch_all(&self.write_pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}
