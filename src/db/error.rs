use thiserror::Error;

/// Errors from the subjects/timetables store.
#[derive(Debug, Error)]
pub enum DbError {
    /// `[database]` is missing from the configuration.
    #[error("No database configured")]
    NotConfigured,

    #[error("Record not found")]
    NotFound,

    /// Input rejected before reaching the store.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Store query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Encoding a bound id list failed.
    #[error("Parameter encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored data did not decode (bad UUID, unknown weekday).
    #[error("Corrupt row: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
