mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    subjects: Arc<dyn SubjectRepo>,
    timetables: Arc<dyn TimetableRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            subjects: Arc::new(sqlite::SqliteSubjectRepo::new(pool.clone())),
            timetables: Arc::new(sqlite::SqliteTimetableRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            subjects: Arc::new(postgres::PostgresSubjectRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            timetables: Arc::new(postgres::PostgresTimetableRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Connect to the database named by `[database]`.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => Ok(Self::from_sqlite(connect_sqlite(cfg).await?)),
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let (write, read) = connect_postgres(cfg).await?;
                Ok(Self::from_postgres(write, read))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get subject repository
    pub fn subjects(&self) -> Arc<dyn SubjectRepo> {
        Arc::clone(&self.repos.subjects)
    }

    /// Get timetable repository
    pub fn timetables(&self) -> Arc<dyn TimetableRepo> {
        Arc::clone(&self.repos.timetables)
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Close every pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                pools.write.close().await;
                if let Some(read) = &pools.read {
                    read.close().await;
                }
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}

#[cfg(feature = "database-sqlite")]
async fn connect_sqlite(cfg: &crate::config::SqliteConfig) -> DbResult<sqlx::SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

    let journal_mode = match cfg.wal_mode {
        true => SqliteJournalMode::Wal,
        false => SqliteJournalMode::Delete,
    };
    let options = SqliteConnectOptions::new()
        .filename(&cfg.path)
        .create_if_missing(cfg.create_if_missing)
        .journal_mode(journal_mode)
        .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect_with(options)
        .await?;

    tracing::debug!(path = %cfg.path, wal = cfg.wal_mode, "Connected to SQLite");
    Ok(pool)
}

#[cfg(feature = "database-postgres")]
async fn connect_postgres(
    cfg: &crate::config::PostgresConfig,
) -> DbResult<(sqlx::PgPool, Option<sqlx::PgPool>)> {
    use std::time::Duration;

    let options = sqlx::postgres::PgPoolOptions::new()
        .min_connections(cfg.min_connections)
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs));

    let write = options.clone().connect(&cfg.url).await?;
    let read = match &cfg.read_url {
        Some(url) => {
            tracing::info!("Connecting read replica pool");
            Some(options.connect(url).await?)
        }
        None => None,
    };

    Ok((write, read))
}
