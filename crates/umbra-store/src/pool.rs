//! Database connection pool management.
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - Versioned schema migrations applied in strict sequence at startup
//! - In-memory mode for testing

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::StoreError;

/// Migration scripts in application order. Each applies exactly once; the
/// applied set is tracked in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[("0001_initial", include_str!("migrations/0001_initial.sql"))];

/// Manages a pool of SQLite connections for the shadow store.
///
/// The pool is configured with:
/// - WAL journal mode for concurrent read access
/// - 5 max connections for file-based databases
/// - 1 connection for in-memory databases (required for data persistence)
/// - 5-second busy timeout to handle write contention
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Creates a new database pool connected to the specified file.
    ///
    /// Creates parent directories and the database file as needed, enables
    /// WAL journal mode, and applies pending schema migrations. A failed
    /// migration is fatal.
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "Database pool initialized");

        Ok(Self { pool })
    }

    /// Creates an in-memory database pool for testing.
    ///
    /// Uses a single connection to ensure data persistence across queries
    /// (SQLite in-memory databases are per-connection).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("failed to create in-memory database: {e}"))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory database pool initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies pending migrations in order. Safe to call again; already
    /// applied scripts are skipped.
    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name       TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
             );",
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("failed to create migration table: {e}")))?;

        for (name, script) in MIGRATIONS {
            let applied = sqlx::query("SELECT 1 AS present FROM schema_migrations WHERE name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("failed to query migration state: {e}"))
                })?;

            if applied.map(|row| row.get::<i64, _>("present")).is_some() {
                continue;
            }

            sqlx::raw_sql(script).execute(pool).await.map_err(|e| {
                StoreError::MigrationFailed(format!("failed to apply migration {name}: {e}"))
            })?;

            sqlx::query("INSERT INTO schema_migrations (name, applied_at) VALUES (?, strftime('%s','now'))")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    StoreError::MigrationFailed(format!("failed to record migration {name}: {e}"))
                })?;

            tracing::debug!(migration = name, "Applied schema migration");
        }

        Ok(())
    }
}
