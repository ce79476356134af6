//! SQLite connection pool shared by the queue, cache and ledger.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;

use super::migrations::{MigrationError, MigrationRunner};

/// Errors that can occur while opening the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Handle to the SQLite database.
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database at `path` and applies pending
    /// migrations.
    ///
    /// The database runs in WAL mode with a busy timeout, so several
    /// processes can share the file; concurrent writers wait instead of
    /// failing with `SQLITE_BUSY`.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::info!(path = path, "Database opened");
        Ok(db)
    }

    /// Wraps an existing pool. Migrations are not applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_open_creates_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("open.db");
        let db = Database::open(path.to_str().expect("utf-8 path"))
            .await
            .expect("open");

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .expect("list tables");
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        for table in [
            super::super::schema::tables::QUEUE_ITEMS,
            super::super::schema::tables::CACHE_ENTRIES,
            super::super::schema::tables::REPLY_LEDGER,
            super::super::schema::tables::LEDGER_PARTICIPANTS,
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reopen.db");
        let path = path.to_str().expect("utf-8 path");

        let db = Database::open(path).await.expect("open");
        sqlx::query("INSERT INTO cache_entries (key, value, created_at) VALUES ('k', '1', 'now')")
            .execute(db.pool())
            .await
            .expect("insert");
        db.close().await;

        let db = Database::open(path).await.expect("reopen");
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = 'k'")
            .fetch_one(db.pool())
            .await
            .expect("select");
        let value: String = row.get("value");
        assert_eq!(value, "1");
    }
}
