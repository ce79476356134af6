//! Applies [`MIGRATIONS`](super::schema::MIGRATIONS) once each, recording
//! applied names in a `_migrations` table.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use super::schema::{Migration, MIGRATIONS};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {name} failed: {source}")]
    MigrationFailed {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Runs pending migrations against a pool.
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Applies every migration not yet recorded and returns how many ran.
    ///
    /// Statements are `IF NOT EXISTS`, so a run interrupted between the
    /// statement and its record is safe to repeat.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        let pending = self.pending().await?;
        for migration in &pending {
            self.apply(migration).await?;
        }

        if !pending.is_empty() {
            tracing::info!(applied = pending.len(), "Applied schema migrations");
        }
        Ok(pending.len())
    }

    /// Migrations that have not been recorded yet, in application order.
    pub async fn pending(&self) -> Result<Vec<Migration>, MigrationError> {
        self.ensure_migrations_table().await?;
        let applied: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT name FROM _migrations")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        Ok(MIGRATIONS
            .iter()
            .filter(|m| !applied.contains(m.name))
            .copied()
            .collect())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::MigrationFailed {
                name: migration.name,
                source,
            })?;

        // Another process may have raced us to the same migration
        sqlx::query("INSERT OR IGNORE INTO _migrations (name, applied_at) VALUES (?, ?)")
            .bind(migration.name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(migration = migration.name, "Migration applied");
        Ok(())
    }

    /// Recorded migrations, oldest first.
    pub async fn list_applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_migrations_table().await?;

        let migrations: Vec<AppliedMigration> =
            sqlx::query_as("SELECT name, applied_at FROM _migrations ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(migrations)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}
