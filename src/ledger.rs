//! Reply ledger: one record per source post the bot answered or failed on.
//!
//! The ledger is the de-duplication gate of the reply pipeline. A post with
//! an entry is not answered again; an error-only entry keeps a permanently
//! failing post from being retried until an operator clears it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;

use crate::conversation::ThreadResult;
use crate::social::PostWithContext;

/// Errors raised by the reply ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),
}

/// The reply that was published for a source post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePost {
    pub id: String,
    pub text: String,
}

/// A ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source_post_id: String,
    /// `None` for error-only entries.
    pub response: Option<ResponsePost>,
    pub participants: Vec<String>,
    pub reply_branch_thread: Vec<PostWithContext>,
    pub conversation_root_thread: Vec<PostWithContext>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl LedgerEntry {
    /// Entry for a published reply.
    ///
    /// The published reply is appended to the reply branch so later
    /// prompts see the bot's own turn.
    pub fn success(
        source_post_id: impl Into<String>,
        response: ResponsePost,
        participants: Vec<String>,
        threads: ThreadResult,
        bot_post: Option<PostWithContext>,
    ) -> Self {
        let mut reply_branch_thread = threads.reply_branch_thread;
        reply_branch_thread.extend(bot_post);
        Self {
            source_post_id: source_post_id.into(),
            response: Some(response),
            participants,
            reply_branch_thread,
            conversation_root_thread: threads.conversation_root_thread,
            created_at: Utc::now(),
            error: None,
        }
    }

    /// Whether a reply was published for the source post.
    pub fn is_success(&self) -> bool {
        self.response.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// SQLite-backed reply ledger.
#[derive(Clone)]
pub struct ReplyLedger {
    pool: SqlitePool,
}

const ENTRY_COLUMNS: &str = "l.source_post_id, l.response_id, l.response_text, l.participants, \
     l.reply_branch_thread, l.conversation_root_thread, l.created_at, l.error";

impl ReplyLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry, LedgerError> {
        let response_id: Option<String> = row.try_get("response_id")?;
        let response_text: Option<String> = row.try_get("response_text")?;
        let participants: String = row.try_get("participants")?;
        let reply_branch: String = row.try_get("reply_branch_thread")?;
        let root_thread: String = row.try_get("conversation_root_thread")?;

        Ok(LedgerEntry {
            source_post_id: row.try_get("source_post_id")?,
            response: response_id.map(|id| ResponsePost {
                id,
                text: response_text.unwrap_or_default(),
            }),
            participants: serde_json::from_str(&participants)?,
            reply_branch_thread: serde_json::from_str(&reply_branch)?,
            conversation_root_thread: serde_json::from_str(&root_thread)?,
            created_at: row.try_get("created_at")?,
            error: row.try_get("error")?,
        })
    }

    /// Returns the entry for `source_post_id`, if any.
    pub async fn read(&self, source_post_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM reply_ledger l WHERE l.source_post_id = ?"
        ))
        .bind(source_post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Entries involving any of `handles`, most recent first.
    pub async fn find_by_participants(
        &self,
        handles: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM reply_ledger l WHERE l.source_post_id IN \
             (SELECT source_post_id FROM ledger_participants WHERE handle IN ("
        ));
        let mut separated = qb.separated(", ");
        for handle in handles {
            separated.push_bind(handle.to_lowercase());
        }
        separated.push_unseparated(")) ORDER BY l.created_at DESC, l.rowid DESC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    /// The `limit` most recent entries.
    pub async fn latest(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM reply_ledger l \
             ORDER BY l.created_at DESC, l.rowid DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Records a published reply, replacing any earlier entry for the same
    /// source post and clearing its error.
    pub async fn store(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let response = entry.response.as_ref().ok_or_else(|| {
            LedgerError::InvalidEntry(format!(
                "entry for {} has no response; use record_error",
                entry.source_post_id
            ))
        })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO reply_ledger (
                source_post_id, response_id, response_text, participants,
                reply_branch_thread, conversation_root_thread, created_at, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(source_post_id) DO UPDATE SET
                response_id = excluded.response_id,
                response_text = excluded.response_text,
                participants = excluded.participants,
                reply_branch_thread = excluded.reply_branch_thread,
                conversation_root_thread = excluded.conversation_root_thread,
                created_at = excluded.created_at,
                error = NULL
            "#,
        )
        .bind(&entry.source_post_id)
        .bind(&response.id)
        .bind(&response.text)
        .bind(serde_json::to_string(&entry.participants)?)
        .bind(serde_json::to_string(&entry.reply_branch_thread)?)
        .bind(serde_json::to_string(&entry.conversation_root_thread)?)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM ledger_participants WHERE source_post_id = ?")
            .bind(&entry.source_post_id)
            .execute(&mut *tx)
            .await?;

        for handle in &entry.participants {
            sqlx::query(
                "INSERT OR IGNORE INTO ledger_participants (source_post_id, handle) VALUES (?, ?)",
            )
            .bind(&entry.source_post_id)
            .bind(handle.to_lowercase())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            post_id = %entry.source_post_id,
            response_id = %response.id,
            participants = entry.participants.len(),
            "Ledger entry stored"
        );
        Ok(())
    }

    /// Attaches `message` to the entry for `source_post_id`, creating an
    /// error-only entry when none exists.
    pub async fn record_error(&self, source_post_id: &str, message: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO reply_ledger (source_post_id, created_at, error) VALUES (?, ?, ?)
            ON CONFLICT(source_post_id) DO UPDATE SET error = excluded.error
            "#,
        )
        .bind(source_post_id)
        .bind(Utc::now())
        .bind(message)
        .execute(&self.pool)
        .await?;

        tracing::debug!(post_id = %source_post_id, error = %message, "Ledger error recorded");
        Ok(())
    }

    /// Makes a failed post eligible for processing again.
    ///
    /// Error-only entries are deleted; entries with a response only lose
    /// their error. Returns whether anything changed.
    pub async fn clear_error(&self, source_post_id: &str) -> Result<bool, LedgerError> {
        let deleted = sqlx::query(
            "DELETE FROM reply_ledger WHERE source_post_id = ? AND response_id IS NULL",
        )
        .bind(source_post_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if deleted > 0 {
            return Ok(true);
        }

        let updated = sqlx::query(
            "UPDATE reply_ledger SET error = NULL WHERE source_post_id = ? AND error IS NOT NULL",
        )
        .bind(source_post_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}
