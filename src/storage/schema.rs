//! SQLite schema statements.
//!
//! Every statement is idempotent (`IF NOT EXISTS`) and applied once through
//! the migration runner, in the order returned by [`all_schema_statements`].

/// Durable work queue. Rows are claimed, never deleted.
pub const CREATE_QUEUE_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    queue       TEXT NOT NULL,
    payload     TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    claimed_at  TEXT
)
"#;

/// Read-through cache entries, keyed by derived cache key.
pub const CREATE_CACHE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// One row per source post the bot answered or failed on.
pub const CREATE_REPLY_LEDGER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reply_ledger (
    source_post_id           TEXT PRIMARY KEY,
    response_id              TEXT,
    response_text            TEXT,
    participants             TEXT NOT NULL DEFAULT '[]',
    reply_branch_thread      TEXT NOT NULL DEFAULT '[]',
    conversation_root_thread TEXT NOT NULL DEFAULT '[]',
    created_at               TEXT NOT NULL,
    error                    TEXT
)
"#;

/// Lower-cased participant handles of each ledger entry.
pub const CREATE_LEDGER_PARTICIPANTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_participants (
    source_post_id TEXT NOT NULL REFERENCES reply_ledger(source_post_id) ON DELETE CASCADE,
    handle         TEXT NOT NULL,
    PRIMARY KEY (source_post_id, handle)
)
"#;

pub const CREATE_QUEUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_items_pending
    ON queue_items(queue, claimed_at, enqueued_at, id)
"#;

pub const CREATE_QUEUE_PAYLOAD_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_items_payload ON queue_items(queue, payload)
"#;

pub const CREATE_LEDGER_CREATED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_reply_ledger_created ON reply_ledger(created_at)
"#;

pub const CREATE_PARTICIPANT_HANDLE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_participants_handle ON ledger_participants(handle)
"#;

/// A named schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Every migration in application order.
///
/// Tables come before the indexes that reference them. Entries are only
/// ever appended; names are recorded in `_migrations` and must stay stable.
pub const MIGRATIONS: &[Migration] = &[
    Migration { name: "0001_queue_items", sql: CREATE_QUEUE_ITEMS_TABLE },
    Migration { name: "0002_cache_entries", sql: CREATE_CACHE_ENTRIES_TABLE },
    Migration { name: "0003_reply_ledger", sql: CREATE_REPLY_LEDGER_TABLE },
    Migration { name: "0004_ledger_participants", sql: CREATE_LEDGER_PARTICIPANTS_TABLE },
    Migration { name: "0005_queue_pending_index", sql: CREATE_QUEUE_INDEX },
    Migration { name: "0006_queue_payload_index", sql: CREATE_QUEUE_PAYLOAD_INDEX },
    Migration { name: "0007_ledger_created_index", sql: CREATE_LEDGER_CREATED_INDEX },
    Migration { name: "0008_participant_handle_index", sql: CREATE_PARTICIPANT_HANDLE_INDEX },
];

/// Table names in the schema.
pub mod tables {
    pub const QUEUE_ITEMS: &str = "queue_items";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const REPLY_LEDGER: &str = "reply_ledger";
    pub const LEDGER_PARTICIPANTS: &str = "ledger_participants";
}
