//! `SQLite` schema definitions for impactrecorder.
//!
//! Evidence tables share one layout; their name comes from configuration, so
//! the statements are templates rather than constants.

use regex::Regex;

/// Table evidence records go to unless configured otherwise.
pub const DEFAULT_EVIDENCE_TABLE: &str = "crash_evidence";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Whether `name` can be interpolated into SQL as a table name.
#[must_use]
pub fn is_valid_table_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").is_ok_and(|re| re.is_match(name))
}

/// Statements creating an evidence table and its indexes.
///
/// `table` must pass [`is_valid_table_name`].
#[must_use]
pub fn evidence_table_statements(table: &str) -> Vec<String> {
    vec![
        format!(
            r"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    blob_key TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    captured_at TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    byte_len INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_captured_at ON {table}(captured_at DESC)"
        ),
    ]
}
