//! Storage layer for impactrecorder.
//!
//! [`SqliteBackend`] keeps audio blobs as files under a blob directory and
//! evidence metadata in `SQLite`. It is the local stand-in for a remote object
//! store plus database; the uploader only sees [`StorageBackend`].

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::evidence::EvidenceRecord;
use crate::upload::StorageBackend;

/// Blob files plus a `SQLite` metadata database.
#[derive(Debug)]
pub struct SqliteBackend {
    /// Path to the database file.
    path: PathBuf,
    /// Directory holding one file per blob.
    blob_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at `path`, storing blobs under `blob_dir`.
    ///
    /// Creates parent directories as needed and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory can't be created, the database can't be
    /// opened, or schema initialization fails.
    pub fn open(path: impl AsRef<Path>, blob_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        let blob_dir = blob_dir.into();
        create_dir(&blob_dir)?;

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            blob_dir,
            conn: Mutex::new(conn),
        })
    }

    /// Create a backend with an in-memory database, for testing.
    ///
    /// Blobs still go to `blob_dir` on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(blob_dir: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        let blob_dir = blob_dir.into();
        create_dir(&blob_dir)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            blob_dir,
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the blob directory.
    #[must_use]
    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    /// The most recent records in `table`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent(&self, table: &str, limit: usize) -> Result<Vec<EvidenceRecord>> {
        let conn = self.conn()?;
        migrations::ensure_evidence_table(&conn, table)?;

        let mut stmt = conn.prepare(&format!(
            r"
            SELECT id, blob_key, url, latitude, longitude, captured_at,
                   chunk_count, byte_len, content_hash
            FROM {table} ORDER BY captured_at DESC, id DESC LIMIT ?1
            "
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit_i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of records in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, table: &str) -> Result<i64> {
        let conn = self.conn()?;
        migrations::ensure_evidence_table(&conn, table)?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Summary of what's stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self, table: &str) -> Result<StorageStats> {
        let total_evidence = self.count(table)?;

        let conn = self.conn()?;
        let span = |order: &str| -> Result<Option<DateTime<Utc>>> {
            let value: Option<String> = conn
                .query_row(
                    &format!("SELECT captured_at FROM {table} ORDER BY captured_at {order} LIMIT 1"),
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)))
        };
        let oldest_capture = span("ASC")?;
        let newest_capture = span("DESC")?;
        let blob_bytes: i64 = conn.query_row(
            &format!("SELECT COALESCE(SUM(byte_len), 0) FROM {table}"),
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_evidence,
            oldest_capture,
            newest_capture,
            blob_bytes: u64::try_from(blob_bytes).unwrap_or(0),
            db_size_bytes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection lock poisoned"))
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
        {
            return Err(Error::internal(format!("invalid blob key: {key}")));
        }
        Ok(self.blob_dir.join(key))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<EvidenceRecord> {
        let captured_at: String = row.get(5)?;
        let chunk_count: i64 = row.get(6)?;
        let byte_len: i64 = row.get(7)?;

        let captured_at = DateTime::parse_from_rfc3339(&captured_at)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

        Ok(EvidenceRecord {
            id: Some(row.get(0)?),
            key: row.get(1)?,
            url: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            captured_at,
            chunk_count: usize::try_from(chunk_count).unwrap_or(0),
            byte_len: usize::try_from(byte_len).unwrap_or(0),
            content_hash: row.get(8)?,
        })
    }
}

#[async_trait::async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn store_blob(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.blob_path(key)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        debug!(path = %path.display(), bytes = bytes.len(), "blob written");
        Ok(format!("file://{}", path.display()))
    }

    async fn insert_record(&self, table: &str, record: &EvidenceRecord) -> Result<()> {
        let conn = self.conn()?;
        migrations::ensure_evidence_table(&conn, table)?;

        conn.execute(
            &format!(
                r"
                INSERT INTO {table}
                    (blob_key, url, latitude, longitude, captured_at,
                     chunk_count, byte_len, content_hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "
            ),
            params![
                record.key,
                record.url,
                record.latitude,
                record.longitude,
                record.captured_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                i64::try_from(record.chunk_count).unwrap_or(i64::MAX),
                i64::try_from(record.byte_len).unwrap_or(i64::MAX),
                record.content_hash,
            ],
        )?;

        debug!(table, id = conn.last_insert_rowid(), "evidence record inserted");
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| Error::DirectoryCreate {
        path: path.to_path_buf(),
        source,
    })
}

/// Statistics about stored evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Number of evidence records.
    pub total_evidence: i64,
    /// Capture time of the oldest evidence.
    pub oldest_capture: Option<DateTime<Utc>>,
    /// Capture time of the newest evidence.
    pub newest_capture: Option<DateTime<Utc>>,
    /// Total audio bytes referenced by records.
    pub blob_bytes: u64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
