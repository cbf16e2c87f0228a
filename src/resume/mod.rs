//! Durable resume store backed by `SQLite`.
//!
//! The store maps a [`TargetKey`] to its last terminal outcome. It is the only
//! state that outlives a run: the orchestrator consults it before enqueuing
//! and writes to it after each placed download or declared-oversize
//! rejection. A key that reached `completed` is never rewritten.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use jacow_core::{ResumeRecord, ResumeStore, TargetKey};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ResumeStore::open(Path::new("papers/.resume.db")).await?;
//! let key = TargetKey::from_url("https://example.org/MOPA001.pdf");
//! if store.lookup(&key).await?.is_none_or(|record| !record.is_completed()) {
//!     // fetch, then:
//!     store
//!         .upsert(&ResumeRecord::completed(key, "https://example.org/MOPA001.pdf", 1024, "papers/x.pdf"))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod record;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

pub use error::{ResumeError, StoreErrorKind};
pub use record::{ResumeOutcome, ResumeRecord, UpsertOutcome};
use record::ResumeRow;

use crate::candidate::TargetKey;

/// Kept low: `SQLite` serializes writers anyway.
const MAX_CONNECTIONS: u32 = 4;

/// How long a connection waits on a lock before failing with busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Handle to the resume store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    pool: SqlitePool,
}

impl ResumeStore {
    /// Opens (creating if needed) the store at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// [`ResumeError::Open`] when the file cannot be opened and
    /// [`ResumeError::Migration`] when it is not a usable database.
    #[instrument(fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ResumeError::Open {
                    path: path.to_path_buf(),
                    source: sqlx::Error::Io(e),
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| ResumeError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("resume store ready");
        Ok(Self { pool })
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Fails only if `SQLite` itself cannot start.
    pub async fn open_in_memory() -> Result<Self, ResumeError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns the record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be read or holds an unknown outcome.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn lookup(&self, key: &TargetKey) -> Result<Option<ResumeRecord>, ResumeError> {
        let row: Option<ResumeRow> = sqlx::query_as(
            r"SELECT target_key, url, outcome, size_bytes, final_path, reason, recorded_at
              FROM resume_records WHERE target_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResumeRecord::try_from).transpose()
    }

    /// Inserts or replaces the record for `record.target_key`, unless the
    /// stored record is already completed.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be written.
    #[instrument(skip(self, record), fields(key = %record.target_key, outcome = %record.outcome))]
    pub async fn upsert(&self, record: &ResumeRecord) -> Result<UpsertOutcome, ResumeError> {
        let size = record.size.and_then(|size| i64::try_from(size).ok());
        let final_path = record
            .final_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());

        let result = sqlx::query(
            r"INSERT INTO resume_records (target_key, url, outcome, size_bytes, final_path, reason, recorded_at)
              VALUES (?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
              ON CONFLICT(target_key) DO UPDATE SET
                  url = excluded.url,
                  outcome = excluded.outcome,
                  size_bytes = excluded.size_bytes,
                  final_path = excluded.final_path,
                  reason = excluded.reason,
                  recorded_at = excluded.recorded_at
              WHERE resume_records.outcome <> 'completed'",
        )
        .bind(record.target_key.as_str())
        .bind(&record.url)
        .bind(record.outcome.as_str())
        .bind(size)
        .bind(final_path)
        .bind(&record.reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("kept existing completed record");
            Ok(UpsertOutcome::KeptCompleted)
        } else {
            Ok(UpsertOutcome::Written)
        }
    }

    /// Counts records with the given outcome.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be read.
    pub async fn count(&self, outcome: ResumeOutcome) -> Result<u64, ResumeError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM resume_records WHERE outcome = ?")
                .bind(outcome.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Closes every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
