//! Error types for the resume store.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of `SQLite` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Busy or locked by another connection or process.
    BusyOrLocked,
    /// The file is not a database or its pages are damaged.
    Corrupt,
    /// Disk or database full.
    Full,
    /// Filesystem or transport failure.
    Io,
    /// Anything else.
    Other,
}

impl StoreErrorKind {
    /// Classifies a sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::Corrupt => "corrupt",
            Self::Full => "full",
            Self::Io => "io",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

// Primary SQLite result codes: 5 BUSY, 6 LOCKED, 11 CORRUPT, 13 FULL, 26 NOTADB.
fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreErrorKind {
    let code = database_error.code();
    match code.as_deref() {
        Some("5" | "6" | "SQLITE_BUSY" | "SQLITE_LOCKED") => return StoreErrorKind::BusyOrLocked,
        Some("11" | "26" | "SQLITE_CORRUPT" | "SQLITE_NOTADB") => return StoreErrorKind::Corrupt,
        Some("13" | "SQLITE_FULL") => return StoreErrorKind::Full,
        _ => {}
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("not a database") || message.contains("malformed") {
        StoreErrorKind::Corrupt
    } else if message.contains("locked") || message.contains("busy") {
        StoreErrorKind::BusyOrLocked
    } else {
        StoreErrorKind::Other
    }
}

/// Errors raised by [`ResumeStore`](super::ResumeStore).
#[derive(Debug, Error)]
pub enum ResumeError {
    /// The store file could not be opened.
    #[error("cannot open resume store {path}: {source}")]
    Open {
        /// Store path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: sqlx::Error,
    },

    /// Schema migration failed, typically because the file is not a database.
    #[error("resume store schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A query failed.
    #[error("resume store error ({kind}): {message}")]
    Database {
        /// Classification.
        kind: StoreErrorKind,
        /// Driver message.
        message: String,
    },

    /// A stored row holds an outcome this version does not know.
    #[error("resume store holds unknown outcome {0:?}")]
    InvalidOutcome(String),
}

impl From<sqlx::Error> for ResumeError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreErrorKind::from_sqlx(&error),
            message: error.to_string(),
        }
    }
}

impl ResumeError {
    /// Returns the classification for query failures.
    #[must_use]
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            Self::Database { kind, .. } => *kind,
            Self::Open { source, .. } => StoreErrorKind::from_sqlx(source),
            Self::Migration(_) | Self::InvalidOutcome(_) => StoreErrorKind::Corrupt,
        }
    }
}
