//! Resume record types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ResumeError;
use crate::candidate::TargetKey;

/// Durable outcome of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// Downloaded and placed. Never reverts.
    Completed,
    /// Known not to be worth fetching (declared oversize).
    PermanentlyFailed,
}

impl ResumeOutcome {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }
}

impl fmt::Display for ResumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResumeOutcome {
    type Err = ResumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            other => Err(ResumeError::InvalidOutcome(other.to_string())),
        }
    }
}

/// One row of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRecord {
    /// Stable key of the target.
    pub target_key: TargetKey,
    /// URL at the time of recording.
    pub url: String,
    /// Outcome.
    pub outcome: ResumeOutcome,
    /// Bytes placed (completed) or declared (permanently failed).
    pub size: Option<u64>,
    /// Final path of a completed download.
    pub final_path: Option<PathBuf>,
    /// Why a target permanently failed.
    pub reason: Option<String>,
    /// UTC timestamp set by the store; `None` on records not yet written.
    pub recorded_at: Option<String>,
}

impl ResumeRecord {
    /// Record for a placed download.
    #[must_use]
    pub fn completed(
        target_key: TargetKey,
        url: impl Into<String>,
        size: u64,
        final_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target_key,
            url: url.into(),
            outcome: ResumeOutcome::Completed,
            size: Some(size),
            final_path: Some(final_path.into()),
            reason: None,
            recorded_at: None,
        }
    }

    /// Record for a target rejected on its declared size.
    #[must_use]
    pub fn permanently_failed(
        target_key: TargetKey,
        url: impl Into<String>,
        declared_size: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target_key,
            url: url.into(),
            outcome: ResumeOutcome::PermanentlyFailed,
            size: declared_size,
            final_path: None,
            reason: Some(reason.into()),
            recorded_at: None,
        }
    }

    /// Returns true for completed records.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == ResumeOutcome::Completed
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was inserted or replaced.
    Written,
    /// An existing completed row was left untouched.
    KeptCompleted,
}

/// Raw row as stored.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ResumeRow {
    pub target_key: String,
    pub url: String,
    pub outcome: String,
    pub size_bytes: Option<i64>,
    pub final_path: Option<String>,
    pub reason: Option<String>,
    pub recorded_at: String,
}

impl TryFrom<ResumeRow> for ResumeRecord {
    type Error = ResumeError;

    fn try_from(row: ResumeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            target_key: TargetKey::from_hex(row.target_key),
            url: row.url,
            outcome: row.outcome.parse()?,
            size: row.size_bytes.and_then(|size| u64::try_from(size).ok()),
            final_path: row.final_path.map(PathBuf::from),
            reason: row.reason,
            recorded_at: Some(row.recorded_at),
        })
    }
}
