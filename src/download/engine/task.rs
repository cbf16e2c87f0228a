//! Per-target task state and terminal outcomes.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::candidate::{CandidateLink, TargetKey};
use crate::classify::Classification;
use crate::download::admission::RejectReason;
use crate::download::retry::FailureType;

/// Lifecycle of a task within one run.
///
/// `Pending -> InFlight -> Succeeded | Rejected | Failed`. A task rejected on
/// a declared or remembered oversize goes `Pending -> Rejected` without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Planned, not started.
    Pending,
    /// Holding a worker permit.
    InFlight,
    /// Placed in the output tree.
    Succeeded,
    /// Refused by the admission gate.
    Rejected,
    /// Gave up after the retry policy said stop.
    Failed,
}

impl TaskState {
    /// Returns true for states a task never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Rejected | Self::Failed)
    }

    fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight | Self::Rejected)
                | (Self::InFlight, Self::Succeeded | Self::Rejected | Self::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One unique target scheduled by the orchestrator.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// The link being fetched.
    pub target: CandidateLink,
    /// Stable identity, shared with the resume store.
    pub target_key: TargetKey,
    /// Classifier verdict.
    pub classification: Classification,
    /// Network attempts made so far.
    pub attempts: u32,
    state: TaskState,
}

impl DownloadTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(target: CandidateLink, classification: Classification) -> Self {
        let target_key = target.target_key();
        Self {
            target,
            target_key,
            classification,
            attempts: 0,
            state: TaskState::Pending,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: TaskState) -> bool {
        if self.state.can_become(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Category of a report error entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retries exhausted on network-level or 5xx failures.
    Transient,
    /// Retries exhausted on 429 responses.
    RateLimited,
    /// Not retryable: 4xx, bad URL, TLS, staging I/O.
    Permanent,
    /// Advertised size over the limit.
    OversizeDeclared,
    /// Body crossed the limit mid-transfer.
    OversizeStreamed,
    /// Never started because the run was interrupted.
    Cancelled,
}

impl From<FailureType> for ErrorKind {
    fn from(failure: FailureType) -> Self {
        match failure {
            FailureType::Transient => Self::Transient,
            FailureType::RateLimited => Self::RateLimited,
            FailureType::Permanent => Self::Permanent,
        }
    }
}

impl From<&RejectReason> for ErrorKind {
    fn from(reason: &RejectReason) -> Self {
        match reason {
            RejectReason::DeclaredOversize { .. } => Self::OversizeDeclared,
            RejectReason::StreamedOversize { .. } => Self::OversizeStreamed,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Permanent => "permanent",
            Self::OversizeDeclared => "oversize_declared",
            Self::OversizeStreamed => "oversize_streamed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// How a target ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Fetched and placed, or found already placed on disk.
    Succeeded {
        /// Final location.
        path: PathBuf,
        /// Bytes transferred.
        bytes: u64,
        /// True when the destination already existed.
        already_present: bool,
    },
    /// Completed in an earlier run.
    SkippedResumed,
    /// Refused on size.
    Rejected(RejectReason),
    /// Gave up.
    Failed {
        /// Last failure classification.
        failure: FailureType,
        /// Last error message.
        reason: String,
    },
    /// Never started.
    Cancelled,
    /// Dry run: would be fetched.
    Planned,
}

/// Terminal event for one target, delivered to the report and the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Source URL.
    pub url: String,
    /// Stable key.
    pub target_key: TargetKey,
    /// Classifier verdict.
    pub classification: Classification,
    /// Network attempts made.
    pub attempts: u32,
    /// Result.
    pub kind: OutcomeKind,
}

impl TaskOutcome {
    pub(crate) fn for_task(task: &DownloadTask, kind: OutcomeKind) -> Self {
        Self {
            url: task.target.url.clone(),
            target_key: task.target_key.clone(),
            classification: task.classification.clone(),
            attempts: task.attempts,
            kind,
        }
    }

    /// Report error category, `None` for non-error outcomes.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.kind {
            OutcomeKind::Rejected(reason) => Some(reason.into()),
            OutcomeKind::Failed { failure, .. } => Some((*failure).into()),
            OutcomeKind::Cancelled => Some(ErrorKind::Cancelled),
            OutcomeKind::Succeeded { .. } | OutcomeKind::SkippedResumed | OutcomeKind::Planned => {
                None
            }
        }
    }
}
