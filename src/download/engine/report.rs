//! Run summary.

use serde::Serialize;

use super::task::{ErrorKind, OutcomeKind, TaskOutcome};
use crate::candidate::TargetKey;
use crate::classify::Classification;

/// Per-target error entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    /// Source URL.
    pub url: String,
    /// Stable key.
    pub target_key: TargetKey,
    /// Category.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub reason: String,
}

/// How many unique targets fell into each classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationCounts {
    /// Single papers.
    pub individual: usize,
    /// Aggregate volumes.
    pub proceedings: usize,
    /// Everything else.
    pub unknown: usize,
}

impl ClassificationCounts {
    pub(crate) fn record(&mut self, classification: &Classification) {
        match classification {
            Classification::Individual(_) => self.individual += 1,
            Classification::Proceedings => self.proceedings += 1,
            Classification::Unknown => self.unknown += 1,
        }
    }
}

/// Aggregated result of one run.
///
/// Every unique target lands in exactly one of `succeeded`, `skipped_resumed`,
/// `rejected_oversize`, `failed`, `cancelled` or `planned`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Targets that started at least one network attempt.
    pub attempted: usize,
    /// Targets placed in the output tree (including already present).
    pub succeeded: usize,
    /// Targets completed by an earlier run.
    pub skipped_resumed: usize,
    /// Targets refused on size.
    pub rejected_oversize: usize,
    /// Targets that gave up.
    pub failed: usize,
    /// Targets never started because the run was interrupted.
    pub cancelled: usize,
    /// Candidates dropped because their key was already planned.
    pub duplicates: usize,
    /// Dry run: targets that would be fetched.
    pub planned: usize,
    /// Retry sleeps taken across all targets.
    pub retries: usize,
    /// Bytes moved into the output tree.
    pub bytes_transferred: u64,
    /// Successful targets whose destination already existed.
    pub already_present: usize,
    /// Outcomes whose resume write was skipped or failed; a rerun repeats them.
    pub unrecorded: usize,
    /// Classification of unique targets.
    pub classification: ClassificationCounts,
    /// True when the run stopped early.
    pub interrupted: bool,
    /// One entry per non-succeeded terminal target.
    pub errors: Vec<ReportError>,
}

impl DownloadReport {
    /// Folds one terminal outcome into the counters.
    pub fn record(&mut self, outcome: &TaskOutcome) {
        if outcome.attempts > 0 {
            self.attempted += 1;
            self.retries += outcome.attempts.saturating_sub(1) as usize;
        }

        match &outcome.kind {
            OutcomeKind::Succeeded {
                bytes,
                already_present,
                ..
            } => {
                self.succeeded += 1;
                if *already_present {
                    self.already_present += 1;
                } else {
                    self.bytes_transferred += bytes;
                }
            }
            OutcomeKind::SkippedResumed => self.skipped_resumed += 1,
            OutcomeKind::Planned => self.planned += 1,
            OutcomeKind::Rejected(reason) => {
                self.rejected_oversize += 1;
                self.push_error(outcome, reason.to_string());
            }
            OutcomeKind::Failed { reason, .. } => {
                self.failed += 1;
                self.push_error(outcome, reason.clone());
            }
            OutcomeKind::Cancelled => {
                self.cancelled += 1;
                self.push_error(outcome, "run interrupted before start".to_string());
            }
        }
    }

    fn push_error(&mut self, outcome: &TaskOutcome, reason: String) {
        if let Some(kind) = outcome.error_kind() {
            self.errors.push(ReportError {
                url: outcome.url.clone(),
                target_key: outcome.target_key.clone(),
                kind,
                reason,
            });
        }
    }

    /// Unique targets accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded
            + self.skipped_resumed
            + self.rejected_oversize
            + self.failed
            + self.cancelled
            + self.planned
    }

    /// Share of attempted targets that succeeded, in percent.
    /// Returns 100 when nothing was attempted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 100.0;
        }
        let attempted_successes = self.succeeded.min(self.attempted);
        attempted_successes as f64 / self.attempted as f64 * 100.0
    }

    /// True when any target failed, was rejected or was cancelled.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
