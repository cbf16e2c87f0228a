//! The per-target worker: admission, probe, fetch loop, placement.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::task::{DownloadTask, OutcomeKind, TaskOutcome, TaskState};
use super::EngineError;
use crate::classify::Classification;
use crate::download::admission::{Admission, AdmissionGate, RejectReason};
use crate::download::client::{Fetcher, StagedFile};
use crate::download::error::DownloadError;
use crate::download::rate_limiter::{RateLimiter, parse_retry_after};
use crate::download::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::organize::{Organizer, Placement};
use crate::resume::ResumeRecord;

/// Everything a worker needs, shared across all workers of a run.
pub(super) struct WorkerContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub organizer: Organizer,
    pub policy: RetryPolicy,
    pub rate_limiter: Arc<RateLimiter>,
    pub gate: AdmissionGate,
    pub probe_sizes: bool,
}

/// What a worker hands back to the orchestrating task.
pub(super) enum WorkerEvent {
    /// The task is terminal; `record` is the resume write it calls for.
    Finished {
        outcome: TaskOutcome,
        record: Option<ResumeRecord>,
    },
    /// The task hit a condition that ends the whole run.
    Fatal {
        outcome: TaskOutcome,
        error: EngineError,
    },
}

impl WorkerEvent {
    fn finished(task: &DownloadTask, kind: OutcomeKind, record: Option<ResumeRecord>) -> Self {
        Self::Finished {
            outcome: TaskOutcome::for_task(task, kind),
            record,
        }
    }
}

/// Drives one task to a terminal state.
#[instrument(skip_all, fields(url = %task.target.url, class = task.classification.label()))]
pub(super) async fn run_task(ctx: &WorkerContext, mut task: DownloadTask) -> WorkerEvent {
    task.transition(TaskState::InFlight);

    if should_probe(ctx, &task)
        && let Some(reason) = probe(ctx, &task).await
    {
        return reject(&mut task, reason);
    }

    let staged = match fetch_with_retry(ctx, &mut task).await {
        Ok(staged) => staged,
        Err(event) => return event,
    };

    match ctx.organizer.place(&task, &staged.path).await {
        Ok(placement) => {
            task.transition(TaskState::Succeeded);
            let already_present = matches!(placement, Placement::AlreadyPresent(_));
            let path = placement.path().to_path_buf();
            info!(path = %path.display(), bytes = staged.bytes, already_present, "download completed");
            let record = ResumeRecord::completed(
                task.target_key.clone(),
                task.target.url.clone(),
                staged.bytes,
                path.clone(),
            );
            WorkerEvent::finished(
                &task,
                OutcomeKind::Succeeded {
                    path,
                    bytes: staged.bytes,
                    already_present,
                },
                Some(record),
            )
        }
        Err(e) => {
            task.transition(TaskState::Failed);
            ctx.organizer.discard(&task.target_key).await;
            if e.is_storage_full() {
                let reason = e.to_string();
                return WorkerEvent::Fatal {
                    outcome: TaskOutcome::for_task(
                        &task,
                        OutcomeKind::Failed {
                            failure: FailureType::Permanent,
                            reason: reason.clone(),
                        },
                    ),
                    error: EngineError::StorageFull { reason },
                };
            }
            warn!(error = %e, "placement failed");
            WorkerEvent::finished(
                &task,
                OutcomeKind::Failed {
                    failure: FailureType::Permanent,
                    reason: e.to_string(),
                },
                None,
            )
        }
    }
}

fn should_probe(ctx: &WorkerContext, task: &DownloadTask) -> bool {
    ctx.probe_sizes
        && task.target.declared_size.is_none()
        && !matches!(task.classification, Classification::Individual(_))
}

/// Asks the server for the size. A failed probe leaves admission provisional.
async fn probe(ctx: &WorkerContext, task: &DownloadTask) -> Option<RejectReason> {
    ctx.rate_limiter.acquire(&task.target.url).await;
    match ctx.fetcher.probe_size(&task.target.url).await {
        Ok(Some(size)) => {
            debug!(size, "probed size");
            match ctx.gate.admit(Some(size)) {
                Admission::Admit => None,
                Admission::Reject(reason) => Some(reason),
            }
        }
        Ok(None) => None,
        Err(e) => {
            debug!(error = %e, "size probe failed, continuing");
            None
        }
    }
}

/// Fetches into staging, retrying per policy. On failure returns the
/// terminal event.
async fn fetch_with_retry(
    ctx: &WorkerContext,
    task: &mut DownloadTask,
) -> Result<StagedFile, WorkerEvent> {
    let url = task.target.url.clone();
    let staging_path = ctx.organizer.staging_path(&task.target_key);

    loop {
        task.attempts += 1;
        debug!(attempt = task.attempts, "attempting download");
        ctx.rate_limiter.acquire(&url).await;

        let error = match ctx
            .fetcher
            .fetch_to_staging(&url, &staging_path, &ctx.gate)
            .await
        {
            Ok(staged) => return Ok(staged),
            Err(error) => error,
        };

        if let Some(reason) = reject_reason(&error) {
            ctx.organizer.discard(&task.target_key).await;
            return Err(reject(task, reason));
        }

        if error.is_storage_full() {
            task.transition(TaskState::Failed);
            ctx.organizer.discard(&task.target_key).await;
            let reason = error.to_string();
            return Err(WorkerEvent::Fatal {
                outcome: TaskOutcome::for_task(
                    task,
                    OutcomeKind::Failed {
                        failure: FailureType::Permanent,
                        reason: reason.clone(),
                    },
                ),
                error: EngineError::StorageFull { reason },
            });
        }

        let failure = classify_error(&error);
        let retry_after = if failure == FailureType::RateLimited {
            retry_after_delay(&error, &url, &ctx.rate_limiter).await
        } else {
            None
        };

        match ctx.policy.next_action(failure, task.attempts) {
            RetryDecision::Retry { delay, attempt } => {
                let delay = retry_after.unwrap_or(delay);
                info!(
                    attempt,
                    max_attempts = ctx.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = retry_after.is_some(),
                    error = %error,
                    "retrying download"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(attempts = task.attempts, %reason, error = %error, "download failed");
                task.transition(TaskState::Failed);
                ctx.organizer.discard(&task.target_key).await;
                return Err(WorkerEvent::finished(
                    task,
                    OutcomeKind::Failed {
                        failure,
                        reason: error.to_string(),
                    },
                    None,
                ));
            }
        }
    }
}

/// Finalizes a rejected task. Only declared-size rejections are remembered
/// across runs; a streamed rejection may be a server glitch.
fn reject(task: &mut DownloadTask, reason: RejectReason) -> WorkerEvent {
    task.transition(TaskState::Rejected);
    info!(%reason, "target rejected");
    let record = rejection_record(task, &reason);
    WorkerEvent::finished(task, OutcomeKind::Rejected(reason), record)
}

/// Only a known size is remembered; a streamed overrun may succeed next time.
pub(super) fn rejection_record(task: &DownloadTask, reason: &RejectReason) -> Option<ResumeRecord> {
    match *reason {
        RejectReason::DeclaredOversize { declared, .. } => Some(ResumeRecord::permanently_failed(
            task.target_key.clone(),
            task.target.url.clone(),
            Some(declared),
            reason.to_string(),
        )),
        RejectReason::StreamedOversize { .. } => None,
    }
}

fn reject_reason(error: &DownloadError) -> Option<RejectReason> {
    match *error {
        DownloadError::DeclaredOversize {
            declared, max_size, ..
        } => Some(RejectReason::DeclaredOversize { declared, max_size }),
        DownloadError::StreamedOversize {
            bytes_read,
            max_size,
            ..
        } => Some(RejectReason::StreamedOversize {
            bytes_read,
            max_size,
        }),
        _ => None,
    }
}

/// Parses the Retry-After of a 429 and pushes the host's pacing out by it, so
/// every worker against that host backs off.
async fn retry_after_delay(
    error: &DownloadError,
    url: &str,
    rate_limiter: &RateLimiter,
) -> Option<std::time::Duration> {
    let header = error.retry_after()?;
    let delay = parse_retry_after(header)?;
    rate_limiter.record_rate_limit(url, delay).await;
    debug!(retry_after = %header, delay_ms = delay.as_millis(), "using Retry-After header delay");
    Some(delay)
}
