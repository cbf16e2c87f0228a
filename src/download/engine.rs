//! Download orchestrator.
//!
//! [`DownloadEngine::run`] takes a batch of candidate links and drives every
//! unique target to a terminal state:
//!
//! 1. classify, key, and deduplicate the candidates
//! 2. drop targets the resume store already marks completed, and reject those
//!    it remembers or declares as oversize (unless the limit has since been
//!    raised)
//! 3. spawn one worker per remaining target under a semaphore bound
//! 4. fold worker events into the report and the resume store, one at a time
//!
//! Workers never touch the resume store or the report directly: they send a
//! [`TaskOutcome`] plus the record it calls for over a channel, and the
//! orchestrating task applies them in arrival order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jacow_core::download::{AdmissionGate, DownloadEngine, HttpClient, RateLimiter, RetryPolicy, RunOptions};
//! use jacow_core::organize::{Layout, Organizer};
//! use jacow_core::{CandidateLink, ResumeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//! let engine = DownloadEngine::new(3, RetryPolicy::default(), rate_limiter, AdmissionGate::new(50 << 20))?;
//! let store = ResumeStore::open_in_memory().await?;
//! let organizer = Organizer::new("./papers", Layout::Session);
//! let candidates = vec![CandidateLink::new("https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf")];
//!
//! let report = engine
//!     .run(candidates, &store, Arc::new(HttpClient::new()?), &organizer, RunOptions::default())
//!     .await?;
//! println!("{} succeeded, {} failed", report.succeeded, report.failed);
//! # Ok(())
//! # }
//! ```

mod report;
mod task;
mod worker;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

pub use report::{ClassificationCounts, DownloadReport, ReportError};
pub use task::{DownloadTask, ErrorKind, OutcomeKind, TaskOutcome, TaskState};

use super::admission::{Admission, AdmissionGate, RejectReason};
use super::client::Fetcher;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::candidate::CandidateLink;
use crate::classify::Classifier;
use crate::organize::Organizer;
use crate::resume::{ResumeError, ResumeOutcome, ResumeRecord, ResumeStore};
use worker::{WorkerContext, WorkerEvent, rejection_record, run_task};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// How often a blocked scheduler re-checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Conditions that end a whole run.
///
/// Per-target failures never surface here; they go to the report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The resume store could not be read or written.
    #[error("resume store error: {0}")]
    ResumeStore(#[from] ResumeError),

    /// The disk holding staging or the output tree is full.
    #[error("storage exhausted: {reason}")]
    StorageFull {
        /// Error that revealed it.
        reason: String,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Terminal-outcome callback, invoked once per target on the orchestrating task.
pub type OutcomeCallback = Arc<dyn Fn(&TaskOutcome) + Send + Sync>;

/// Per-run knobs that are not part of the engine's configuration.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Set to stop scheduling new targets.
    pub interrupted: Arc<AtomicBool>,
    /// Called for every terminal outcome.
    pub on_outcome: Option<OutcomeCallback>,
}

impl RunOptions {
    /// Options with a shared interrupt flag.
    #[must_use]
    pub fn with_interrupt(interrupted: Arc<AtomicBool>) -> Self {
        Self {
            interrupted,
            on_outcome: None,
        }
    }

    /// Adds a terminal-outcome callback.
    #[must_use]
    pub fn with_callback(mut self, callback: OutcomeCallback) -> Self {
        self.on_outcome = Some(callback);
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn notify(&self, outcome: &TaskOutcome) {
        if let Some(callback) = &self.on_outcome {
            callback(outcome);
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("interrupted", &self.is_interrupted())
            .field("on_outcome", &self.on_outcome.is_some())
            .finish()
    }
}

/// Orchestrates concurrent, size-gated, resumable downloads.
///
/// # Concurrency Model
///
/// - Each target runs in its own Tokio task holding an owned semaphore permit
/// - Permits are released when the task ends (RAII)
/// - Every network call goes through the shared per-host [`RateLimiter`]
/// - Resume writes and report updates happen on the calling task only
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    gate: AdmissionGate,
    classifier: Classifier,
    probe_sizes: bool,
}

/// Outcome of the planning phase.
struct Plan {
    runnable: Vec<DownloadTask>,
    /// Decided without a fetch, with the resume write each one calls for.
    settled: Vec<(TaskOutcome, Option<ResumeRecord>)>,
}

/// Whether planning may move tasks out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanMode {
    Run,
    Dry,
}

impl DownloadEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is outside
    /// 1..=100.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use jacow_core::download::{AdmissionGate, DownloadEngine, RateLimiter, RetryPolicy};
    ///
    /// let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
    /// let engine = DownloadEngine::new(3, RetryPolicy::default(), rate_limiter, AdmissionGate::new(1 << 20)).unwrap();
    /// assert_eq!(engine.concurrency(), 3);
    /// ```
    #[instrument(level = "debug", skip(retry_policy, rate_limiter))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
        gate: AdmissionGate,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            delay_ms = rate_limiter.delay().as_millis(),
            pacing_disabled = rate_limiter.is_disabled(),
            max_size = gate.max_size(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            rate_limiter,
            gate,
            classifier: Classifier::default(),
            probe_sizes: true,
        })
    }

    /// Replaces the default classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Enables or disables HEAD probes for unsized non-paper targets.
    #[must_use]
    pub fn with_size_probe(mut self, enabled: bool) -> Self {
        self.probe_sizes = enabled;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the admission gate.
    #[must_use]
    pub fn gate(&self) -> AdmissionGate {
        self.gate
    }

    /// Downloads every unique target among `candidates`.
    ///
    /// Returns once every scheduled target is terminal. Staging leftovers are
    /// swept before returning.
    ///
    /// # Errors
    ///
    /// [`EngineError::ResumeStore`] when the store fails,
    /// [`EngineError::StorageFull`] when the disk fills up and
    /// [`EngineError::SemaphoreClosed`] if the pool is closed. In-flight
    /// targets are allowed to finish before the error is returned.
    #[instrument(skip_all, fields(candidates = candidates.len(), root = %organizer.output_root().display()))]
    pub async fn run(
        &self,
        candidates: Vec<CandidateLink>,
        store: &ResumeStore,
        fetcher: Arc<dyn Fetcher>,
        organizer: &Organizer,
        options: RunOptions,
    ) -> Result<DownloadReport, EngineError> {
        let mut report = DownloadReport::default();

        if let Err(e) = organizer.sweep_staging().await {
            warn!(error = %e, "cannot sweep staging before run");
        }

        let plan = self
            .plan(candidates, Some(store), &mut report, PlanMode::Run)
            .await?;
        let mut fatal: Option<EngineError> = None;
        for (outcome, record) in plan.settled {
            self.settle(
                WorkerEvent::Finished { outcome, record },
                store,
                &mut report,
                &options,
                &mut fatal,
            )
            .await;
        }

        info!(
            scheduled = plan.runnable.len(),
            skipped_resumed = report.skipped_resumed,
            duplicates = report.duplicates,
            "starting downloads"
        );

        let ctx = Arc::new(WorkerContext {
            fetcher,
            organizer: organizer.clone(),
            policy: self.retry_policy.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            gate: self.gate,
            probe_sizes: self.probe_sizes,
        });
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut handles = Vec::new();
        let mut queue = plan.runnable.into_iter();

        while let Some(task) = queue.next() {
            let permit = match self
                .next_permit(&mut rx, store, &mut report, &options, &mut fatal)
                .await
            {
                Ok(Some(permit)) => permit,
                Ok(None) => {
                    self.cancel(task, queue.by_ref(), &mut report, &options);
                    break;
                }
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                    self.cancel(task, queue.by_ref(), &mut report, &options);
                    break;
                }
            };

            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let event = run_task(&ctx, task).await;
                // The receiver outlives every worker.
                let _ = tx.send(event);
            }));
        }

        drop(tx);
        debug!(task_count = handles.len(), "waiting for downloads to complete");
        while let Some(event) = rx.recv().await {
            self.settle(event, store, &mut report, &options, &mut fatal)
                .await;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
            }
        }

        report.interrupted = options.is_interrupted() || report.cancelled > 0;
        match organizer.sweep_staging().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "removed leftover staging files"),
            Err(e) => warn!(error = %e, "cannot sweep staging after run"),
        }

        if let Some(error) = fatal {
            warn!(error = %error, unrecorded = report.unrecorded, "run aborted");
            return Err(error);
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped_resumed = report.skipped_resumed,
            rejected_oversize = report.rejected_oversize,
            failed = report.failed,
            cancelled = report.cancelled,
            retries = report.retries,
            "run complete"
        );
        Ok(report)
    }

    /// Plans a run without fetching or writing anything.
    ///
    /// Targets that would be fetched are counted as `planned`; declared
    /// oversize targets as rejected. No task leaves `Pending` and `store` is
    /// only read.
    ///
    /// # Errors
    ///
    /// [`EngineError::ResumeStore`] when a lookup fails.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn dry_run(
        &self,
        candidates: Vec<CandidateLink>,
        store: Option<&ResumeStore>,
    ) -> Result<DownloadReport, EngineError> {
        let mut report = DownloadReport::default();
        let plan = self.plan(candidates, store, &mut report, PlanMode::Dry).await?;
        for (outcome, _) in &plan.settled {
            report.record(outcome);
        }
        for task in &plan.runnable {
            report.record(&TaskOutcome::for_task(task, OutcomeKind::Planned));
        }
        info!(
            planned = report.planned,
            skipped_resumed = report.skipped_resumed,
            rejected_oversize = report.rejected_oversize,
            duplicates = report.duplicates,
            "dry run complete"
        );
        Ok(report)
    }

    /// Classifies, deduplicates, filters against the resume store and
    /// rejects declared oversize targets before any worker slot is taken.
    async fn plan(
        &self,
        candidates: Vec<CandidateLink>,
        store: Option<&ResumeStore>,
        report: &mut DownloadReport,
        mode: PlanMode,
    ) -> Result<Plan, EngineError> {
        let mut seen = HashSet::new();
        let mut plan = Plan {
            runnable: Vec::new(),
            settled: Vec::new(),
        };

        for candidate in candidates {
            let classification = self.classifier.classify(&candidate);
            let mut task = DownloadTask::new(candidate, classification);
            if !seen.insert(task.target_key.clone()) {
                debug!(url = %task.target.url, "duplicate target dropped");
                report.duplicates += 1;
                continue;
            }
            report.classification.record(&task.classification);

            let record = match store {
                Some(store) => store.lookup(&task.target_key).await?,
                None => None,
            };
            match record {
                Some(record) if record.outcome == ResumeOutcome::Completed => {
                    debug!(url = %task.target.url, "already completed, skipping");
                    plan.settled.push((
                        TaskOutcome::for_task(&task, OutcomeKind::SkippedResumed),
                        None,
                    ));
                }
                Some(record)
                    if record.outcome == ResumeOutcome::PermanentlyFailed
                        && record.size.is_some_and(|size| size > self.gate.max_size()) =>
                {
                    let reason = RejectReason::DeclaredOversize {
                        declared: record.size.unwrap_or_default(),
                        max_size: self.gate.max_size(),
                    };
                    debug!(url = %task.target.url, %reason, "remembered oversize, skipping");
                    if mode == PlanMode::Run {
                        task.transition(TaskState::Rejected);
                    }
                    plan.settled.push((
                        TaskOutcome::for_task(&task, OutcomeKind::Rejected(reason)),
                        None,
                    ));
                }
                _ => match self.gate.admit(task.target.declared_size) {
                    Admission::Admit => plan.runnable.push(task),
                    Admission::Reject(reason) => {
                        info!(url = %task.target.url, %reason, "target rejected");
                        let record = match mode {
                            PlanMode::Run => {
                                task.transition(TaskState::Rejected);
                                rejection_record(&task, &reason)
                            }
                            PlanMode::Dry => None,
                        };
                        plan.settled.push((
                            TaskOutcome::for_task(&task, OutcomeKind::Rejected(reason)),
                            record,
                        ));
                    }
                },
            }
        }
        Ok(plan)
    }

    /// Waits for a worker slot while applying worker events and watching the
    /// interrupt flag. `Ok(None)` means stop scheduling.
    async fn next_permit(
        &self,
        rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        store: &ResumeStore,
        report: &mut DownloadReport,
        options: &RunOptions,
        fatal: &mut Option<EngineError>,
    ) -> Result<Option<OwnedSemaphorePermit>, EngineError> {
        loop {
            if options.is_interrupted() {
                info!("interrupt received, no new downloads will start");
                return Ok(None);
            }
            if fatal.is_some() {
                return Ok(None);
            }

            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    self.settle(event, store, report, options, fatal).await;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    return permit.map(Some).map_err(|_| EngineError::SemaphoreClosed);
                }
                () = tokio::time::sleep(INTERRUPT_POLL) => {}
            }
        }
    }

    /// Applies one worker event: resume write, report, callback.
    async fn settle(
        &self,
        event: WorkerEvent,
        store: &ResumeStore,
        report: &mut DownloadReport,
        options: &RunOptions,
        fatal: &mut Option<EngineError>,
    ) {
        let outcome = match event {
            WorkerEvent::Finished { outcome, record } => {
                if let Some(record) = record {
                    if fatal.is_some() {
                        warn!(url = %outcome.url, "run aborting, outcome not recorded");
                        report.unrecorded += 1;
                    } else if let Err(e) = store.upsert(&record).await {
                        warn!(url = %outcome.url, error = %e, "cannot record outcome");
                        report.unrecorded += 1;
                        *fatal = Some(EngineError::ResumeStore(e));
                    }
                }
                outcome
            }
            WorkerEvent::Fatal { outcome, error } => {
                warn!(url = %outcome.url, error = %error, "fatal condition");
                if fatal.is_none() {
                    *fatal = Some(error);
                }
                outcome
            }
        };
        report.record(&outcome);
        options.notify(&outcome);
    }

    /// Reports `first` and everything left in `rest` as cancelled.
    fn cancel(
        &self,
        first: DownloadTask,
        rest: impl Iterator<Item = DownloadTask>,
        report: &mut DownloadReport,
        options: &RunOptions,
    ) {
        let mut cancelled = 0usize;
        for task in std::iter::once(first).chain(rest) {
            let outcome = TaskOutcome::for_task(&task, OutcomeKind::Cancelled);
            report.record(&outcome);
            options.notify(&outcome);
            cancelled += 1;
        }
        debug!(cancelled, concurrency = self.concurrency, "cancelled unstarted targets");
    }
}
