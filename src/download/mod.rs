//! Fetching and orchestration.
//!
//! - [`AdmissionGate`] refuses targets over the size limit, before and during
//!   a transfer
//! - [`RetryPolicy`] decides, without sleeping, whether a failure is retried
//! - [`HttpClient`] streams one target into a staging file
//! - [`RateLimiter`] spaces requests to the same host
//! - [`DownloadEngine`] runs all of the above for a batch under a
//!   concurrency bound and reports the result
//!
//! # Example
//!
//! ```no_run
//! use jacow_core::download::{AdmissionGate, HttpClient, Fetcher};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let staged = client
//!     .fetch_to_staging(
//!         "https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf",
//!         Path::new("./papers/.staging/mopa001.part"),
//!         &AdmissionGate::new(50 << 20),
//!     )
//!     .await?;
//! println!("staged {} bytes", staged.bytes);
//! # Ok(())
//! # }
//! ```

pub mod admission;
mod client;
pub mod constants;
mod engine;
mod error;
pub mod rate_limiter;
mod retry;

pub use admission::{Admission, AdmissionGate, RejectReason};
pub use client::{Fetcher, HttpClient, StagedFile};
pub use engine::{
    ClassificationCounts, DEFAULT_CONCURRENCY, DownloadEngine, DownloadReport, DownloadTask,
    EngineError, ErrorKind, OutcomeCallback, OutcomeKind, ReportError, RunOptions, TaskOutcome,
    TaskState,
};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{
    DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF, FailureType, RetryDecision,
    RetryPolicy, classify_error,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
