//! Proceedings paper downloader core library
//!
//! Takes candidate links discovered on conference-proceedings pages, tells
//! individual papers apart from whole-volume proceedings, fetches them under a
//! concurrency bound with retry and a size gate, and files the results into a
//! deterministic tree. A SQLite resume store makes reruns skip finished work.
//!
//! # Architecture
//!
//! - [`candidate`] - Candidate links, source context and target keys
//! - [`classify`] - Paper / proceedings / unknown classification
//! - [`download`] - Admission gate, retry policy, HTTP fetcher and orchestrator
//! - [`resume`] - Durable completion markers
//! - [`organize`] - Output layout and placement out of staging
//! - [`topics`] - Keyword topic buckets for the topic layout
//! - [`input`] - Candidate file parsing
//! - [`config`] - Config file loading and resolved settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod candidate;
pub mod classify;
pub mod config;
pub mod download;
pub mod input;
pub mod organize;
pub mod resume;
pub mod topics;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use candidate::{CandidateLink, SourceContext, TargetKey};
pub use classify::{Classification, Classifier, PaperId, Precedence};
pub use config::{ConfigError, DownloadConfig, FileConfig};
pub use download::{
    AdmissionGate, DEFAULT_CONCURRENCY, DownloadEngine, DownloadError, DownloadReport,
    EngineError, ErrorKind, Fetcher, HttpClient, OutcomeKind, RateLimiter, RetryPolicy,
    RunOptions, TaskOutcome,
};
pub use input::{ParsedCandidates, parse_candidates};
pub use organize::{Layout, Organizer};
pub use resume::{ResumeError, ResumeOutcome, ResumeRecord, ResumeStore};
