//! Helpers shared by integration tests.

#![allow(dead_code)]

#[path = "../../src/test_support/gzip.rs"]
mod gzip;
#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;

pub use gzip::gzip_stored;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jacow_core::download::{AdmissionGate, DownloadEngine, RateLimiter, RetryPolicy};
use jacow_core::{CandidateLink, SourceContext};
use wiremock::{Request, Respond, ResponseTemplate};

/// Builds a candidate with IPAC'23 context for the given URL.
pub fn candidate(url: &str, declared_size: Option<u64>) -> CandidateLink {
    CandidateLink::new(url)
        .with_declared_size(declared_size)
        .with_context(SourceContext::new("IPAC", Some(2023), Some("MOPA")))
}

/// Engine with pacing disabled and millisecond backoff, so retry tests are fast.
pub fn fast_engine(concurrency: usize, max_attempts: u32, max_size: u64) -> DownloadEngine {
    DownloadEngine::new(
        concurrency,
        RetryPolicy::new(max_attempts, Duration::from_millis(5), Duration::from_millis(20)),
        Arc::new(RateLimiter::disabled()),
        AdmissionGate::new(max_size),
    )
    .expect("valid engine")
    .with_size_probe(false)
}

/// Responds with `failure` for the first `failures` requests, then `success`.
pub struct FlakyResponder {
    failures: usize,
    failure: ResponseTemplate,
    success: ResponseTemplate,
    calls: Arc<AtomicUsize>,
}

impl FlakyResponder {
    pub fn new(failures: usize, failure: ResponseTemplate, success: ResponseTemplate) -> Self {
        Self {
            failures,
            failure,
            success,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared request counter.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            self.failure.clone()
        } else {
            self.success.clone()
        }
    }
}
