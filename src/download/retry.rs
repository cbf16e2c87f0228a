//! Retry decisions with exponential backoff.
//!
//! A failed fetch is classified into a [`FailureType`], then
//! [`RetryPolicy::next_action`] decides whether another attempt is worth it.
//! The policy never sleeps: the caller owns the loop and the waiting, which
//! keeps every decision a plain function of `(failure, attempt)`.
//!
//! # Example
//!
//! ```
//! use jacow_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/MOPA001.pdf", 503);
//!
//! match policy.next_action(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("attempt {attempt} in {delay:?}");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::debug;

use super::DownloadError;

/// Default attempt ceiling, including the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Default ceiling for a single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Classification of fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// May succeed later: timeouts, resets, 408, 5xx.
    Transient,

    /// Will not succeed on retry: 403, 404, bad URL, oversize, staging IO.
    Permanent,

    /// HTTP 429. Retried like [`FailureType::Transient`]; the caller may honour
    /// the server's Retry-After instead of the computed delay.
    RateLimited,
}

impl FailureType {
    /// Returns true for failures the policy may retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// The number the next attempt will carry (first retry is 2).
        attempt: u32,
    },

    /// Finalize the task.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt ceiling and exponential backoff schedule.
///
/// ```text
/// delay(attempt) = min(backoff_base * 2^(attempt - 1), max_backoff)
/// ```
///
/// With the defaults (3 attempts, 2s base) a transient target is tried at
/// t=0, t≈2s and t≈6s, then given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1 and
    /// `max_backoff` to at least `backoff_base`.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            max_backoff: max_backoff.max(backoff_base),
        }
    }

    /// Creates a policy with a custom attempt ceiling and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base backoff delay.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Decides what follows the failed attempt number `attempt` (1-indexed).
    #[must_use]
    pub fn next_action(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if !failure_type.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff after the failed attempt `attempt`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (non-TLS) | Transient |
/// | Network (TLS) | Permanent |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other HTTP | Permanent |
/// | Io, InvalidUrl, oversize | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::DeclaredOversize { .. }
        | DownloadError::StreamedOversize { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        403 => FailureType::Permanent,
        404 => FailureType::Permanent,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
