//! Per-host request pacing.
//!
//! [`RateLimiter`] spaces requests to the same host by a configured delay.
//! Every network call a worker makes (size probe, transfer, retry) passes
//! through [`RateLimiter::acquire`] first, so the aggregate request rate
//! against a proceedings server stays bounded no matter how many workers run.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jacow_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//!
//! limiter.acquire("https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf").await;
//! // Waits about a second.
//! limiter.acquire("https://proceedings.jacow.org/ipac2023/pdf/MOPA002.pdf").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-host pacing shared by all workers of a run.
///
/// Wrap in `Arc`; the `DashMap` entry is cloned out before awaiting so no
/// shard lock is held across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    max_jitter: Duration,
    disabled: bool,
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// Earliest instant the next request may start. `None` until the first
    /// request, which is never delayed.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `delay`.
    /// A zero delay disables pacing.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        if delay.is_zero() {
            return Self::disabled();
        }
        debug!(delay_ms = delay.as_millis(), "creating rate limiter");
        Self {
            delay,
            max_jitter: Duration::ZERO,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Adds a random extra wait of up to `max_jitter` to each paced request.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until a request to `url`'s host may start, then reserves the
    /// next slot. The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.host_state(&host);
        let mut next_allowed = state.next_allowed.lock().await;

        if let Some(at) = *next_allowed {
            let wait = at.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                let cumulative = state.add_cumulative_delay(wait);
                debug!(
                    host = %host,
                    delay_ms = wait.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "heavy pacing against this host"
                    );
                }
                tokio::time::sleep(wait).await;
            }
        }

        *next_allowed = Some(Instant::now() + self.delay + self.jitter());
    }

    /// Pushes the host's next slot out by a server-mandated delay
    /// (Retry-After), so every worker backs off, not just the one that saw it.
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.host_state(&host);
        let mut next_allowed = state.next_allowed.lock().await;
        let candidate = Instant::now() + delay;
        if next_allowed.is_none_or(|at| at < candidate) {
            *next_allowed = Some(candidate);
        }
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Extracts the lower-cased host of a URL, or `"unknown"` when it has none.
///
/// ```
/// use jacow_core::download::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://Proceedings.JACoW.org/x.pdf"), "proceedings.jacow.org");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After value: integer seconds or an HTTP-date.
///
/// Negative or unparseable values yield `None`; past dates yield zero;
/// anything beyond one hour is capped.
///
/// ```
/// use std::time::Duration;
/// use jacow_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    let delay = datetime
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            "Retry-After date exceeds maximum, capping at 1 hour"
        );
    }
    Some(delay.min(MAX_RETRY_AFTER))
}
