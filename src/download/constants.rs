//! Constants for the download module (timeouts, pacing, identification).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default pause between requests to the same host.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Warning threshold for cumulative pacing delay per host (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!(
    "jacow-downloader/",
    env!("CARGO_PKG_VERSION"),
    " (proceedings-archiver)"
);
