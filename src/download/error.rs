//! Error types for the fetch layer.
//!
//! Every variant carries the URL or path it concerns so that report entries
//! can name the target without extra bookkeeping.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching one target into staging.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused or reset, TLS).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// Staging file could not be created, written or synced.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or not http(s).
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The server announced a body larger than the admission limit.
    #[error("{url} declares {declared} bytes, over the {max_size} byte limit")]
    DeclaredOversize {
        /// The rejected URL.
        url: String,
        /// Size announced by `Content-Length`.
        declared: u64,
        /// Configured limit.
        max_size: u64,
    },

    /// The transfer crossed the admission limit and was aborted.
    #[error("{url} exceeded the {max_size} byte limit after {bytes_read} bytes")]
    StreamedOversize {
        /// The rejected URL.
        url: String,
        /// Bytes received when the transfer was aborted.
        bytes_read: u64,
        /// Configured limit.
        max_size: u64,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for either oversize rejection.
    #[must_use]
    pub fn is_oversize(&self) -> bool {
        matches!(
            self,
            Self::DeclaredOversize { .. } | Self::StreamedOversize { .. }
        )
    }

    /// Returns true when the local disk ran out of space.
    ///
    /// Storage exhaustion is a process-level condition, not a per-target one.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::StorageFull
        )
    }

    /// Returns the Retry-After header value attached to an HTTP error.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

// No From<reqwest::Error>/From<std::io::Error>: every variant needs the url or
// path for context, so callers go through the constructors above.
