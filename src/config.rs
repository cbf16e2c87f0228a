//! Run configuration: defaults, the optional TOML file, and CLI overrides.
//!
//! Resolution order, highest first:
//! 1. command-line flags
//! 2. `$XDG_CONFIG_HOME/jacow-downloader/config.toml`, else
//!    `$HOME/.config/jacow-downloader/config.toml` (or `--config <path>`)
//! 3. built-in defaults
//!
//! ```toml
//! output_dir = "./data/papers"
//! max_size_mb = 50
//! concurrency = 3
//! delay_secs = 1.0
//! layout = "topic"
//! precedence = "pattern-first"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{
    ClassifyError, Classifier, DEFAULT_PROCEEDINGS_SIZE_THRESHOLD, Precedence,
};
use crate::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_DELAY, READ_TIMEOUT_SECS};
use crate::download::{
    AdmissionGate, DEFAULT_BACKOFF_BASE, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_BACKOFF, RateLimiter, RetryPolicy,
};
use crate::organize::Layout;

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./data/papers";

/// Default size limit in megabytes.
pub const DEFAULT_MAX_SIZE_MB: u64 = 100;

/// Name of the per-user config directory.
pub const CONFIG_DIR_NAME: &str = "jacow-downloader";

const BYTES_PER_MB: u64 = 1024 * 1024;
const MAX_DELAY_SECS: f64 = 60.0;
const MAX_BACKOFF_SECS: f64 = 3600.0;
const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but cannot be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// What is wrong.
        message: String,
    },

    /// A classifier pattern is unusable.
    #[error(transparent)]
    Classifier(#[from] ClassifyError),
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Optional settings, as read from the config file or the command line.
///
/// Every field is optional so two layers can be merged; see
/// [`DownloadConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Output root.
    pub output_dir: Option<PathBuf>,
    /// Size limit in megabytes.
    pub max_size_mb: Option<u64>,
    /// Worker pool size (1..=100).
    pub concurrency: Option<usize>,
    /// Per-host delay in seconds; 0 disables pacing.
    pub delay_secs: Option<f64>,
    /// Random extra per-host delay, in milliseconds.
    pub rate_limit_jitter_ms: Option<u64>,
    /// Attempt ceiling including the first attempt.
    pub max_attempts: Option<u32>,
    /// First retry delay in seconds.
    pub backoff_base_secs: Option<f64>,
    /// Longest retry delay in seconds.
    pub max_backoff_secs: Option<f64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// HEAD-probe unsized non-paper targets before fetching.
    pub probe_unknown_sizes: Option<bool>,
    /// Output grouping.
    pub layout: Option<Layout>,
    /// Pattern/keyword tie-break.
    pub precedence: Option<Precedence>,
    /// Paper identifier regexes, tried in order.
    pub patterns: Option<Vec<String>>,
    /// Advertised size above which a file counts as a volume, in megabytes.
    pub proceedings_threshold_mb: Option<u64>,
}

impl FileConfig {
    /// Layers `self` over `lower`: each field set here wins.
    #[must_use]
    pub fn or(self, lower: Self) -> Self {
        Self {
            output_dir: self.output_dir.or(lower.output_dir),
            max_size_mb: self.max_size_mb.or(lower.max_size_mb),
            concurrency: self.concurrency.or(lower.concurrency),
            delay_secs: self.delay_secs.or(lower.delay_secs),
            rate_limit_jitter_ms: self.rate_limit_jitter_ms.or(lower.rate_limit_jitter_ms),
            max_attempts: self.max_attempts.or(lower.max_attempts),
            backoff_base_secs: self.backoff_base_secs.or(lower.backoff_base_secs),
            max_backoff_secs: self.max_backoff_secs.or(lower.max_backoff_secs),
            connect_timeout_secs: self.connect_timeout_secs.or(lower.connect_timeout_secs),
            read_timeout_secs: self.read_timeout_secs.or(lower.read_timeout_secs),
            probe_unknown_sizes: self.probe_unknown_sizes.or(lower.probe_unknown_sizes),
            layout: self.layout.or(lower.layout),
            precedence: self.precedence.or(lower.precedence),
            patterns: self.patterns.or(lower.patterns),
            proceedings_threshold_mb: self
                .proceedings_threshold_mb
                .or(lower.proceedings_threshold_mb),
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Output root.
    pub output_root: PathBuf,
    /// Size limit in bytes.
    pub max_size: u64,
    /// Worker pool size.
    pub concurrency: usize,
    /// Per-host delay.
    pub delay: Duration,
    /// Random extra per-host delay ceiling.
    pub rate_limit_jitter: Duration,
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Longest retry delay.
    pub max_backoff: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout.
    pub read_timeout: Duration,
    /// HEAD-probe unsized non-paper targets.
    pub probe_unknown_sizes: bool,
    /// Output grouping.
    pub layout: Layout,
    /// Pattern/keyword tie-break.
    pub precedence: Precedence,
    /// Custom identifier patterns; `None` keeps the built-in ones.
    pub patterns: Option<Vec<String>>,
    /// Volume size threshold in bytes.
    pub proceedings_threshold: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_size: DEFAULT_MAX_SIZE_MB * BYTES_PER_MB,
            concurrency: DEFAULT_CONCURRENCY,
            delay: DEFAULT_REQUEST_DELAY,
            rate_limit_jitter: Duration::ZERO,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_backoff: DEFAULT_MAX_BACKOFF,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            probe_unknown_sizes: true,
            layout: Layout::default(),
            precedence: Precedence::default(),
            patterns: None,
            proceedings_threshold: DEFAULT_PROCEEDINGS_SIZE_THRESHOLD,
        }
    }
}

impl DownloadConfig {
    /// Resolves `settings` (already layered) over the defaults and validates.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for out-of-range values and
    /// [`ConfigError::Classifier`] for unusable patterns.
    pub fn resolve(settings: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_size = match settings.max_size_mb {
            Some(0) => return Err(invalid("max_size_mb", "must be greater than 0")),
            Some(mb) => mb
                .checked_mul(BYTES_PER_MB)
                .ok_or_else(|| invalid("max_size_mb", "too large"))?,
            None => defaults.max_size,
        };

        let proceedings_threshold = match settings.proceedings_threshold_mb {
            Some(mb) => mb
                .checked_mul(BYTES_PER_MB)
                .ok_or_else(|| invalid("proceedings_threshold_mb", "too large"))?,
            None => defaults.proceedings_threshold,
        };

        let delay = seconds("delay_secs", settings.delay_secs, MAX_DELAY_SECS)?
            .unwrap_or(defaults.delay);
        let backoff_base = seconds("backoff_base_secs", settings.backoff_base_secs, MAX_BACKOFF_SECS)?
            .unwrap_or(defaults.backoff_base);
        let max_attempts = settings.max_attempts.unwrap_or(defaults.max_attempts);
        // Without an explicit ceiling, raise the default one so every retry
        // still waits longer than the last.
        let max_backoff = match seconds("max_backoff_secs", settings.max_backoff_secs, MAX_BACKOFF_SECS)? {
            Some(explicit) => explicit,
            None => longest_backoff(backoff_base, max_attempts)
                .map_or(defaults.max_backoff, |longest| longest.max(defaults.max_backoff)),
        };

        let config = Self {
            output_root: settings.output_dir.unwrap_or(defaults.output_root),
            max_size,
            concurrency: settings.concurrency.unwrap_or(defaults.concurrency),
            delay,
            rate_limit_jitter: settings
                .rate_limit_jitter_ms
                .map_or(defaults.rate_limit_jitter, Duration::from_millis),
            max_attempts,
            backoff_base,
            max_backoff,
            connect_timeout: settings
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            read_timeout: settings
                .read_timeout_secs
                .map_or(defaults.read_timeout, Duration::from_secs),
            probe_unknown_sizes: settings
                .probe_unknown_sizes
                .unwrap_or(defaults.probe_unknown_sizes),
            layout: settings.layout.unwrap_or(defaults.layout),
            precedence: settings.precedence.unwrap_or(defaults.precedence),
            patterns: settings.patterns,
            proceedings_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.concurrency) {
            return Err(invalid(
                "concurrency",
                format!("{}. Expected range: 1..=100", self.concurrency),
            ));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(invalid(
                "max_attempts",
                format!("{}. Expected range: 1..={MAX_ATTEMPTS_LIMIT}", self.max_attempts),
            ));
        }
        if self.backoff_base.is_zero() {
            return Err(invalid("backoff_base_secs", "must be greater than 0"));
        }
        match longest_backoff(self.backoff_base, self.max_attempts) {
            Some(longest) if self.max_backoff >= longest => {}
            Some(longest) => {
                return Err(invalid(
                    "max_backoff_secs",
                    format!(
                        "{:?} is below the last retry delay {longest:?} for {} attempts",
                        self.max_backoff, self.max_attempts
                    ),
                ));
            }
            None => return Err(invalid("backoff_base_secs", "too large for max_attempts")),
        }
        if self.max_size == 0 {
            return Err(invalid("max_size_mb", "must be greater than 0"));
        }
        validate_timeout("connect_timeout_secs", self.connect_timeout)?;
        validate_timeout("read_timeout_secs", self.read_timeout)?;
        if self.patterns.as_ref().is_some_and(Vec::is_empty) {
            return Err(invalid("patterns", "must list at least one pattern"));
        }
        Ok(())
    }

    /// Builds the classifier these settings describe.
    ///
    /// # Errors
    ///
    /// Fails when a custom pattern does not compile.
    pub fn classifier(&self) -> Result<Classifier, ConfigError> {
        let classifier = match &self.patterns {
            Some(patterns) => Classifier::with_patterns(patterns)?,
            None => Classifier::default(),
        };
        Ok(classifier
            .with_precedence(self.precedence)
            .with_size_threshold(self.proceedings_threshold))
    }

    /// Retry policy for these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_base, self.max_backoff)
    }

    /// Per-host pacing for these settings.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.delay).with_jitter(self.rate_limit_jitter)
    }

    /// Size gate for these settings.
    #[must_use]
    pub fn gate(&self) -> AdmissionGate {
        AdmissionGate::new(self.max_size)
    }
}

fn seconds(field: &'static str, value: Option<f64>, max: f64) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(invalid(field, format!("{value}. Expected range: 0..={max}")));
    }
    Duration::try_from_secs_f64(value)
        .map(Some)
        .map_err(|e| invalid(field, e.to_string()))
}

/// Delay before the final retry: `base * 2^(max_attempts - 2)`.
fn longest_backoff(base: Duration, max_attempts: u32) -> Option<Duration> {
    let exponent = max_attempts.saturating_sub(2);
    2u32.checked_pow(exponent).and_then(|factor| base.checked_mul(factor))
}

fn validate_timeout(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value.as_secs()) {
        return Err(invalid(
            field,
            format!("{}. Expected range: 1..=3600", value.as_secs()),
        ));
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/jacow-downloader/config.toml`
/// 2. `$HOME/.config/jacow-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Reads and parses a config file.
///
/// # Errors
///
/// [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `explicit` if given, else the default file if it exists.
///
/// A missing default file is not an error; a missing explicit one is.
///
/// # Errors
///
/// See [`load_file_config`].
pub fn load_config_file(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    if let Some(path) = explicit {
        return load_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "loading config file");
            load_file_config(&path).map(Some)
        }
        _ => Ok(None),
    }
}
