//! Candidate input parsing.
//!
//! Page discovery hands over candidates as text, one per line, in either of
//! two shapes:
//!
//! - a JSON object deserializing to [`CandidateLink`]
//! - a bare `http(s)` URL, which takes its context from the caller's defaults
//!
//! Blank lines and `#` comments are ignored. Lines that are neither shape are
//! collected in [`ParsedCandidates::skipped`] rather than failing the batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::candidate::{CandidateLink, SourceContext};

#[allow(clippy::expect_used)]
static YEAR_IN_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(19[89]\d|20[0-5]\d)(?:[^0-9]|$)")
        .expect("year pattern is valid")
});

#[allow(clippy::expect_used)]
static SHORT_YEAR_IN_URL: LazyLock<Regex> = LazyLock::new(|| {
    // ipac23, linac-22: conference acronym followed by a two-digit year.
    Regex::new(r"(?i)/[a-z]{2,10}-?(\d{2})/").expect("short year pattern is valid")
});

/// Errors reading candidate input.
#[derive(Debug, Error)]
pub enum InputError {
    /// The input file cannot be read.
    #[error("cannot read candidates from {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result of parsing a candidate batch.
#[derive(Debug, Default)]
pub struct ParsedCandidates {
    /// Candidates in input order, duplicates included.
    pub candidates: Vec<CandidateLink>,
    /// Lines that could not be used, with the reason.
    pub skipped: Vec<String>,
}

impl ParsedCandidates {
    /// Number of usable candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True when no candidate was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Parses candidate text. `defaults` fills context the lines do not carry.
#[must_use]
pub fn parse_candidates(text: &str, defaults: &SourceContext) -> ParsedCandidates {
    let mut parsed = ParsedCandidates::default();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_number = index + 1;

        let candidate = if line.starts_with('{') {
            match serde_json::from_str::<CandidateLink>(line) {
                Ok(candidate) => candidate,
                Err(e) => {
                    parsed.skipped.push(format!("line {line_number}: {e}"));
                    continue;
                }
            }
        } else {
            CandidateLink::new(line)
        };

        if !is_http_url(&candidate.url) {
            parsed
                .skipped
                .push(format!("line {line_number}: not an http(s) URL: {}", candidate.url));
            continue;
        }

        let candidate = fill_context(candidate, defaults);
        debug!(url = %candidate.url, "parsed candidate");
        parsed.candidates.push(candidate);
    }

    parsed
}

/// Reads and parses a candidate file.
///
/// # Errors
///
/// [`InputError::Read`] when the file cannot be read.
pub fn load_candidates(path: &Path, defaults: &SourceContext) -> Result<ParsedCandidates, InputError> {
    let text = fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_candidates(&text, defaults))
}

/// Guesses the edition year from a URL path, e.g. `.../ipac2023/...` or
/// `.../ipac23/...`.
///
/// ```
/// use jacow_core::input::year_from_url;
///
/// assert_eq!(year_from_url("https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf"), Some(2023));
/// assert_eq!(year_from_url("https://proceedings.jacow.org/linac22/pdf/x.pdf"), Some(2022));
/// assert_eq!(year_from_url("https://example.org/papers/x.pdf"), None);
/// ```
#[must_use]
pub fn year_from_url(url: &str) -> Option<u16> {
    let path = Url::parse(url).map_or_else(|_| url.to_string(), |u| u.path().to_string());

    if let Some(year) = YEAR_IN_URL
        .captures(&path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(year);
    }

    SHORT_YEAR_IN_URL
        .captures(&path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .map(|short| 2000 + short)
}

fn is_http_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn fill_context(mut candidate: CandidateLink, defaults: &SourceContext) -> CandidateLink {
    let context = &mut candidate.context;
    if context.conference.trim().is_empty() {
        context.conference.clone_from(&defaults.conference);
    }
    if context.session.is_none() {
        context.session.clone_from(&defaults.session);
    }
    if context.year.is_none() {
        context.year = defaults.year.or_else(|| year_from_url(&candidate.url));
    }
    candidate
}
