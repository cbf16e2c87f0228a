//! Individual-paper versus aggregate-proceedings classification.
//!
//! Conference sites link both single papers (`MOPA001.pdf`) and whole
//! proceedings volumes that run to gigabytes. The [`Classifier`] tells them
//! apart from the filename alone, plus the advertised size when one exists.
//! It performs no I/O and returns the same answer for the same input.
//!
//! # Example
//!
//! ```
//! use jacow_core::classify::{Classification, Classifier};
//!
//! let classifier = Classifier::default();
//! match classifier.classify_name("MOPA001.pdf", None) {
//!     Classification::Individual(id) => assert_eq!(id.to_string(), "MOPA001"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(
//!     classifier.classify_name("ipac23_proceedings_volume.pdf", None),
//!     Classification::Proceedings
//! );
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::CandidateLink;

/// Extensions a paper may carry.
pub const PAPER_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "ppt", "pptx"];

/// Filename fragments that mark an aggregate volume.
pub const PROCEEDINGS_KEYWORDS: &[&str] = &["proceedings", "complete", "volume", "full", "entire"];

/// Advertised size above which an unmatched file is taken for a volume (100 MiB).
pub const DEFAULT_PROCEEDINGS_SIZE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Identifier patterns, tried in order against the upper-cased stem.
/// Each must capture `session` and `seq`.
pub const DEFAULT_PAPER_PATTERNS: &[&str] = &[
    r"^(?P<session>[A-Z]{2,4})(?P<seq>\d{3})$",
    r"^(?P<session>[A-Z]{3,5})(?P<seq>\d{2,4})$",
    r"^(?P<session>[A-Z]{1,2}\d{1,2}[A-Z]{1,2})(?P<seq>\d{2,3})$",
];

#[allow(clippy::expect_used)]
static DEFAULT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DEFAULT_PAPER_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("default paper pattern is valid"))
        .collect()
});

/// Errors building a classifier from configured patterns.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The pattern is not a valid regex.
    #[error("invalid paper pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compile error.
        #[source]
        source: regex::Error,
    },

    /// The pattern lacks a required capture group.
    #[error("paper pattern {pattern:?} must capture named groups `session` and `seq`")]
    MissingGroup {
        /// The offending pattern.
        pattern: String,
    },

    /// Unrecognized precedence name.
    #[error("unknown precedence {0:?} (expected pattern-first or keyword-first)")]
    UnknownPrecedence(String),
}

/// Session code plus sequence number, e.g. `MOPA` + `001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PaperId {
    /// Session code.
    pub session: String,
    /// Sequence within the session.
    pub sequence: String,
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.session, self.sequence)
    }
}

/// What kind of file a candidate points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Classification {
    /// A single paper with its identifier.
    Individual(PaperId),
    /// An aggregate volume.
    Proceedings,
    /// Neither; kept, but routed to a catch-all bucket.
    Unknown,
}

impl Classification {
    /// Short label for logs and reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Individual(_) => "individual",
            Self::Proceedings => "proceedings",
            Self::Unknown => "unknown",
        }
    }
}

/// Which signal wins when a filename matches both a paper pattern and a
/// proceedings keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precedence {
    /// Precise identifier patterns beat keyword heuristics.
    #[default]
    PatternFirst,
    /// Keywords and size beat identifier patterns.
    KeywordFirst,
}

impl FromStr for Precedence {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern-first" | "pattern" => Ok(Self::PatternFirst),
            "keyword-first" | "keyword" => Ok(Self::KeywordFirst),
            other => Err(ClassifyError::UnknownPrecedence(other.to_string())),
        }
    }
}

/// Filename classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    patterns: Vec<Regex>,
    size_threshold: u64,
    precedence: Precedence,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.clone(),
            size_threshold: DEFAULT_PROCEEDINGS_SIZE_THRESHOLD,
            precedence: Precedence::default(),
        }
    }
}

impl Classifier {
    /// Builds a classifier from an ordered list of identifier patterns.
    ///
    /// # Errors
    ///
    /// Fails if a pattern does not compile or lacks the `session`/`seq` groups.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ClassifyError> {
        let patterns = patterns
            .iter()
            .map(|pattern| compile_pattern(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            ..Self::default()
        })
    }

    /// Sets the precedence rule.
    #[must_use]
    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Sets the advertised size above which a file counts as a volume.
    #[must_use]
    pub fn with_size_threshold(mut self, size_threshold: u64) -> Self {
        self.size_threshold = size_threshold;
        self
    }

    /// Classifies a candidate by its displayed filename and advertised size.
    #[must_use]
    pub fn classify(&self, candidate: &CandidateLink) -> Classification {
        self.classify_name(&candidate.display_filename(), candidate.declared_size)
    }

    /// Classifies a bare filename.
    #[must_use]
    pub fn classify_name(&self, filename: &str, declared_size: Option<u64>) -> Classification {
        let paper = self.match_paper(filename);
        let aggregate = self.looks_aggregate(filename, declared_size);

        match (self.precedence, paper, aggregate) {
            (Precedence::PatternFirst, Some(id), _) => Classification::Individual(id),
            (Precedence::KeywordFirst, _, true) | (Precedence::PatternFirst, None, true) => {
                Classification::Proceedings
            }
            (Precedence::KeywordFirst, Some(id), false) => Classification::Individual(id),
            (_, None, false) => Classification::Unknown,
        }
    }

    fn match_paper(&self, filename: &str) -> Option<PaperId> {
        let (stem, extension) = filename.trim().rsplit_once('.')?;
        let extension = extension.to_ascii_lowercase();
        if !PAPER_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        let stem = stem.to_ascii_uppercase();
        self.patterns.iter().find_map(|pattern| {
            let captures = pattern.captures(&stem)?;
            Some(PaperId {
                session: captures.name("session")?.as_str().to_string(),
                sequence: captures.name("seq")?.as_str().to_string(),
            })
        })
    }

    fn looks_aggregate(&self, filename: &str, declared_size: Option<u64>) -> bool {
        let lower = filename.to_lowercase();
        let stem = lower.rsplit_once('.').map_or(lower.as_str(), |(stem, _)| stem);
        PROCEEDINGS_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
            || stem.ends_with("_all")
            || declared_size.is_some_and(|size| size > self.size_threshold)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ClassifyError> {
    let regex = Regex::new(pattern).map_err(|source| ClassifyError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    let names: Vec<_> = regex.capture_names().flatten().collect();
    if names.contains(&"session") && names.contains(&"seq") {
        Ok(regex)
    } else {
        Err(ClassifyError::MissingGroup {
            pattern: pattern.to_string(),
        })
    }
}
