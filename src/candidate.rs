//! Candidate links handed over by page discovery.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::organize::sanitize::filename_from_url;

/// Where a link was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    /// Conference series, e.g. `IPAC`.
    #[serde(default)]
    pub conference: String,
    /// Edition year.
    #[serde(default)]
    pub year: Option<u16>,
    /// Session code from the listing page, e.g. `MOPA`.
    #[serde(default)]
    pub session: Option<String>,
}

impl SourceContext {
    /// Creates a context.
    #[must_use]
    pub fn new(conference: impl Into<String>, year: Option<u16>, session: Option<&str>) -> Self {
        Self {
            conference: conference.into(),
            year,
            session: session.map(str::to_string),
        }
    }
}

/// One downloadable link. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    /// Absolute URL of the file.
    pub url: String,
    /// Filename as displayed on the page; derived from the URL when absent.
    #[serde(default)]
    pub filename: Option<String>,
    /// Size advertised by the listing, in bytes.
    #[serde(default, alias = "size")]
    pub declared_size: Option<u64>,
    /// Page context.
    #[serde(flatten)]
    pub context: SourceContext,
    /// Paper title, used for topic bucketing.
    #[serde(default)]
    pub title: Option<String>,
}

impl CandidateLink {
    /// Creates a candidate with no size, context or title.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            declared_size: None,
            context: SourceContext::default(),
            title: None,
        }
    }

    /// Sets the advertised size.
    #[must_use]
    pub fn with_declared_size(mut self, declared_size: Option<u64>) -> Self {
        self.declared_size = declared_size;
        self
    }

    /// Sets the page context.
    #[must_use]
    pub fn with_context(mut self, context: SourceContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the displayed filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Displayed filename, falling back to the URL's last segment.
    #[must_use]
    pub fn display_filename(&self) -> String {
        self.filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| filename_from_url(&self.url))
            .unwrap_or_default()
    }

    /// Stable identity of this target across runs.
    #[must_use]
    pub fn target_key(&self) -> TargetKey {
        TargetKey::from_url(&self.url)
    }
}

/// SHA-256 of the normalized URL, hex encoded.
///
/// Normalization is what [`Url`] parsing gives (lower-cased scheme and host,
/// default port dropped) plus removal of the fragment, so `#page=2` variants
/// of one file collapse onto one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    /// Computes the key for `url`. Unparseable URLs hash their trimmed text.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let normalized = match Url::parse(url.trim()) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(_) => url.trim().to_string(),
        };
        Self(format!("{:x}", Sha256::digest(normalized.as_bytes())))
    }

    /// Wraps an already computed key, as read back from the resume store.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Hex text of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
