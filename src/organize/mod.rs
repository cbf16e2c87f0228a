//! Final placement of downloaded files.
//!
//! The [`Organizer`] owns two areas under the output root:
//!
//! - `.staging/`, where transfers land as `<target key>.part`
//! - the output tree, `<conference>/<year>/<bucket>/<file>`
//!
//! Staging shares the filesystem with the output tree, so placing a file is a
//! hard link (or rename) and a reader never sees a half-written paper at its
//! final path.

pub mod sanitize;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::candidate::{CandidateLink, TargetKey};
use crate::classify::Classification;
use crate::download::DownloadTask;
use crate::topics::classify_topic;
use sanitize::{sanitize_component, sanitize_filename};

/// Staging directory name under the output root.
pub const STAGING_DIR: &str = ".staging";

const STAGING_SUFFIX: &str = "part";
const UNKNOWN_CONFERENCE: &str = "unknown_conference";
const UNKNOWN_YEAR: &str = "unknown_year";
const PROCEEDINGS_DIR: &str = "proceedings";
const UNSORTED_DIR: &str = "unsorted";

/// Errors raised while placing files.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Filesystem failure.
    #[error("cannot place file at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Unrecognised layout name.
    #[error("unknown layout {0:?} (expected session or topic)")]
    UnknownLayout(String),
}

impl OrganizeError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the disk ran out of space.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::StorageFull)
    }
}

/// How individual papers are grouped under `<conference>/<year>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// By session code.
    #[default]
    Session,
    /// By keyword topic of the title.
    Topic,
}

impl FromStr for Layout {
    type Err = OrganizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "topic" => Ok(Self::Topic),
            other => Err(OrganizeError::UnknownLayout(other.to_string())),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "session",
            Self::Topic => "topic",
        })
    }
}

/// Where a staged file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Moved into place.
    Moved(PathBuf),
    /// The destination already existed; the staged copy was dropped.
    AlreadyPresent(PathBuf),
}

impl Placement {
    /// Final path either way.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Moved(path) | Self::AlreadyPresent(path) => path,
        }
    }
}

/// Maps tasks to paths and moves staged files into the output tree.
#[derive(Debug, Clone)]
pub struct Organizer {
    output_root: PathBuf,
    layout: Layout,
}

impl Organizer {
    /// Creates an organizer rooted at `output_root`.
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            output_root: output_root.into(),
            layout,
        }
    }

    /// Output root.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.output_root.join(STAGING_DIR)
    }

    /// Staging file for a target.
    #[must_use]
    pub fn staging_path(&self, key: &TargetKey) -> PathBuf {
        self.staging_dir()
            .join(format!("{}.{STAGING_SUFFIX}", key.as_str()))
    }

    /// Final path for a candidate with the given classification.
    #[must_use]
    pub fn destination(&self, candidate: &CandidateLink, classification: &Classification) -> PathBuf {
        let context = &candidate.context;
        let conference = sanitize_component(&context.conference, UNKNOWN_CONFERENCE);
        let year = context
            .year
            .map_or_else(|| UNKNOWN_YEAR.to_string(), |year| year.to_string());
        let filename = candidate.display_filename();

        let bucket = match classification {
            Classification::Individual(id) => match self.layout {
                Layout::Session => {
                    let session = context
                        .session
                        .as_deref()
                        .map(str::trim)
                        .filter(|session| !session.is_empty())
                        .unwrap_or(&id.session);
                    sanitize_component(session, UNSORTED_DIR)
                }
                Layout::Topic => {
                    let title = candidate.title.as_deref().unwrap_or(&filename);
                    classify_topic(title).to_string()
                }
            },
            Classification::Proceedings => PROCEEDINGS_DIR.to_string(),
            Classification::Unknown => UNSORTED_DIR.to_string(),
        };

        let filename = if filename.is_empty() {
            format!("{}.pdf", candidate.target_key())
        } else {
            sanitize_filename(&filename)
        };

        self.output_root
            .join(conference)
            .join(year)
            .join(bucket)
            .join(filename)
    }

    /// Moves `staged` to the task's final path without overwriting.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizeError::Io`] when the destination directory cannot be
    /// created or the file cannot be linked or renamed.
    #[instrument(skip(self, task, staged), fields(url = %task.target.url))]
    pub async fn place(&self, task: &DownloadTask, staged: &Path) -> Result<Placement, OrganizeError> {
        let destination = self.destination(&task.target, &task.classification);

        if path_exists(&destination).await? {
            debug!(path = %destination.display(), "destination already present");
            remove_staged(staged).await;
            return Ok(Placement::AlreadyPresent(destination));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OrganizeError::io(parent, e))?;
        }

        // hard_link never replaces an existing file, so a racing writer loses cleanly.
        match tokio::fs::hard_link(staged, &destination).await {
            Ok(()) => {
                remove_staged(staged).await;
                debug!(path = %destination.display(), "placed");
                Ok(Placement::Moved(destination))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                remove_staged(staged).await;
                Ok(Placement::AlreadyPresent(destination))
            }
            Err(e) if e.kind() == io::ErrorKind::StorageFull => {
                Err(OrganizeError::io(&destination, e))
            }
            Err(e) => {
                debug!(error = %e, "hard link unavailable, falling back to copy");
                match copy_no_clobber(staged, &destination).await {
                    Ok(()) => {
                        remove_staged(staged).await;
                        debug!(path = %destination.display(), "placed by copy");
                        Ok(Placement::Moved(destination))
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        remove_staged(staged).await;
                        Ok(Placement::AlreadyPresent(destination))
                    }
                    Err(e) => Err(OrganizeError::io(&destination, e)),
                }
            }
        }
    }

    /// Removes the staging file of one target, if any.
    pub async fn discard(&self, key: &TargetKey) {
        remove_staged(&self.staging_path(key)).await;
    }

    /// Removes every leftover staging file. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails only when the staging directory exists but cannot be listed.
    #[instrument(skip(self), fields(root = %self.output_root.display()))]
    pub async fn sweep_staging(&self) -> Result<usize, OrganizeError> {
        let dir = self.staging_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(OrganizeError::io(dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrganizeError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == STAGING_SUFFIX) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "cannot remove staging file"),
                }
            }
        }
        if removed > 0 {
            debug!(removed, "swept staging files");
        }
        Ok(removed)
    }
}

/// Copies `staged` into a file that must not exist yet, then fsyncs it.
///
/// Fails with `AlreadyExists` when another writer got there first. A partial
/// copy is removed before the error is returned.
async fn copy_no_clobber(staged: &Path, destination: &Path) -> io::Result<()> {
    let mut target = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await?;

    let copied = async {
        let mut source = tokio::fs::File::open(staged).await?;
        tokio::io::copy(&mut source, &mut target).await?;
        target.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(target);
        if let Err(cleanup) = tokio::fs::remove_file(destination).await {
            warn!(path = %destination.display(), error = %cleanup, "cannot remove partial copy");
        }
        return Err(e);
    }
    Ok(())
}

async fn path_exists(path: &Path) -> Result<bool, OrganizeError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| OrganizeError::io(path, e))
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "cannot remove staging file");
    }
}
