//! Archive engine boundary
//!
//! The bridge never decompresses anything itself. It asks an [`ArchiveEngine`]
//! for the member listing and for extraction of single members into the
//! scratch directory.

mod directory;
mod file_data;

pub use directory::DirectoryArchive;
pub use file_data::FileData;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Extraction of one or more members into a destination directory
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    /// Archive-relative member paths (`FileData::original_path`)
    pub members: &'a [String],
    /// Directory the members are written under, keeping their relative paths
    pub destination: &'a Path,
    pub password: Option<&'a str>,
    /// When false, a member whose destination already exists must be left
    /// untouched and reported as success
    pub overwrite: bool,
}

/// Errors reported by an archive engine
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("member not found in archive: {0}")]
    MemberNotFound(String),
    #[error("member path escapes the archive root: {0}")]
    InvalidMemberPath(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An archive the bridge can list and extract from
#[async_trait]
pub trait ArchiveEngine: Send + Sync + 'static {
    /// Current member listing
    fn members(&self) -> Vec<FileData>;

    /// Whether a member with this full path is currently in the archive.
    /// Reads check it so a member removed before the next reconcile answers
    /// "no such entry" instead of an extraction failure.
    fn contains(&self, full_path: &str) -> bool;

    /// Extract the requested members
    async fn extract(&self, request: ExtractRequest<'_>) -> Result<(), ArchiveError>;
}

/// Join an archive-relative member path onto a base directory.
///
/// Root and `.` components are dropped and `..` never climbs above `base`,
/// so the result always stays inside it.
pub fn member_path(base: &Path, relative: &str) -> PathBuf {
    let mut parts: Vec<&str> = Vec::new();
    for component in relative.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let mut joined = base.to_path_buf();
    joined.extend(parts);
    joined
}
