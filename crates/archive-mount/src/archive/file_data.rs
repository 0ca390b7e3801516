//! Archive member descriptor
//!
//! A `FileData` is what an archive engine reports for one member. The inode
//! table keeps its own clones, so a descriptor outlives the engine listing it
//! was copied from.

use serde::{Deserialize, Serialize};

/// One archive member as seen by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    /// Canonical archive-internal path, always starting with `/`.
    /// Directories keep their trailing `/`. Used as the reverse-map key.
    pub full_path: String,
    /// Parent directory path, may be non-canonical (`/./`, trailing `/`)
    pub path: String,
    /// Last component of the member path
    pub name: String,
    /// Path handed to the engine for extraction, relative to the archive root
    pub original_path: String,
    /// Byte size of a file member
    pub size: u64,
    /// Aggregate size of everything below a directory member
    pub dir_size: u64,
    /// Directory flag
    pub dir: bool,
}

impl FileData {
    /// Describe a regular file from its archive-relative path
    pub fn file(relative: &str, size: u64) -> Self {
        Self::from_relative(relative, false, size, 0)
    }

    /// Describe a directory from its archive-relative path
    pub fn dir(relative: &str, dir_size: u64) -> Self {
        Self::from_relative(relative, true, 0, dir_size)
    }

    fn from_relative(relative: &str, dir: bool, size: u64, dir_size: u64) -> Self {
        let trimmed = relative.trim_start_matches('/').trim_end_matches('/');

        let (parent, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };

        let path = if parent.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", parent)
        };

        let full_path = if dir {
            format!("/{}/", trimmed)
        } else {
            format!("/{}", trimmed)
        };

        Self {
            full_path,
            path,
            name: name.to_string(),
            original_path: trimmed.to_string(),
            size,
            dir_size,
            dir,
        }
    }

    /// Directory predicate
    pub fn is_dir(&self) -> bool {
        self.dir
    }

    /// Size reported to the kernel: aggregate for directories, byte size for files
    pub fn entry_size(&self) -> u64 {
        if self.dir {
            self.dir_size
        } else {
            self.size
        }
    }
}
