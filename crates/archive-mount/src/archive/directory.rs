//! Directory-backed archive engine
//!
//! Treats an unpacked directory tree as an archive: listing walks the tree and
//! extraction copies members into the destination. Useful for the CLI and for
//! exercising the bridge without a codec.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{member_path, ArchiveEngine, ArchiveError, ExtractRequest, FileData};

#[derive(Debug, Default)]
struct Listing {
    members: Vec<FileData>,
    full_paths: HashSet<String>,
    original_paths: HashSet<String>,
}

/// Archive engine over a plain directory tree
#[derive(Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
    listing: RwLock<Listing>,
}

impl DirectoryArchive {
    /// Open a directory and take the initial listing
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("archive root is not a directory: {}", root.display()),
            ));
        }

        let archive = Self {
            root,
            listing: RwLock::new(Listing::default()),
        };
        archive.refresh()?;
        Ok(archive)
    }

    /// Root directory of the tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-scan the tree. Call `reconcile_inodes` on the bridge afterwards.
    pub fn refresh(&self) -> io::Result<()> {
        let mut members = Vec::new();
        scan(&self.root, "", &mut members)?;

        let full_paths = members.iter().map(|m| m.full_path.clone()).collect();
        let original_paths = members.iter().map(|m| m.original_path.clone()).collect();

        info!(root = %self.root.display(), members = members.len(), "archive listing refreshed");

        *self.listing.write() = Listing {
            members,
            full_paths,
            original_paths,
        };
        Ok(())
    }
}

/// Walk `dir`, appending members in name order. Returns the aggregate size.
fn scan(dir: &Path, prefix: &str, out: &mut Vec<FileData>) -> io::Result<u64> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut total = 0;
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        // Symlinks are not followed
        let metadata = entry.path().symlink_metadata()?;
        if metadata.is_dir() {
            let slot = out.len();
            out.push(FileData::dir(&relative, 0));
            let dir_size = scan(&entry.path(), &relative, out)?;
            out[slot].dir_size = dir_size;
            total += dir_size;
        } else if metadata.is_file() {
            out.push(FileData::file(&relative, metadata.len()));
            total += metadata.len();
        }
    }

    Ok(total)
}

#[async_trait]
impl ArchiveEngine for DirectoryArchive {
    fn members(&self) -> Vec<FileData> {
        self.listing.read().members.clone()
    }

    fn contains(&self, full_path: &str) -> bool {
        self.listing.read().full_paths.contains(full_path)
    }

    async fn extract(&self, request: ExtractRequest<'_>) -> Result<(), ArchiveError> {
        for member in request.members {
            if member.split('/').any(|c| c == "..") {
                return Err(ArchiveError::InvalidMemberPath(member.clone()));
            }
            let listed = self.listing.read().original_paths.contains(member);
            if !listed {
                return Err(ArchiveError::MemberNotFound(member.clone()));
            }

            let source = member_path(&self.root, member);
            let target = member_path(request.destination, member);

            if !request.overwrite && tokio::fs::try_exists(&target).await? {
                debug!(member = %member, "destination exists, skipping");
                continue;
            }

            if tokio::fs::metadata(&source).await?.is_dir() {
                tokio::fs::create_dir_all(&target).await?;
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let copied = tokio::fs::copy(&source, &target).await?;
            debug!(member = %member, bytes = copied, "member extracted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> tempfile::TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(temp_dir.path().join("dir")).unwrap();
        fs::write(temp_dir.path().join("dir/b.txt"), b"abc").unwrap();
        temp_dir
    }

    #[test]
    fn test_listing() {
        let tree = sample_tree();
        let archive = DirectoryArchive::open(tree.path()).unwrap();

        let members = archive.members();
        let paths: Vec<_> = members.iter().map(|m| m.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/a.txt", "/dir/", "/dir/b.txt"]);

        let dir = &members[1];
        assert!(dir.is_dir());
        assert_eq!(dir.dir_size, 3);
        assert!(archive.contains("/dir/b.txt"));
        assert!(!archive.contains("/missing"));
    }

    #[test]
    fn test_open_rejects_file() {
        let tree = sample_tree();
        assert!(DirectoryArchive::open(tree.path().join("a.txt")).is_err());
    }

    #[test]
    fn test_refresh_picks_up_changes() {
        let tree = sample_tree();
        let archive = DirectoryArchive::open(tree.path()).unwrap();

        fs::write(tree.path().join("c.txt"), b"new").unwrap();
        fs::remove_file(tree.path().join("a.txt")).unwrap();
        archive.refresh().unwrap();

        assert!(archive.contains("/c.txt"));
        assert!(!archive.contains("/a.txt"));
    }

    #[tokio::test]
    async fn test_extract_without_overwrite() {
        let tree = sample_tree();
        let scratch = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::open(tree.path()).unwrap();

        let members = vec!["dir/b.txt".to_string()];
        let request = ExtractRequest {
            members: &members,
            destination: scratch.path(),
            password: None,
            overwrite: false,
        };
        archive.extract(request.clone()).await.unwrap();
        let target = scratch.path().join("dir/b.txt");
        assert_eq!(fs::read(&target).unwrap(), b"abc");

        // A present destination is left alone
        fs::write(&target, b"local").unwrap();
        archive.extract(request).await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_extract_unknown_member() {
        let tree = sample_tree();
        let scratch = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::open(tree.path()).unwrap();

        let members = vec!["nope.txt".to_string()];
        let err = archive
            .extract(ExtractRequest {
                members: &members,
                destination: scratch.path(),
                password: None,
                overwrite: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MemberNotFound(_)));
    }

    #[tokio::test]
    async fn test_extract_rejects_parent_components() {
        let tree = sample_tree();
        let scratch = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::open(tree.path()).unwrap();

        let members = vec!["../a.txt".to_string()];
        let err = archive
            .extract(ExtractRequest {
                members: &members,
                destination: scratch.path(),
                password: None,
                overwrite: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidMemberPath(_)));
    }
}
