//! Shared fixtures: an in-memory archive engine and a ready-to-use session.
//!
//! Nothing here mounts anything; the handlers are driven directly.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::TempDir;

use archive_mount::archive::{member_path, ArchiveEngine, ArchiveError, ExtractRequest, FileData};
use archive_mount::fuse::{ErrorSlot, ExtractionCoordinator, MountSession};

/// Archive held in memory. Counts engine calls and honours `overwrite`.
#[derive(Default)]
pub struct MemoryArchive {
    /// Keyed by original path; `None` marks a directory
    entries: RwLock<BTreeMap<String, Option<Vec<u8>>>>,
    extract_calls: AtomicUsize,
    fail: AtomicBool,
    delay: RwLock<Option<Duration>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// `a.txt` ("hello"), `dir/` and `dir/b.txt` ("abc")
    pub fn sample() -> Self {
        let archive = Self::new();
        archive.add_file("a.txt", b"hello");
        archive.add_dir("dir");
        archive.add_file("dir/b.txt", b"abc");
        archive
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.entries
            .write()
            .insert(path.to_string(), Some(contents.to_vec()));
    }

    pub fn add_dir(&self, path: &str) {
        self.entries.write().insert(path.to_string(), None);
    }

    pub fn remove(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Make every following extraction fail
    pub fn fail_extractions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every extraction for a while, to force overlapping reads
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveEngine for MemoryArchive {
    fn members(&self) -> Vec<FileData> {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|(path, contents)| match contents {
                Some(bytes) => FileData::file(path, bytes.len() as u64),
                None => {
                    let prefix = format!("{}/", path);
                    let dir_size = entries
                        .iter()
                        .filter(|(other, _)| other.starts_with(&prefix))
                        .filter_map(|(_, contents)| contents.as_ref())
                        .map(|bytes| bytes.len() as u64)
                        .sum();
                    FileData::dir(path, dir_size)
                }
            })
            .collect()
    }

    fn contains(&self, full_path: &str) -> bool {
        self.members().iter().any(|m| m.full_path == full_path)
    }

    async fn extract(&self, request: ExtractRequest<'_>) -> Result<(), ArchiveError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::Extraction("injected failure".to_string()));
        }

        for member in request.members {
            let contents = self
                .entries
                .read()
                .get(member)
                .cloned()
                .ok_or_else(|| ArchiveError::MemberNotFound(member.clone()))?;

            let target = member_path(request.destination, member);
            if !request.overwrite && target.exists() {
                continue;
            }
            match contents {
                Some(bytes) => {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, bytes).await?;
                }
                None => tokio::fs::create_dir_all(&target).await?,
            }
        }
        Ok(())
    }
}

/// A session over an archive, activated and reconciled
pub struct Fixture {
    pub archive: Arc<MemoryArchive>,
    pub session: MountSession,
    pub errors: Arc<ErrorSlot>,
    pub scratch: TempDir,
}

impl Fixture {
    pub fn new(archive: MemoryArchive) -> Self {
        let archive = Arc::new(archive);
        let scratch = TempDir::new().unwrap();
        let errors = Arc::new(ErrorSlot::default());

        let coordinator = ExtractionCoordinator::new(
            archive.clone(),
            scratch.path().to_path_buf(),
            None,
            errors.clone(),
        );
        let session = MountSession::new(coordinator, errors.clone());
        session.activate();
        session.reconcile(&archive.members()).unwrap();

        Self {
            archive,
            session,
            errors,
            scratch,
        }
    }

    pub fn sample() -> Self {
        Self::new(MemoryArchive::sample())
    }

    pub fn reconcile(&self) {
        self.session.reconcile(&self.archive.members()).unwrap();
    }

    pub fn ino(&self, full_path: &str) -> u64 {
        self.session.inode_of(full_path).unwrap()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
