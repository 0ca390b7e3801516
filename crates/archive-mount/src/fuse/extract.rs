//! Lazy extraction of archive members into the scratch directory
//!
//! A read goes through two asynchronous steps: make sure the member has a
//! scratch copy (extracting it on first use), then load the requested byte
//! range from that copy. The kernel splits one `read()` of a large file into
//! many ~128 KiB requests, so only the first one may pay for extraction.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ExtractError;
use crate::archive::{member_path, ArchiveEngine, ExtractRequest};

/// Most recent asynchronous failure. Overwritten, never accumulated.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    last: Mutex<Option<String>>,
}

impl ErrorSlot {
    pub fn record(&self, context: &str, error: &dyn Display) {
        warn!(context = context, error = %error, "asynchronous operation failed");
        *self.last.lock() = Some(format!("{}: {}", context, error));
    }

    pub fn get(&self) -> Option<String> {
        self.last.lock().clone()
    }

    pub fn take(&self) -> Option<String> {
        self.last.lock().take()
    }
}

/// Drives extract → load for read requests against one archive
pub struct ExtractionCoordinator {
    archive: Arc<dyn ArchiveEngine>,
    scratch_dir: PathBuf,
    password: Option<String>,
    /// Serializes extraction per member (keyed by original path)
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    extractions: AtomicU64,
    errors: Arc<ErrorSlot>,
}

impl ExtractionCoordinator {
    pub fn new(
        archive: Arc<dyn ArchiveEngine>,
        scratch_dir: PathBuf,
        password: Option<String>,
        errors: Arc<ErrorSlot>,
    ) -> Self {
        Self {
            archive,
            scratch_dir,
            password,
            locks: Mutex::new(HashMap::new()),
            extractions: AtomicU64::new(0),
            errors,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Where a member's extracted copy lives
    pub fn scratch_path(&self, original_path: &str) -> PathBuf {
        member_path(&self.scratch_dir, original_path)
    }

    /// Number of times the archive engine was actually asked to extract
    pub fn extractions(&self) -> u64 {
        self.extractions.load(Ordering::SeqCst)
    }

    /// Return `[offset, offset + size)` of a member, clamped to its length.
    ///
    /// Failures are recorded in the shared error slot before being returned.
    pub async fn read(
        &self,
        original_path: &str,
        offset: u64,
        size: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ExtractError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            result = self.extract_and_load(original_path, offset, size) => result,
        };

        if let Err(e) = &result {
            self.errors.record(original_path, e);
        }
        result
    }

    async fn extract_and_load(
        &self,
        original_path: &str,
        offset: u64,
        size: u32,
    ) -> Result<Vec<u8>, ExtractError> {
        let path = self.ensure_extracted(original_path).await?;
        load_range(&path, offset, size).await
    }

    /// Make sure the member has a scratch copy, extracting it if needed.
    ///
    /// Overlapping calls for the same member wait on each other; whoever comes
    /// second finds the copy present and skips the engine entirely. The
    /// engine is still told not to overwrite.
    pub async fn ensure_extracted(&self, original_path: &str) -> Result<PathBuf, ExtractError> {
        let target = self.scratch_path(original_path);
        let lock = self.member_lock(original_path);
        let _guard = lock.lock().await;

        let exists = tokio::fs::try_exists(&target)
            .await
            .map_err(|source| ExtractError::Load {
                path: target.clone(),
                source,
            })?;
        if exists {
            debug!(member = %original_path, "scratch copy present, skipping extraction");
            return Ok(target);
        }

        let members = vec![original_path.to_string()];
        self.archive
            .extract(ExtractRequest {
                members: &members,
                destination: &self.scratch_dir,
                password: self.password.as_deref(),
                overwrite: false,
            })
            .await?;
        self.extractions.fetch_add(1, Ordering::SeqCst);

        debug!(member = %original_path, target = %target.display(), "member extracted");
        Ok(target)
    }

    /// Remove a member's scratch copy if there is one.
    ///
    /// Returns whether a file was deleted. Opening and closing without a read
    /// never produced a copy, so that case is a silent no-op.
    pub fn discard(&self, original_path: &str) -> io::Result<bool> {
        let target = self.scratch_path(original_path);

        let removed = match std::fs::remove_file(&target) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };

        // Drop the per-member lock once nobody is waiting on it
        let mut locks = self.locks.lock();
        if locks
            .get(original_path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(original_path);
        }

        if removed {
            debug!(member = %original_path, "scratch copy removed");
        }
        Ok(removed)
    }

    /// Empty the scratch directory and forget every per-member lock.
    ///
    /// Files still open when the kernel connection goes away never get a
    /// release, and a cancelled extraction may leave a partial copy behind.
    /// Either would be served as-is by the next mount. Returns the number of
    /// top-level entries removed.
    pub fn purge(&self) -> io::Result<usize> {
        self.locks.lock().clear();

        let entries = match std::fs::read_dir(&self.scratch_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
            removed += 1;
        }

        if removed > 0 {
            debug!(removed = removed, scratch_dir = %self.scratch_dir.display(), "scratch directory purged");
        }
        Ok(removed)
    }

    /// Whether the archive still lists a member
    pub fn contains(&self, full_path: &str) -> bool {
        self.archive.contains(full_path)
    }

    fn member_lock(&self, original_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(original_path.to_string())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for ExtractionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionCoordinator")
            .field("scratch_dir", &self.scratch_dir)
            .field("extractions", &self.extractions())
            .field("pending_locks", &self.locks.lock().len())
            .finish()
    }
}

/// Read at most `size` bytes at `offset`. Past the end yields an empty buffer.
async fn load_range(path: &Path, offset: u64, size: u32) -> Result<Vec<u8>, ExtractError> {
    let load_error = |source: io::Error| ExtractError::Load {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(load_error)?;
    let len = file.metadata().await.map_err(load_error)?.len();
    if offset >= len {
        return Ok(Vec::new());
    }

    let wanted = (len - offset).min(u64::from(size)) as usize;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(load_error)?;

    let mut buffer = vec![0u8; wanted];
    file.read_exact(&mut buffer).await.map_err(load_error)?;
    Ok(buffer)
}
