//! Kernel request handlers
//!
//! `MountSession` answers the six operations a read-only archive view needs.
//! It knows nothing about the FUSE wire format: results are plain values or an
//! [`FsError`], and the fuser binding turns them into replies.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{BridgeError, FsError};
use super::extract::{ErrorSlot, ExtractionCoordinator};
use super::inode_table::{InodeTable, ReconcileStats};
use crate::archive::FileData;

/// Permission bits for directories
pub const DIR_PERM: u16 = 0o755;
/// Permission bits for files; the mount is read-only regardless
pub const FILE_PERM: u16 = 0o644;

/// Pending read: resolves once the member is extracted and the range loaded
pub type ReadFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, FsError>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
}

/// Attributes of one inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAttr {
    pub ino: u64,
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
}

impl EntryAttr {
    fn new(ino: u64, is_dir: bool, size: u64) -> Self {
        if is_dir {
            Self {
                ino,
                kind: EntryKind::Directory,
                size,
                perm: DIR_PERM,
            }
        } else {
            Self {
                ino,
                kind: EntryKind::RegularFile,
                size,
                perm: FILE_PERM,
            }
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: EntryKind,
    pub name: String,
}

/// Accepted open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReply {
    /// Ask the kernel to bypass the page cache and send large reads
    pub direct_io: bool,
}

/// Operations the kernel binding dispatches to
pub trait KernelOps: Send + Sync + 'static {
    fn lookup(&self, parent: u64, name: &str) -> Result<EntryAttr, FsError>;

    fn getattr(&self, ino: u64) -> Result<EntryAttr, FsError>;

    /// Children of a directory, skipping the first `offset` entries
    fn readdir(&self, ino: u64, offset: usize) -> Result<Vec<DirEntry>, FsError>;

    fn open(&self, ino: u64, flags: i32) -> Result<OpenReply, FsError>;

    /// Validates the request immediately; the returned future carries the
    /// extraction and produces the bytes
    fn read(&self, ino: u64, offset: u64, size: u32) -> Result<ReadFuture, FsError>;

    fn release(&self, ino: u64) -> Result<(), FsError>;
}

struct Inner {
    /// `None` while unmounted
    table: RwLock<Option<InodeTable>>,
    coordinator: Arc<ExtractionCoordinator>,
    /// Replaced on every mount, cancelled on unmount
    cancel: Mutex<CancellationToken>,
    errors: Arc<ErrorSlot>,
}

/// Request handlers plus the state they share with the host
#[derive(Clone)]
pub struct MountSession {
    inner: Arc<Inner>,
}

impl MountSession {
    pub fn new(coordinator: ExtractionCoordinator, errors: Arc<ErrorSlot>) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(None),
                coordinator: Arc::new(coordinator),
                cancel: Mutex::new(CancellationToken::new()),
                errors,
            }),
        }
    }

    pub fn coordinator(&self) -> &ExtractionCoordinator {
        &self.inner.coordinator
    }

    pub fn errors(&self) -> &ErrorSlot {
        &self.inner.errors
    }

    pub fn is_active(&self) -> bool {
        self.inner.table.read().is_some()
    }

    /// Start serving: empty scratch directory, fresh table with the reserved
    /// slots, fresh cancellation
    pub fn activate(&self) {
        self.purge_scratch();
        *self.inner.cancel.lock() = CancellationToken::new();
        *self.inner.table.write() = Some(InodeTable::new());
    }

    /// Stop serving: drop the table first so handlers see the transition,
    /// then cancel in-flight reads and drop every scratch copy
    pub fn deactivate(&self) {
        self.inner.table.write().take();
        self.inner.cancel.lock().cancel();
        self.purge_scratch();
    }

    fn purge_scratch(&self) {
        let coordinator = &self.inner.coordinator;
        if let Err(e) = coordinator.purge() {
            self.inner
                .errors
                .record(&coordinator.scratch_dir().display().to_string(), &e);
        }
    }

    /// Bring the table in line with the archive listing. Holds the table
    /// write lock, so no handler sees a half-updated table.
    pub fn reconcile(&self, members: &[FileData]) -> Result<ReconcileStats, BridgeError> {
        let mut guard = self.inner.table.write();
        let table = guard.as_mut().ok_or(BridgeError::NotMounted)?;
        let stats = table.reconcile(members);
        debug!(
            created = stats.created,
            deleted = stats.deleted,
            inodes = table.len(),
            "inodes reconciled"
        );
        Ok(stats)
    }

    /// Inode currently assigned to a full archive path
    pub fn inode_of(&self, full_path: &str) -> Option<u64> {
        self.inner
            .table
            .read()
            .as_ref()
            .and_then(|table| table.get_inode(full_path))
    }

    fn table(&self) -> Result<MappedRwLockReadGuard<'_, InodeTable>, FsError> {
        RwLockReadGuard::try_map(self.inner.table.read(), |table| table.as_ref())
            .map_err(|_| FsError::NotConnected)
    }

    /// Canonical path of a directory inode. Tar full paths end with `/`;
    /// canonicalizing drops it.
    fn directory(table: &InodeTable, ino: u64) -> Result<String, FsError> {
        if ino != InodeTable::ROOT_INODE && !table.get(ino).is_some_and(FileData::is_dir) {
            return Err(FsError::NotADirectory);
        }
        table.dir_path(ino).ok_or(FsError::NotADirectory)
    }

    /// A member that can be opened, read or released
    fn regular_file(table: &InodeTable, ino: u64) -> Result<&FileData, FsError> {
        if ino == InodeTable::ROOT_INODE {
            return Err(FsError::IsADirectory);
        }
        let fdata = table.get(ino).ok_or(FsError::NotFound)?;
        if fdata.is_dir() {
            return Err(FsError::IsADirectory);
        }
        Ok(fdata)
    }
}

impl KernelOps for MountSession {
    fn lookup(&self, parent: u64, name: &str) -> Result<EntryAttr, FsError> {
        debug!(parent = parent, name = name, "lookup");
        let table = self.table()?;

        let dir_path = Self::directory(&table, parent)?;

        // A member literally named `.` (tar allows it) canonicalizes onto its
        // parent, so `.` always means the directory itself
        if name == "." {
            return Ok(EntryAttr::new(parent, true, table.entry_size(parent)));
        }

        let (ino, fdata) = table
            .find_child(&dir_path, name)
            .ok_or(FsError::NotFound)?;
        Ok(EntryAttr::new(ino, fdata.is_dir(), table.entry_size(ino)))
    }

    fn getattr(&self, ino: u64) -> Result<EntryAttr, FsError> {
        debug!(ino = ino, "getattr");
        let table = self.table()?;

        if ino == InodeTable::ROOT_INODE {
            return Ok(EntryAttr::new(ino, true, table.entry_size(ino)));
        }

        let fdata = table.get(ino).ok_or(FsError::NotFound)?;
        Ok(EntryAttr::new(ino, fdata.is_dir(), table.entry_size(ino)))
    }

    fn readdir(&self, ino: u64, offset: usize) -> Result<Vec<DirEntry>, FsError> {
        debug!(ino = ino, offset = offset, "readdir");
        let table = self.table()?;

        let dir_path = Self::directory(&table, ino)?;

        // A member named `.` or `..` would shadow the kernel's own entries
        Ok(table
            .children(&dir_path)
            .filter(|(_, fdata)| fdata.name != "." && fdata.name != "..")
            .skip(offset)
            .map(|(ino, fdata)| DirEntry {
                ino,
                kind: if fdata.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::RegularFile
                },
                name: fdata.name.clone(),
            })
            .collect())
    }

    fn open(&self, ino: u64, flags: i32) -> Result<OpenReply, FsError> {
        debug!(ino = ino, flags = flags, "open");

        if ino == InodeTable::ROOT_INODE {
            return Err(FsError::IsADirectory);
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_APPEND != 0 {
            return Err(FsError::PermissionDenied);
        }

        let table = self.table()?;
        Self::regular_file(&table, ino)?;

        // Every member is a private scratch copy, so skip the page cache
        Ok(OpenReply { direct_io: true })
    }

    fn read(&self, ino: u64, offset: u64, size: u32) -> Result<ReadFuture, FsError> {
        debug!(ino = ino, offset = offset, size = size, "read");

        let (full_path, original_path) = {
            let table = self.table()?;
            let fdata = Self::regular_file(&table, ino)?;
            (fdata.full_path.clone(), fdata.original_path.clone())
        };

        // Gone from the archive but not reconciled away yet
        if !self.inner.coordinator.contains(&full_path) {
            return Err(FsError::NotFound);
        }

        // Whether a scratch copy already exists is the coordinator's call
        let coordinator = Arc::clone(&self.inner.coordinator);
        let cancel = self.inner.cancel.lock().clone();

        Ok(Box::pin(async move {
            coordinator
                .read(&original_path, offset, size, &cancel)
                .await
                .map_err(FsError::from)
        }))
    }

    fn release(&self, ino: u64) -> Result<(), FsError> {
        debug!(ino = ino, "release");

        let original_path = {
            let table = self.table()?;
            let fdata = table.get(ino).ok_or(FsError::NotFound)?;
            if fdata.is_dir() {
                return Err(FsError::IsADirectory);
            }
            fdata.original_path.clone()
        };

        // Purging here means the next open + read sees fresh archive bytes
        if let Err(e) = self.inner.coordinator.discard(&original_path) {
            self.inner.errors.record(&original_path, &e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountSession")
            .field("active", &self.is_active())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}
