//! FUSE view of an archive
//!
//! Mounts an archive read-only in a private directory so a file manager can
//! copy members out without extracting the whole archive first. Members are
//! extracted lazily on first read and their scratch copies dropped on close.
//!
//! # Architecture
//!
//! - `ArchiveBridge`: Owns the mount, the scratch directory and their lifecycle
//! - `MountSession`: Answers kernel requests against the inode table
//! - `ArchiveFs`: fuser binding that forwards to a `KernelOps` implementation
//! - `InodeTable`: Append-only inode ↔ member mapping
//! - `ExtractionCoordinator`: Extracts each member at most once and loads ranges
//!
//! # Consistency
//!
//! The bridge never watches the archive. After the member list changes the
//! host calls `ArchiveBridge::reconcile_inodes`, which assigns fresh inodes to
//! new members and retires the ones that disappeared.

#[cfg(feature = "fuse")]
mod archive_fs;
mod bridge;
mod error;
mod extract;
mod inode_table;
mod session;

#[cfg(feature = "fuse")]
pub use archive_fs::ArchiveFs;
pub use bridge::ArchiveBridge;
pub use error::{BridgeError, ExtractError, FsError};
pub use extract::{ErrorSlot, ExtractionCoordinator};
pub use inode_table::{InodeTable, ReconcileStats};
pub use session::{
    DirEntry, EntryAttr, EntryKind, KernelOps, MountSession, OpenReply, ReadFuture, DIR_PERM,
    FILE_PERM,
};
