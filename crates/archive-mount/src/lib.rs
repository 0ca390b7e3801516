//! Read-only, lazily extracting FUSE mounts of archives
//!
//! An [`ArchiveBridge`] exposes the members of an [`ArchiveEngine`] as a
//! directory tree under a private mount point. Reading a file extracts just
//! that member into a scratch directory; closing it throws the copy away.

pub mod archive;
pub mod config;
pub mod fuse;

pub use archive::{ArchiveEngine, ArchiveError, DirectoryArchive, ExtractRequest, FileData};
pub use config::{BridgeConfig, ConfigError};
pub use fuse::{ArchiveBridge, BridgeError, FsError, KernelOps, MountSession, ReconcileStats};
