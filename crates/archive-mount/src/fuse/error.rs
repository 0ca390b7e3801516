use std::path::PathBuf;

use crate::archive::ArchiveError;

/// Host-facing errors of the bridge lifecycle
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to create FUSE session: {0}")]
    Construct(String),
    #[error("failed to mount FUSE at {}: {source}", mount_point.display())]
    Mount {
        mount_point: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start FUSE request thread: {0}")]
    Thread(#[source] std::io::Error),
    #[error("archive is not mounted")]
    NotMounted,
}

/// Errors answered to the kernel by the request handlers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("filesystem is not mounted")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(String),
}

impl FsError {
    /// Errno reported to the calling process
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::PermissionDenied => libc::EACCES,
            FsError::NotConnected => libc::ENOTCONN,
            FsError::Io(_) => libc::EIO,
        }
    }
}

/// Failures of the extract → load pipeline
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("extraction cancelled")]
    Cancelled,
}

impl From<ExtractError> for FsError {
    fn from(e: ExtractError) -> Self {
        FsError::Io(e.to_string())
    }
}
