//! fuser binding
//!
//! Adapts any [`KernelOps`] to fuser's `Filesystem` callbacks. Synchronous
//! handlers reply inline on the session thread; reads are spawned onto the
//! tokio runtime and the reply is completed from the task once the member has
//! been extracted and loaded.

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use tokio::runtime::Handle;
use tracing::trace;

use super::session::{EntryAttr, EntryKind, KernelOps};

/// FUSE filesystem serving an archive through a [`KernelOps`] implementation
pub struct ArchiveFs<S: KernelOps> {
    ops: S,
    runtime: Handle,
    /// TTL handed to the kernel for entries and attributes
    ttl: Duration,
    uid: u32,
    gid: u32,
    /// Timestamp reported for every inode
    mounted_at: SystemTime,
}

impl<S: KernelOps> ArchiveFs<S> {
    pub fn new(ops: S, runtime: Handle, ttl: Duration) -> Self {
        Self {
            ops,
            runtime,
            ttl,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            mounted_at: SystemTime::now(),
        }
    }

    fn file_attr(&self, attr: &EntryAttr) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::RegularFile => FileType::RegularFile,
    }
}

impl<S: KernelOps> Filesystem for ArchiveFs<S> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        // Archive member names are UTF-8; anything else cannot match
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.ops.lookup(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &self.file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.ops.getattr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &self.file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let start = usize::try_from(offset).unwrap_or(0);

        let entries = match self.ops.readdir(ino, start) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        for (i, entry) in entries.iter().enumerate() {
            let next = (start + i + 1) as i64;
            // reply.add returns true once the kernel buffer is full
            if reply.add(entry.ino, next, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.ops.open(ino, flags) {
            Ok(open) => {
                let open_flags = if open.direct_io { FOPEN_DIRECT_IO } else { 0 };
                reply.opened(0, open_flags);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };

        let pending = match self.ops.read(ino, offset, size) {
            Ok(pending) => pending,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        // The request stays outstanding until the task answers it
        self.runtime.spawn(async move {
            match pending.await {
                Ok(data) => {
                    trace!(ino = ino, bytes = data.len(), "read complete");
                    reply.data(&data);
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.ops.release(ino) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
