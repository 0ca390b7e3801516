//! Mount lifecycle
//!
//! `ArchiveBridge` owns everything one mounted archive needs: the private
//! mount and scratch directories, the request handlers, and the thread that
//! pumps kernel requests. The host drives it as
//! `new → mount → reconcile_inodes … → unmount → drop`.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use tempfile::TempDir;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::error::BridgeError;
use super::extract::{ErrorSlot, ExtractionCoordinator};
use super::inode_table::ReconcileStats;
use super::session::MountSession;
use crate::archive::{member_path, ArchiveEngine};
use crate::config::BridgeConfig;

/// A live kernel mount
#[cfg(feature = "fuse")]
struct ActiveMount {
    unmounter: fuser::SessionUnmounter,
    loop_thread: JoinHandle<()>,
}

#[cfg(not(feature = "fuse"))]
struct ActiveMount {
    loop_thread: JoinHandle<()>,
}

/// Read-only FUSE view of one archive
pub struct ArchiveBridge {
    archive: Arc<dyn ArchiveEngine>,
    config: BridgeConfig,
    runtime: Handle,
    session: MountSession,
    errors: Arc<ErrorSlot>,
    active: Option<ActiveMount>,
    /// Request threads of earlier mounts, joined on drop
    finished_loops: Vec<JoinHandle<()>>,
    // Declared last so they are removed after the mount is gone
    scratch_dir: TempDir,
    mount_dir: TempDir,
}

impl ArchiveBridge {
    /// Build a bridge on the current tokio runtime
    pub fn new(
        archive: Arc<dyn ArchiveEngine>,
        password: Option<String>,
        config: BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let runtime = Handle::try_current()
            .map_err(|e| BridgeError::Construct(format!("no tokio runtime: {}", e)))?;
        Self::with_runtime(archive, password, config, runtime)
    }

    /// Build a bridge whose reads run on `runtime`
    pub fn with_runtime(
        archive: Arc<dyn ArchiveEngine>,
        password: Option<String>,
        config: BridgeConfig,
        runtime: Handle,
    ) -> Result<Self, BridgeError> {
        let scratch_dir = private_dir(config.scratch_parent.as_deref(), ".archive-scratch-")?;
        let mount_dir = private_dir(config.mount_parent.as_deref(), ".archive-mount-")?;

        let errors = Arc::new(ErrorSlot::default());
        let coordinator = ExtractionCoordinator::new(
            Arc::clone(&archive),
            scratch_dir.path().to_path_buf(),
            password,
            Arc::clone(&errors),
        );
        let session = MountSession::new(coordinator, Arc::clone(&errors));

        Ok(Self {
            archive,
            config,
            runtime,
            session,
            errors,
            active: None,
            finished_loops: Vec::new(),
            scratch_dir,
            mount_dir,
        })
    }

    /// Mount the archive at the private mount directory and start serving.
    /// Mounting an already mounted bridge does nothing.
    pub fn mount(&mut self) -> Result<(), BridgeError> {
        if self.active.is_some() {
            return Ok(());
        }

        let mount_point = self.mount_dir.path().to_path_buf();
        let active = self.start_session(&mount_point)?;
        self.active = Some(active);

        info!(mount_point = %mount_point.display(), "archive mounted");
        info!(scratch_dir = %self.scratch_dir.path().display(), "members extract into scratch directory");
        Ok(())
    }

    #[cfg(feature = "fuse")]
    fn start_session(&self, mount_point: &Path) -> Result<ActiveMount, BridgeError> {
        use super::archive_fs::ArchiveFs;

        let fs = ArchiveFs::new(
            self.session.clone(),
            self.runtime.clone(),
            self.config.attr_ttl(),
        );
        let mut session = fuser::Session::new(fs, mount_point, &self.mount_options()).map_err(
            |source| BridgeError::Mount {
                mount_point: mount_point.to_path_buf(),
                source,
            },
        )?;
        let mut unmounter = session.unmount_callable();

        // The table must exist before the first request arrives
        self.session.activate();

        let spawned = std::thread::Builder::new()
            .name("fuse-session-loop".to_string())
            .spawn(move || {
                if let Err(e) = session.run() {
                    warn!(error = %e, "FUSE session loop exited with error");
                }
            });

        match spawned {
            Ok(loop_thread) => Ok(ActiveMount {
                unmounter,
                loop_thread,
            }),
            Err(e) => {
                self.session.deactivate();
                let _ = unmounter.unmount();
                Err(BridgeError::Thread(e))
            }
        }
    }

    #[cfg(not(feature = "fuse"))]
    fn start_session(&self, mount_point: &Path) -> Result<ActiveMount, BridgeError> {
        Err(BridgeError::Mount {
            mount_point: mount_point.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "fuse support disabled; rebuild with --features fuse",
            ),
        })
    }

    /// Read-only, kernel-checked permissions, plus whatever the config adds
    #[cfg(feature = "fuse")]
    fn mount_options(&self) -> Vec<fuser::MountOption> {
        use fuser::MountOption;

        let mut options = vec![
            MountOption::RO,
            MountOption::DefaultPermissions,
            MountOption::FSName(self.config.fs_name.clone()),
        ];
        if self.config.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.config.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }

    /// Stop serving and detach from the kernel. Unmounting an unmounted
    /// bridge does nothing. The request thread is joined on drop.
    pub fn unmount(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        // Handlers observe the transition before the kernel connection goes
        self.session.deactivate();

        #[cfg(feature = "fuse")]
        {
            let mut unmounter = active.unmounter;
            if let Err(e) = unmounter.unmount() {
                self.errors.record("unmount", &e);
            }
        }

        self.finished_loops.push(active.loop_thread);
        info!(mount_point = %self.mount_dir.path().display(), "archive unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.active.is_some()
    }

    /// Mount directory, only while mounted
    pub fn mount_root(&self) -> Option<&Path> {
        self.active.as_ref().map(|_| self.mount_dir.path())
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch_dir.path()
    }

    /// Sync the inode table with the archive's current listing. Call after
    /// the archive's member list changes; the bridge never notices on its own.
    pub fn reconcile_inodes(&self) -> Result<ReconcileStats, BridgeError> {
        if !self.is_mounted() {
            return Err(BridgeError::NotMounted);
        }
        self.session.reconcile(&self.archive.members())
    }

    /// True when `relative` exists under the mount root and is an ancestor of
    /// `file`. Lets a drag target confirm a file really comes from this mount.
    pub fn query_under_mount(&self, file: &Path, relative: &str) -> bool {
        self.mount_root()
            .is_some_and(|root| file_under(root, file, relative))
    }

    /// Request handlers; mostly useful to hosts embedding their own binding
    pub fn session(&self) -> &MountSession {
        &self.session
    }

    /// Most recent asynchronous failure (extraction, load, cleanup)
    pub fn last_error(&self) -> Option<String> {
        self.errors.get()
    }

    pub fn take_last_error(&self) -> Option<String> {
        self.errors.take()
    }

    /// Times the archive engine actually extracted a member
    pub fn extractions(&self) -> u64 {
        self.session.coordinator().extractions()
    }
}

impl Drop for ArchiveBridge {
    fn drop(&mut self) {
        self.unmount();

        for handle in self.finished_loops.drain(..) {
            if handle.join().is_err() {
                warn!("FUSE session loop panicked");
            }
        }
        // Scratch and mount directories are removed when their TempDirs drop
    }
}

impl std::fmt::Debug for ArchiveBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveBridge")
            .field("mount_dir", &self.mount_dir.path())
            .field("scratch_dir", &self.scratch_dir.path())
            .field("mounted", &self.is_mounted())
            .field("session", &self.session)
            .finish()
    }
}

/// True when `root/relative` exists and is a strict ancestor of `file`, at
/// any depth. `relative` never resolves above `root`.
fn file_under(root: &Path, file: &Path, relative: &str) -> bool {
    let candidate = member_path(root, relative);
    if !candidate.exists() {
        return false;
    }
    file != candidate && file.starts_with(&candidate)
}

fn private_dir(parent: Option<&Path>, prefix: &str) -> Result<TempDir, BridgeError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);

    let dir = match parent {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    };
    dir.map_err(|e| BridgeError::Construct(format!("failed to create temporary directory: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DirectoryArchive;

    fn archive() -> (tempfile::TempDir, Arc<dyn ArchiveEngine>) {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"hello").unwrap();
        let archive = DirectoryArchive::open(source.path()).unwrap();
        (source, Arc::new(archive))
    }

    #[tokio::test]
    async fn test_new_creates_private_dirs() {
        let (_source, archive) = archive();
        let bridge = ArchiveBridge::new(archive, None, BridgeConfig::default()).unwrap();

        assert!(bridge.scratch_dir().is_dir());
        assert!(!bridge.is_mounted());
        assert!(bridge.mount_root().is_none());
        assert!(bridge.last_error().is_none());
        assert_eq!(bridge.extractions(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_private_dirs() {
        let (_source, archive) = archive();
        let bridge = ArchiveBridge::new(archive, None, BridgeConfig::default()).unwrap();
        let scratch = bridge.scratch_dir().to_path_buf();
        std::fs::write(scratch.join("leftover"), b"x").unwrap();

        drop(bridge);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_configured_parents() {
        let (_source, archive) = archive();
        let parent = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            scratch_parent: Some(parent.path().to_path_buf()),
            mount_parent: Some(parent.path().to_path_buf()),
            ..BridgeConfig::default()
        };

        let bridge = ArchiveBridge::new(archive, None, config).unwrap();
        assert!(bridge.scratch_dir().starts_with(parent.path()));
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_missing_parent_fails_construction() {
        let (_source, archive) = archive();
        let parent = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            scratch_parent: Some(parent.path().join("missing")),
            ..BridgeConfig::default()
        };

        let err = ArchiveBridge::new(archive, None, config).unwrap_err();
        assert!(matches!(err, BridgeError::Construct(_)));
    }

    #[test]
    fn test_new_without_runtime() {
        let (_source, archive) = archive();
        let err = ArchiveBridge::new(archive, None, BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::Construct(_)));
    }

    fn mount_tree() -> tempfile::TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("root");
        std::fs::create_dir_all(root.join("dir").join("sub")).unwrap();
        std::fs::write(root.join("dir").join("sub").join("b.txt"), b"abc").unwrap();
        std::fs::create_dir_all(temp_dir.path().join("x")).unwrap();
        temp_dir
    }

    #[test]
    fn test_file_under_direct_parent() {
        let temp_dir = mount_tree();
        let root = temp_dir.path().join("root");

        let file = root.join("dir").join("sub").join("b.txt");
        assert!(file_under(&root, &file, "dir/sub"));
        assert!(file_under(&root, &file, "/dir/sub/"));
    }

    #[test]
    fn test_file_under_deeper_ancestor() {
        let temp_dir = mount_tree();
        let root = temp_dir.path().join("root");

        let file = root.join("dir").join("sub").join("b.txt");
        assert!(file_under(&root, &file, "dir"));
        assert!(file_under(&root, &file, ""));
    }

    #[test]
    fn test_file_under_rejects_self() {
        let temp_dir = mount_tree();
        let root = temp_dir.path().join("root");

        let dir = root.join("dir");
        assert!(!file_under(&root, &dir, "dir"));
    }

    #[test]
    fn test_file_under_missing_relative() {
        let temp_dir = mount_tree();
        let root = temp_dir.path().join("root");

        let file = root.join("nope").join("b.txt");
        assert!(!file_under(&root, &file, "nope"));
    }

    #[test]
    fn test_file_under_outside_root() {
        let temp_dir = mount_tree();
        let root = temp_dir.path().join("root");

        let outside = temp_dir.path().join("x").join("f.txt");
        assert!(!file_under(&root, &outside, "dir"));
        // `..` stays inside the root, where there is no `x`
        assert!(!file_under(&root, &outside, "../x"));
    }

    #[tokio::test]
    async fn test_unmounted_operations() {
        let (_source, archive) = archive();
        let mut bridge = ArchiveBridge::new(archive, None, BridgeConfig::default()).unwrap();

        assert!(matches!(
            bridge.reconcile_inodes(),
            Err(BridgeError::NotMounted)
        ));
        assert!(!bridge.query_under_mount(Path::new("/tmp/a.txt"), ""));

        // Unmounting twice is harmless
        bridge.unmount();
        bridge.unmount();
        assert!(!bridge.is_mounted());
    }
}
