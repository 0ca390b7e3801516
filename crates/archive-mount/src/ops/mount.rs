use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use super::{Op, OpContext};
use archive_mount::{ArchiveBridge, BridgeConfig, BridgeError, ConfigError, DirectoryArchive};

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Unpacked archive tree to mount
    pub source: PathBuf,

    /// Password handed to the archive engine on extraction
    #[arg(long, env = "ARCHIVE_MOUNT_PASSWORD")]
    pub password: Option<String>,
}

#[async_trait::async_trait]
impl Op for Mount {
    type Error = MountError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let config = match &ctx.config_path {
            Some(path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };

        let archive =
            DirectoryArchive::open(&self.source).map_err(|source| MountError::Open {
                path: self.source.clone(),
                source,
            })?;

        let mut bridge = ArchiveBridge::new(Arc::new(archive), self.password.clone(), config)?;
        bridge.mount()?;
        let stats = bridge.reconcile_inodes()?;

        if let Some(root) = bridge.mount_root() {
            // Printed directly so scripts can pick up the path
            println!("{}", root.display());
            info!(members = stats.created, mount_point = %root.display(), "serving archive, Ctrl-C to unmount");
        }

        tokio::signal::ctrl_c().await.map_err(MountError::Signal)?;

        bridge.unmount();
        if let Some(error) = bridge.take_last_error() {
            info!(error = %error, "last error before unmount");
        }
        let extractions = bridge.extractions();
        drop(bridge);

        Ok(format!("unmounted after {} extraction(s)", extractions))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("failed to wait for Ctrl-C: {0}")]
    Signal(#[source] std::io::Error),
}

impl std::fmt::Display for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mount {}", self.source.display())
    }
}
