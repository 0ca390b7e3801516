//! Bridge configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one archive bridge. Read-only and default permission checks
/// are always on and cannot be configured away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Filesystem name shown in the mount table
    pub fs_name: String,
    /// Entry/attribute TTL handed to the kernel, in milliseconds. Zero makes
    /// the kernel ask again every time, which keeps reconciled listings fresh.
    pub attr_ttl_ms: u64,
    /// Let the kernel unmount when the process dies
    pub auto_unmount: bool,
    /// Let other users (e.g. another user's file manager) see the mount
    pub allow_other: bool,
    /// Parent of the private scratch directory; system temp dir when unset
    pub scratch_parent: Option<PathBuf>,
    /// Parent of the private mount directory; system temp dir when unset
    pub mount_parent: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            fs_name: "archive-mount".to_string(),
            attr_ttl_ms: 0,
            auto_unmount: false,
            allow_other: false,
            scratch_parent: None,
            mount_parent: None,
        }
    }
}

impl BridgeConfig {
    /// Load a TOML config file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
