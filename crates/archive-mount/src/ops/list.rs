use std::path::PathBuf;

use clap::Args;

use super::{Op, OpContext};
use archive_mount::{ArchiveEngine, DirectoryArchive};

#[derive(Args, Debug, Clone)]
pub struct List {
    /// Unpacked archive tree to list
    pub source: PathBuf,
}

#[async_trait::async_trait]
impl Op for List {
    type Error = ListError;
    type Output = String;

    async fn execute(&self, _ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let archive =
            DirectoryArchive::open(&self.source).map_err(|source| ListError::Open {
                path: self.source.clone(),
                source,
            })?;

        let members = archive.members();
        if members.is_empty() {
            return Ok("Archive is empty".to_string());
        }

        let mut output = String::new();
        output.push_str(&format!("{:<60} {:>12}\n", "MEMBER", "SIZE"));
        output.push_str(&"-".repeat(73));
        output.push('\n');

        for member in members {
            let size = if member.is_dir() {
                "-".to_string()
            } else {
                member.size.to_string()
            };
            output.push_str(&format!("{:<60} {:>12}\n", member.full_path, size));
        }

        Ok(output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl std::fmt::Display for List {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "list {}", self.source.display())
    }
}
