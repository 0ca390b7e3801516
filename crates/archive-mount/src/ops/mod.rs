//! Command-line operations

use std::path::PathBuf;

mod list;
mod mount;

pub use list::List;
pub use mount::Mount;

/// Shared inputs for every operation
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Bridge config file, if one was given
    pub config_path: Option<PathBuf>,
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}
