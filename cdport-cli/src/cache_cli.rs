//! Local descriptor cache commands

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::Session;

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cache directories
    Dir,

    /// Remove every cached descriptor
    Clear,
}

impl CacheCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let config = session.config();
        match self {
            CacheCommand::Dir => {
                println!("components: {}", config.cache_dir()?.display());
                println!("blobs: {}", config.blob_cache_dir()?.display());
                Ok(())
            }
            CacheCommand::Clear => {
                let cache = config.component_cache()?;
                cache
                    .clear()
                    .await
                    .with_context(|| format!("Failed to clear {}", cache.root().display()))?;
                println!("Cleared {}", cache.root().display());
                Ok(())
            }
        }
    }
}
