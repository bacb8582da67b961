//! Local cache of resolved component descriptors
//!
//! Layout: `<root>/<baseUrl with '/' replaced by '-'>/<name>-<version>`.
//! There is no in-process locking; concurrent writers to one key race and
//! the last write wins.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::descriptor::{codec, ComponentDescriptor, OciRegistryRepository};
use crate::error::{Error, Result};

#[async_trait]
pub trait ComponentCache: Send + Sync {
    /// Look up a descriptor; [`Error::NotFound`] on a miss
    async fn get(
        &self,
        repo: &OciRegistryRepository,
        name: &str,
        version: &str,
    ) -> Result<ComponentDescriptor>;

    /// Store a descriptor under its effective repository context
    async fn store(&self, cd: &ComponentDescriptor) -> Result<()>;
}

/// Cache backed by a directory tree
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    root: PathBuf,
}

impl FilesystemCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache entry for `(base_url, name, version)`
    ///
    /// Fails for keys with empty, `.` or `..` path segments, which would
    /// otherwise address files outside the cache root.
    pub fn entry_path(&self, base_url: &str, name: &str, version: &str) -> Result<PathBuf> {
        let dir = base_url.replace('/', "-");
        let file = format!("{name}-{version}");
        let unsafe_segment = std::iter::once(dir.as_str())
            .chain(file.split('/'))
            .find(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\\'));
        if let Some(segment) = unsafe_segment {
            return Err(Error::invalid(
                format!("cache key {base_url} {name}:{version}"),
                format!("path segment '{segment}' is not allowed"),
            ));
        }
        Ok(self.root.join(dir).join(file))
    }

    /// Remove every cached descriptor
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::debug!("Cleared component cache {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ComponentCache for FilesystemCache {
    async fn get(
        &self,
        repo: &OciRegistryRepository,
        name: &str,
        version: &str,
    ) -> Result<ComponentDescriptor> {
        let path = self.entry_path(&repo.base_url, name, version)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!(
                    "{name}:{version} not cached for {}",
                    repo.base_url
                )))
            }
            Err(e) => return Err(e.into()),
        };
        codec::decode(&data)
    }

    async fn store(&self, cd: &ComponentDescriptor) -> Result<()> {
        let ctx = cd.effective_repository_context().ok_or_else(|| {
            Error::invalid(
                "component descriptor",
                format!("{}:{} has no repository context", cd.name(), cd.version()),
            )
        })?;
        let repo = OciRegistryRepository::from_context(ctx)?;
        let path = self.entry_path(&repo.base_url, cd.name(), cd.version())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, codec::encode(cd)?).await?;
        tracing::debug!("Cached {}:{} at {}", cd.name(), cd.version(), path.display());
        Ok(())
    }
}
