//! Content-addressed store for generated blobs
//!
//! Descriptor layers and config blobs are created locally before a push;
//! they are kept here until the registry asks for them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::blob::BlobWriter;
use crate::digest::{copy_hashed, digest_filename, sha256_digest};
use crate::error::{Error, Result};

use super::client::BlobStore;
use super::OciDescriptor;

pub type BlobReader = Box<dyn AsyncRead + Unpin + Send>;

#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Store content for `desc`; the content must match its digest
    async fn add(&self, desc: &OciDescriptor, reader: &mut (dyn AsyncRead + Unpin + Send))
        -> Result<()>;

    /// Open stored content; [`Error::NotFound`] if absent
    async fn get(&self, desc: &OciDescriptor) -> Result<BlobReader>;

    async fn add_bytes(&self, desc: &OciDescriptor, data: Vec<u8>) -> Result<()> {
        let mut reader: &[u8] = &data;
        self.add(desc, &mut reader).await
    }
}

/// Stream cached content for `desc` into `writer`
pub async fn write_cached(
    cache: &(impl BlobCache + ?Sized),
    desc: &OciDescriptor,
    writer: BlobWriter<'_>,
) -> Result<()> {
    let mut reader = cache.get(desc).await?;
    tokio::io::copy(&mut reader, writer).await?;
    Ok(())
}

fn mismatch(desc: &OciDescriptor, actual: &str) -> Error {
    Error::invalid(
        format!("blob {}", desc.digest),
        format!("content digest is {actual}"),
    )
}

#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobCache {
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn add(
        &self,
        desc: &OciDescriptor,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let actual = sha256_digest(&data);
        if actual != desc.digest {
            return Err(mismatch(desc, &actual));
        }
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(desc.digest.clone(), data);
        Ok(())
    }

    async fn get(&self, desc: &OciDescriptor) -> Result<BlobReader> {
        let data = self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("cached blob {}", desc.digest)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobCache {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
        write_cached(self, desc, writer).await
    }
}

/// Blob cache in a directory, one `sha256.<hex>` file per blob
#[derive(Debug, Clone)]
pub struct FilesystemBlobCache {
    root: PathBuf,
}

impl FilesystemBlobCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.root.join(digest_filename(digest)?))
    }
}

#[async_trait]
impl BlobCache for FilesystemBlobCache {
    async fn add(
        &self,
        desc: &OciDescriptor,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        let path = self.path(&desc.digest)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(tmp.path())
            .await?;
        let (actual, _) = copy_hashed(reader, &mut file).await?;
        drop(file);
        if actual != desc.digest {
            return Err(mismatch(desc, &actual));
        }
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!("Cached blob {} at {}", desc.digest, path.display());
        Ok(())
    }

    async fn get(&self, desc: &OciDescriptor) -> Result<BlobReader> {
        let path = self.path(&desc.digest)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("cached blob {}", desc.digest)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobCache {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
        write_cached(self, desc, writer).await
    }
}
