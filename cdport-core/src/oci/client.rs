//! Registry client seam

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::blob::BlobWriter;
use crate::error::{Error, Result};

use super::reference::Reference;
use super::{OciDescriptor, OciManifest, RawManifest};

/// Largest blob [`fetch_bytes`] reads into memory
pub const MAX_BUFFERED_BLOB_SIZE: u64 = 64 * 1024 * 1024;

/// Supplies blob content while a manifest is pushed
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()>;
}

/// Minimal OCI distribution client
///
/// References are full `host/repository:tag` strings.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch a manifest or index unchanged; [`Error::NotFound`] if absent
    async fn get_raw_manifest(&self, reference: &str) -> Result<RawManifest>;

    /// Fetch and decode an image manifest
    async fn get_manifest(&self, reference: &str) -> Result<OciManifest> {
        self.get_raw_manifest(reference).await?.parse()
    }

    /// Stream one blob of the repository into `writer`
    async fn fetch(&self, reference: &str, desc: &OciDescriptor, writer: BlobWriter<'_>)
        -> Result<()>;

    /// Upload missing blobs from `store`, then the manifest bytes as given
    ///
    /// Children of an index must already be present in the repository.
    async fn push_raw_manifest(
        &self,
        reference: &str,
        manifest: &RawManifest,
        store: &dyn BlobStore,
    ) -> Result<()>;

    async fn push_manifest(
        &self,
        reference: &str,
        manifest: &OciManifest,
        store: &dyn BlobStore,
    ) -> Result<()> {
        self.push_raw_manifest(reference, &manifest.to_raw()?, store)
            .await
    }
}

#[async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    async fn get_raw_manifest(&self, reference: &str) -> Result<RawManifest> {
        (**self).get_raw_manifest(reference).await
    }

    async fn get_manifest(&self, reference: &str) -> Result<OciManifest> {
        (**self).get_manifest(reference).await
    }

    async fn fetch(
        &self,
        reference: &str,
        desc: &OciDescriptor,
        writer: BlobWriter<'_>,
    ) -> Result<()> {
        (**self).fetch(reference, desc, writer).await
    }

    async fn push_raw_manifest(
        &self,
        reference: &str,
        manifest: &RawManifest,
        store: &dyn BlobStore,
    ) -> Result<()> {
        (**self).push_raw_manifest(reference, manifest, store).await
    }

    async fn push_manifest(
        &self,
        reference: &str,
        manifest: &OciManifest,
        store: &dyn BlobStore,
    ) -> Result<()> {
        (**self).push_manifest(reference, manifest, store).await
    }
}

/// Read a whole blob into memory; only for small blobs such as configs
///
/// Sizes come from registry manifests, so anything above
/// [`MAX_BUFFERED_BLOB_SIZE`] is refused before allocating.
pub async fn fetch_bytes(
    client: &dyn RegistryClient,
    reference: &str,
    desc: &OciDescriptor,
) -> Result<Vec<u8>> {
    if desc.size > MAX_BUFFERED_BLOB_SIZE {
        return Err(Error::invalid(
            format!("blob {} in {reference}", desc.digest),
            format!(
                "declared size {} exceeds the in-memory limit of {MAX_BUFFERED_BLOB_SIZE} bytes",
                desc.size
            ),
        ));
    }
    let mut data = Vec::new();
    client.fetch(reference, desc, &mut data).await?;
    if data.len() as u64 != desc.size {
        return Err(Error::invalid(
            format!("blob {} in {reference}", desc.digest),
            format!("declared size {} but read {} bytes", desc.size, data.len()),
        ));
    }
    Ok(data)
}

/// Serves blobs by streaming them from another repository
struct SourceBlobStore<'a> {
    client: &'a dyn RegistryClient,
    reference: &'a str,
}

#[async_trait]
impl BlobStore for SourceBlobStore<'_> {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
        self.client.fetch(self.reference, desc, writer).await
    }
}

/// Copy an artifact byte for byte from `src` to `dst`
///
/// Image indexes are copied with all their child manifests, each pushed by
/// digest before the index itself.
pub async fn copy_artifact(client: &dyn RegistryClient, src: &str, dst: &str) -> Result<RawManifest> {
    tracing::debug!("Copying artifact {} to {}", src, dst);
    let manifest = client.get_raw_manifest(src).await?;
    if let Some(digest) = &Reference::parse(src)?.digest {
        manifest.verify_digest(digest)?;
    }
    copy_manifest(client, src, dst, &manifest).await?;
    Ok(manifest)
}

fn copy_manifest<'a>(
    client: &'a dyn RegistryClient,
    src: &'a str,
    dst: &'a str,
    manifest: &'a RawManifest,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let (src_ref, dst_ref) = (Reference::parse(src)?, Reference::parse(dst)?);
        for child in manifest.children()? {
            let child_src = src_ref.with_digest(child.digest.as_str()).to_string();
            let child_dst = dst_ref.with_digest(child.digest.as_str()).to_string();
            let child_manifest = client.get_raw_manifest(&child_src).await?;
            child_manifest.verify_digest(&child.digest)?;
            copy_manifest(client, &child_src, &child_dst, &child_manifest).await?;
        }
        let store = SourceBlobStore {
            client,
            reference: src,
        };
        client.push_raw_manifest(dst, manifest, &store).await
    })
}
