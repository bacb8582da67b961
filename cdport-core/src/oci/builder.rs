//! Assembling component manifests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::archive::ComponentArchive;
use crate::blob::{BlobInfo, BlobWriter};
use crate::descriptor::{
    Access, ComponentDescriptor, LocalOciBlobAccess, OciRegistryRepository,
    UnstructuredTypedObject,
};
use crate::error::{Error, Result};

use super::blobcache::{write_cached, BlobCache};
use super::client::{BlobStore, RegistryClient};
use super::{
    encode_descriptor_layer, oci_ref, ComponentDescriptorConfig, OciDescriptor, OciManifest,
    COMPONENT_CONFIG_MEDIA_TYPE, COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE, RESOURCE_ANNOTATION,
};

/// Collects local blob layers and produces the component manifest
///
/// The descriptor layer and the config blob are generated by [`build`] and
/// written to the blob cache; the caller's blob store must serve the
/// resource layers.
///
/// [`build`]: ManifestBuilder::build
pub struct ManifestBuilder<'a> {
    cache: &'a dyn BlobCache,
    layers: Vec<OciDescriptor>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(cache: &'a dyn BlobCache) -> Self {
        Self {
            cache,
            layers: Vec::new(),
        }
    }

    /// Add a layer for a resource blob; layers are unique by digest
    pub fn add_resource_layer(&mut self, resource_name: &str, info: &BlobInfo) -> OciDescriptor {
        if let Some(existing) = self.layers.iter().find(|l| l.digest == info.digest) {
            return existing.clone();
        }
        let desc = OciDescriptor {
            media_type: info.media_type.clone(),
            digest: info.digest.clone(),
            size: info.size,
            annotations: Some(BTreeMap::from([(
                RESOURCE_ANNOTATION.to_string(),
                resource_name.to_string(),
            )])),
        };
        self.layers.push(desc.clone());
        desc
    }

    pub async fn build(self, cd: &ComponentDescriptor) -> Result<OciManifest> {
        let layer_data = encode_descriptor_layer(cd)?;
        let cd_layer = OciDescriptor::for_bytes(COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE, &layer_data);
        self.cache.add_bytes(&cd_layer, layer_data).await?;

        let config_data = serde_json::to_vec(&ComponentDescriptorConfig {
            component_descriptor_layer: Some(cd_layer.clone()),
        })?;
        let config = OciDescriptor::for_bytes(COMPONENT_CONFIG_MEDIA_TYPE, &config_data);
        self.cache.add_bytes(&config, config_data).await?;

        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(cd_layer);
        layers.extend(self.layers);
        Ok(OciManifest::new(config, layers))
    }
}

/// Serves archive blobs from disk and generated blobs from the cache
struct ArchiveBlobStore<'a> {
    files: HashMap<String, PathBuf>,
    cache: &'a dyn BlobCache,
}

#[async_trait]
impl BlobStore for ArchiveBlobStore<'_> {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
        match self.files.get(&desc.digest) {
            Some(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                tokio::io::copy(&mut file, writer).await?;
                Ok(())
            }
            None => write_cached(self.cache, desc, writer).await,
        }
    }
}

/// Push a component archive to `repo`, returning the manifest reference
///
/// `localFilesystemBlob` resources become `localOciBlob` layers of the
/// pushed manifest.
pub async fn push_archive(
    client: &dyn RegistryClient,
    archive: &ComponentArchive,
    repo: &OciRegistryRepository,
    cache: &dyn BlobCache,
) -> Result<String> {
    let mut cd = archive.descriptor().clone();
    cd.inject_repository_context(repo.to_context()?);

    let mut builder = ManifestBuilder::new(cache);
    let mut files = HashMap::new();
    for res in &mut cd.component.resources {
        let Some(Access::LocalFilesystemBlob(access)) = res.access_view()? else {
            continue;
        };
        let info = archive.file_blob_info(&access).await?;
        builder.add_resource_layer(&res.name, &info);
        files.insert(info.digest.clone(), archive.blob_path(&access.filename)?);
        res.access = Some(UnstructuredTypedObject::new(&LocalOciBlobAccess {
            digest: info.digest,
        })?);
    }

    let manifest = builder.build(&cd).await?;
    let reference = oci_ref(repo, cd.name(), cd.version())?;
    let store = ArchiveBlobStore { files, cache };
    client
        .push_manifest(&reference, &manifest, &store)
        .await
        .map_err(|e| match e {
            Error::NotFound(what) => Error::invalid(
                format!("component archive {}:{}", cd.name(), cd.version()),
                format!("missing content: {what}"),
            ),
            other => other,
        })?;
    tracing::info!("Pushed {}:{} to {}", cd.name(), cd.version(), reference);
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{MemoryBlobCache, COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_build_layout() {
        let cache = MemoryBlobCache::default();
        let mut builder = ManifestBuilder::new(&cache);
        let info = BlobInfo {
            media_type: "text/plain".into(),
            digest: crate::digest::sha256_digest(b"x"),
            size: 1,
        };
        builder.add_resource_layer("a", &info);
        builder.add_resource_layer("b", &info);

        let cd = ComponentDescriptor::new("example.com/c", "v1");
        let manifest = builder.build(&cd).await.unwrap();
        assert_eq!(manifest.config.media_type, COMPONENT_CONFIG_MEDIA_TYPE);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[0].media_type, COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE);
        assert_eq!(manifest.layers[1].annotation(RESOURCE_ANNOTATION), Some("a"));
        // descriptor layer and config
        assert_eq!(cache.len(), 2);
    }
}
