//! In-process registry
//!
//! Holds manifests and blobs per repository across any number of hosts.
//! Pushed blobs are verified against their descriptor digest.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;

use crate::blob::BlobWriter;
use crate::digest::sha256_digest;
use crate::error::{Error, Result};

use super::client::{BlobStore, RegistryClient};
use super::reference::Reference;
use super::{OciDescriptor, RawManifest};

#[derive(Debug, Default)]
struct Repository {
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, RawManifest>,
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
    manifest_writes: AtomicUsize,
    blob_writes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of manifest pushes accepted so far
    pub fn manifest_writes(&self) -> usize {
        self.manifest_writes.load(Ordering::SeqCst)
    }

    /// Number of blobs uploaded so far
    pub fn blob_writes(&self) -> usize {
        self.blob_writes.load(Ordering::SeqCst)
    }

    /// Total registry writes
    pub fn writes(&self) -> usize {
        self.manifest_writes() + self.blob_writes()
    }

    pub fn has_blob(&self, reference: &str, digest: &str) -> bool {
        let Ok(r) = Reference::parse(reference) else {
            return false;
        };
        self.lock()
            .get(&r.name())
            .is_some_and(|repo| repo.blobs.contains_key(digest))
    }

    /// Names (`host/repository`) of all repositories holding content
    pub fn repositories(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Repository>> {
        self.repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn get_raw_manifest(&self, reference: &str) -> Result<RawManifest> {
        let r = Reference::parse(reference)?;
        self.lock()
            .get(&r.name())
            .and_then(|repo| repo.manifests.get(r.locator()).cloned())
            .ok_or_else(|| Error::not_found(format!("manifest {reference}")))
    }

    async fn fetch(
        &self,
        reference: &str,
        desc: &OciDescriptor,
        writer: BlobWriter<'_>,
    ) -> Result<()> {
        let r = Reference::parse(reference)?;
        let data = self
            .lock()
            .get(&r.name())
            .and_then(|repo| repo.blobs.get(&desc.digest).cloned())
            .ok_or_else(|| Error::not_found(format!("blob {} in {}", desc.digest, r.name())))?;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn push_raw_manifest(
        &self,
        reference: &str,
        manifest: &RawManifest,
        store: &dyn BlobStore,
    ) -> Result<()> {
        let r = Reference::parse(reference)?;
        let name = r.name();
        let digest = manifest.digest();
        if let Some(pinned) = &r.digest {
            manifest.verify_digest(pinned)?;
        }

        for child in manifest.children()? {
            let present = self
                .lock()
                .get(&name)
                .is_some_and(|repo| repo.manifests.contains_key(&child.digest));
            if !present {
                return Err(Error::invalid(
                    format!("index {digest}"),
                    format!("child manifest {} is not in {name}", child.digest),
                ));
            }
        }

        for desc in manifest.blobs()? {
            let present = self
                .lock()
                .get(&name)
                .is_some_and(|repo| repo.blobs.contains_key(&desc.digest));
            if present {
                continue;
            }
            let mut data = Vec::new();
            store.write_blob(&desc, &mut data).await?;
            let actual = sha256_digest(&data);
            if actual != desc.digest || data.len() as u64 != desc.size {
                return Err(Error::invalid(
                    format!("blob {}", desc.digest),
                    format!("content has digest {actual} and size {}", data.len()),
                ));
            }
            self.lock()
                .entry(name.clone())
                .or_default()
                .blobs
                .insert(desc.digest.clone(), data);
            self.blob_writes.fetch_add(1, Ordering::SeqCst);
        }

        let mut repos = self.lock();
        let repo = repos.entry(name).or_default();
        if let Some(tag) = &r.tag {
            repo.manifests.insert(tag.clone(), manifest.clone());
        }
        repo.manifests.insert(digest, manifest.clone());
        self.manifest_writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Pushed manifest {}", reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{copy_artifact, BlobCache, MemoryBlobCache, OciManifest, INDEX_MEDIA_TYPE};

    async fn seed(registry: &MemoryRegistry, reference: &str) -> OciManifest {
        let cache = MemoryBlobCache::default();
        let config = OciDescriptor::for_bytes("application/json", b"{}");
        let layer = OciDescriptor::for_bytes("text/plain", b"layer");
        cache.add_bytes(&config, b"{}".to_vec()).await.unwrap();
        cache.add_bytes(&layer, b"layer".to_vec()).await.unwrap();
        let manifest = OciManifest::new(config, vec![layer]);
        registry.push_manifest(reference, &manifest, &cache).await.unwrap();
        manifest
    }

    #[tokio::test]
    async fn test_push_and_get() {
        let registry = MemoryRegistry::new();
        let manifest = seed(&registry, "r1.example.com/img:v1").await;
        assert_eq!(registry.get_manifest("r1.example.com/img:v1").await.unwrap(), manifest);
        assert_eq!(registry.blob_writes(), 2);
        assert_eq!(registry.manifest_writes(), 1);

        let err = registry.get_manifest("r1.example.com/img:v2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_push_rejects_wrong_content() {
        let registry = MemoryRegistry::new();
        let cache = MemoryBlobCache::default();
        let config = OciDescriptor::for_bytes("application/json", b"{}");
        cache.add_bytes(&config, b"{}".to_vec()).await.unwrap();
        let mut layer = OciDescriptor::for_bytes("text/plain", b"layer");
        layer.size = 3;
        cache.add_bytes(&layer, b"layer".to_vec()).await.unwrap();
        let manifest = OciManifest::new(config, vec![layer]);
        let err = registry
            .push_manifest("r1.example.com/img:v1", &manifest, &cache)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_copy_artifact_across_hosts() {
        let registry = MemoryRegistry::new();
        let manifest = seed(&registry, "r1.example.com/img:v1").await;
        copy_artifact(&registry, "r1.example.com/img:v1", "r2.example.com/mirror/img:v1")
            .await
            .unwrap();
        assert_eq!(
            registry.get_manifest("r2.example.com/mirror/img:v1").await.unwrap(),
            manifest
        );
        assert!(registry.has_blob("r2.example.com/mirror/img:v1", &manifest.layers[0].digest));
        assert_eq!(
            registry.repositories(),
            vec!["r1.example.com/img", "r2.example.com/mirror/img"]
        );
    }

    #[tokio::test]
    async fn test_copy_keeps_manifest_bytes() {
        let registry = MemoryRegistry::new();
        let cache = MemoryBlobCache::default();
        let config = OciDescriptor::for_bytes("application/json", b"{}");
        let layer = OciDescriptor::for_bytes("text/plain", b"layer");
        cache.add_bytes(&config, b"{}".to_vec()).await.unwrap();
        cache.add_bytes(&layer, b"layer".to_vec()).await.unwrap();
        let data = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": crate::oci::MANIFEST_MEDIA_TYPE,
            "artifactType": "application/vnd.example.sbom",
            "config": config,
            "layers": [{
                "mediaType": layer.media_type,
                "digest": layer.digest,
                "size": layer.size,
                "urls": ["https://mirror.example.com/layer"],
            }],
        }))
        .unwrap();
        let raw = RawManifest::from_registry(None, data.clone()).unwrap();
        let digest = raw.digest();
        registry
            .push_raw_manifest("r1.example.com/img:v1", &raw, &cache)
            .await
            .unwrap();

        let pinned = format!("r1.example.com/img@{digest}");
        copy_artifact(&registry, &pinned, &format!("r2.example.com/img@{digest}"))
            .await
            .unwrap();
        let copied = registry
            .get_raw_manifest(&format!("r2.example.com/img@{digest}"))
            .await
            .unwrap();
        assert_eq!(copied.data, data);
        assert_eq!(copied.digest(), digest);
        assert!(registry.has_blob("r2.example.com/img:v1", &layer.digest));
    }

    #[tokio::test]
    async fn test_copy_index_with_children() {
        let registry = MemoryRegistry::new();
        let amd64 = seed(&registry, "r1.example.com/multi:amd64").await;
        let child = OciDescriptor::for_bytes(crate::oci::MANIFEST_MEDIA_TYPE, &amd64.to_bytes().unwrap());
        let index = RawManifest::new(
            INDEX_MEDIA_TYPE,
            serde_json::to_vec(&serde_json::json!({
                "schemaVersion": 2,
                "mediaType": INDEX_MEDIA_TYPE,
                "manifests": [child],
            }))
            .unwrap(),
        );
        registry
            .push_raw_manifest("r1.example.com/multi:v1", &index, &MemoryBlobCache::default())
            .await
            .unwrap();

        copy_artifact(&registry, "r1.example.com/multi:v1", "r2.example.com/multi:v1")
            .await
            .unwrap();
        let copied = registry.get_raw_manifest("r2.example.com/multi:v1").await.unwrap();
        assert_eq!(copied, index);
        let child_ref = format!("r2.example.com/multi@{}", child.digest);
        assert_eq!(registry.get_manifest(&child_ref).await.unwrap(), amd64);
        assert!(registry.has_blob("r2.example.com/multi:v1", &amd64.layers[0].digest));
    }

    #[tokio::test]
    async fn test_index_with_missing_child_is_rejected() {
        let registry = MemoryRegistry::new();
        let child = OciDescriptor::for_bytes(crate::oci::MANIFEST_MEDIA_TYPE, b"{}");
        let index = RawManifest::new(
            INDEX_MEDIA_TYPE,
            serde_json::to_vec(&serde_json::json!({"schemaVersion": 2, "manifests": [child]})).unwrap(),
        );
        let err = registry
            .push_raw_manifest("r1.example.com/multi:v1", &index, &MemoryBlobCache::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_pinned_push_must_match_digest() {
        let registry = MemoryRegistry::new();
        let manifest = seed(&registry, "r1.example.com/img:v1").await;
        let raw = manifest.to_raw().unwrap();
        let err = registry
            .push_raw_manifest("r1.example.com/img@sha256:0000", &raw, &MemoryBlobCache::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Invalid);
    }
}
