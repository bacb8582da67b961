//! Resolution of component descriptors from OCI registries
//!
//! `resolve` rewrites the lookup through the overwrite rules, consults the
//! local cache, then fetches the manifest from the registry and writes the
//! result back to the cache.

use async_trait::async_trait;
use std::sync::Arc;

use crate::blob::{access_type, AggregatedBlobResolver, BlobInfo, BlobResolver, BlobWriter};
use crate::cache::ComponentCache;
use crate::descriptor::{
    Access, ComponentDescriptor, LocalOciBlobAccess, OciRegistryRepository, Resource,
    TypedObject, UnstructuredTypedObject,
};
use crate::error::{Error, Result};
use crate::oci::client::fetch_bytes;
use crate::oci::{
    decode_descriptor_layer, oci_ref, ComponentDescriptorConfig, OciManifest, RegistryClient,
    COMPONENT_CONFIG_MEDIA_TYPE,
};
use crate::overwrites::{ComponentDescriptorReference, SubstitutionManager};

#[derive(Clone)]
pub struct Resolver {
    client: Arc<dyn RegistryClient>,
    cache: Option<Arc<dyn ComponentCache>>,
    overwrites: Option<Arc<SubstitutionManager>>,
}

impl Resolver {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            cache: None,
            overwrites: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ComponentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_overwrites(mut self, overwrites: Arc<SubstitutionManager>) -> Self {
        self.overwrites = Some(overwrites);
        self
    }

    pub fn client(&self) -> &Arc<dyn RegistryClient> {
        &self.client
    }

    pub async fn resolve(
        &self,
        repo_ctx: &UnstructuredTypedObject,
        name: &str,
        version: &str,
    ) -> Result<ComponentDescriptor> {
        let (cd, _) = self.resolve_inner(repo_ctx, name, version, false).await?;
        Ok(cd)
    }

    /// Resolve and bind a blob resolver for the component's local blobs
    pub async fn resolve_with_blob_resolver(
        &self,
        repo_ctx: &UnstructuredTypedObject,
        name: &str,
        version: &str,
    ) -> Result<(ComponentDescriptor, Box<dyn BlobResolver>)> {
        let (cd, resolver) = self.resolve_inner(repo_ctx, name, version, true).await?;
        let resolver = match resolver {
            Some(resolver) => resolver,
            // the descriptor came from the cache; the manifest is still needed
            None => {
                let repo = OciRegistryRepository::from_context(
                    cd.effective_repository_context().unwrap_or(repo_ctx),
                )?;
                let reference = oci_ref(&repo, cd.name(), cd.version())?;
                let manifest = self.client.get_manifest(&reference).await?;
                OciBlobResolver::new(self.client.clone(), reference, manifest)
            }
        };
        Ok((
            cd,
            Box::new(AggregatedBlobResolver::new(vec![Box::new(resolver)])),
        ))
    }

    async fn resolve_inner(
        &self,
        repo_ctx: &UnstructuredTypedObject,
        name: &str,
        version: &str,
        use_registry_manifest: bool,
    ) -> Result<(ComponentDescriptor, Option<OciBlobResolver>)> {
        let mut lookup =
            ComponentDescriptorReference::new(Some(repo_ctx.clone()), name, version);
        if let Some(overwrites) = &self.overwrites {
            if overwrites.substitute(&mut lookup) {
                tracing::debug!(
                    "Overwrite rewrote {}:{} to {}:{}",
                    name,
                    version,
                    lookup.component_name,
                    lookup.version
                );
            }
        }
        let ctx = lookup.repository_context.unwrap_or_else(|| repo_ctx.clone());
        let repo = OciRegistryRepository::from_context(&ctx).map_err(|e| {
            Error::invalid(
                format!("repository context of type '{}'", ctx.object_type()),
                e.to_string(),
            )
        })?;
        let (name, version) = (lookup.component_name.as_str(), lookup.version.as_str());

        if let Some(cache) = &self.cache {
            match cache.get(&repo, name, version).await {
                Ok(cd) => {
                    tracing::debug!("Resolved {}:{} from cache", name, version);
                    return Ok((cd, None));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!("Cache lookup of {}:{} failed: {}", name, version, e),
            }
        }

        let reference = oci_ref(&repo, name, version)?;
        let manifest = self.client.get_manifest(&reference).await?;
        let mut cd = self.fetch_descriptor(&reference, &manifest).await?;
        cd.inject_repository_context(ctx);
        tracing::debug!("Resolved {}:{} from {}", name, version, reference);

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&cd).await {
                tracing::warn!("Failed to cache {}:{}: {}", name, version, e);
            }
        }

        let resolver = use_registry_manifest
            .then(|| OciBlobResolver::new(self.client.clone(), reference, manifest));
        Ok((cd, resolver))
    }

    async fn fetch_descriptor(
        &self,
        reference: &str,
        manifest: &OciManifest,
    ) -> Result<ComponentDescriptor> {
        let invalid = |reason: String| Error::invalid(format!("component manifest {reference}"), reason);

        if manifest.config.media_type != COMPONENT_CONFIG_MEDIA_TYPE {
            return Err(invalid(format!(
                "config has media type '{}', expected '{COMPONENT_CONFIG_MEDIA_TYPE}'",
                manifest.config.media_type
            )));
        }
        let config_data = fetch_bytes(self.client.as_ref(), reference, &manifest.config).await?;
        let config: ComponentDescriptorConfig = serde_json::from_slice(&config_data)?;
        let layer_ref = config
            .component_descriptor_layer
            .ok_or_else(|| invalid("config names no component descriptor layer".to_string()))?;

        let layer = manifest
            .layer(&layer_ref.digest)
            .ok_or_else(|| invalid(format!("descriptor layer {} not in manifest", layer_ref.digest)))?;
        if layer.media_type != layer_ref.media_type {
            return Err(invalid(format!(
                "descriptor layer media type '{}' does not match config '{}'",
                layer.media_type, layer_ref.media_type
            )));
        }

        let data = fetch_bytes(self.client.as_ref(), reference, layer).await?;
        decode_descriptor_layer(&layer.media_type, &data)
    }
}

/// Serves `localOciBlob` resources from the layers of one manifest
pub struct OciBlobResolver {
    client: Arc<dyn RegistryClient>,
    reference: String,
    manifest: OciManifest,
}

impl OciBlobResolver {
    pub fn new(client: Arc<dyn RegistryClient>, reference: String, manifest: OciManifest) -> Self {
        Self {
            client,
            reference,
            manifest,
        }
    }

    fn layer_for(&self, resource: &Resource) -> Result<&crate::oci::OciDescriptor> {
        let digest = match resource.access_view()? {
            Some(Access::LocalOciBlob(LocalOciBlobAccess { digest })) => digest,
            _ => {
                return Err(Error::invalid(
                    format!("resource '{}'", resource.name),
                    "access is not a localOciBlob",
                ))
            }
        };
        self.manifest.layer(&digest).ok_or_else(|| {
            Error::not_found(format!(
                "layer {digest} of resource '{}' in {}",
                resource.name, self.reference
            ))
        })
    }
}

#[async_trait]
impl BlobResolver for OciBlobResolver {
    fn can_resolve(&self, resource: &Resource) -> bool {
        access_type(resource) == Some(LocalOciBlobAccess::TYPE)
    }

    async fn info(&self, resource: &Resource) -> Result<BlobInfo> {
        let layer = self.layer_for(resource)?;
        Ok(BlobInfo {
            media_type: layer.media_type.clone(),
            digest: layer.digest.clone(),
            size: layer.size,
        })
    }

    async fn resolve(&self, resource: &Resource, writer: BlobWriter<'_>) -> Result<BlobInfo> {
        let info = self.info(resource).await?;
        let layer = self.layer_for(resource)?;
        self.client.fetch(&self.reference, layer, writer).await?;
        Ok(info)
    }
}
