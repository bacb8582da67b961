//! Mapping of component descriptors onto OCI registries
//!
//! A component version is stored as one OCI manifest. Its config blob names
//! the layer holding the descriptor; further layers carry `localOciBlob`
//! resources and are annotated with the owning resource's name.

pub mod blobcache;
pub mod builder;
pub mod client;
pub mod http;
pub mod memory;
pub mod reference;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

use crate::descriptor::{codec, ComponentDescriptor, ComponentNameMapping, OciRegistryRepository};
use crate::digest::{sha256_digest, sha256_hex};
use crate::error::{Error, Result};

pub use blobcache::{BlobCache, FilesystemBlobCache, MemoryBlobCache};
pub use builder::{push_archive, ManifestBuilder};
pub use client::{copy_artifact, BlobStore, RegistryClient, MAX_BUFFERED_BLOB_SIZE};
pub use http::{HostConfig, HttpRegistryClient, RegistryAuth};
pub use memory::MemoryRegistry;
pub use reference::Reference;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const COMPONENT_CONFIG_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component.config.v1+json";
pub const COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+yaml+tar";
pub const COMPONENT_DESCRIPTOR_JSON_MEDIA_TYPE: &str =
    "application/vnd.gardener.cloud.cnudie.component-descriptor.v2+json";

/// File name of the descriptor inside archives and descriptor layers
pub const COMPONENT_DESCRIPTOR_FILE: &str = "component-descriptor.yaml";

/// Repository prefix for the `urlPath` name mapping
pub const COMPONENT_DESCRIPTOR_NAMESPACE: &str = "component-descriptors";

/// Layer annotation naming the resource a layer belongs to
pub const RESOURCE_ANNOTATION: &str = "resource";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OciDescriptor {
    /// Descriptor of an in-memory blob
    pub fn for_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(data),
            size: data.len() as u64,
            annotations: None,
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.as_ref()?.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: OciDescriptor,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OciManifest {
    pub fn new(config: OciDescriptor, layers: Vec<OciDescriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations: None,
        }
    }

    pub fn layer(&self, digest: &str) -> Option<&OciDescriptor> {
        self.layers.iter().find(|l| l.digest == digest)
    }

    /// Config, then layers
    pub fn blobs(&self) -> impl Iterator<Item = &OciDescriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Serialized form as pushed to a registry
    pub fn to_raw(&self) -> Result<RawManifest> {
        let media_type = self
            .media_type
            .clone()
            .unwrap_or_else(|| MANIFEST_MEDIA_TYPE.to_string());
        Ok(RawManifest::new(media_type, self.to_bytes()?))
    }
}

/// A manifest or image index exactly as the registry stores it
///
/// The bytes are never re-serialized, so the digest survives a copy and
/// fields this crate does not model are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Descriptors a manifest or index points at; everything else is ignored
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestLinks {
    media_type: Option<String>,
    config: Option<OciDescriptor>,
    #[serde(default)]
    layers: Vec<OciDescriptor>,
    #[serde(default)]
    manifests: Vec<OciDescriptor>,
}

impl RawManifest {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Wrap registry bytes, taking the media type from the content when the
    /// registry did not send one
    pub fn from_registry(content_type: Option<&str>, data: Vec<u8>) -> Result<Self> {
        let links = serde_json::from_slice::<ManifestLinks>(&data)?;
        let media_type = content_type
            .filter(|t| !t.is_empty() && *t != "application/json")
            .map(str::to_string)
            .or(links.media_type)
            .unwrap_or_else(|| {
                if links.manifests.is_empty() {
                    MANIFEST_MEDIA_TYPE.to_string()
                } else {
                    INDEX_MEDIA_TYPE.to_string()
                }
            });
        Ok(Self::new(media_type, data))
    }

    pub fn digest(&self) -> String {
        sha256_digest(&self.data)
    }

    pub fn is_index(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE
        )
    }

    fn links(&self) -> Result<ManifestLinks> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Config and layers of an image manifest; empty for an index
    pub fn blobs(&self) -> Result<Vec<OciDescriptor>> {
        let links = self.links()?;
        Ok(links.config.into_iter().chain(links.layers).collect())
    }

    /// Child manifests of an index; empty for an image manifest
    pub fn children(&self) -> Result<Vec<OciDescriptor>> {
        Ok(self.links()?.manifests)
    }

    /// Typed view of an image manifest
    pub fn parse(&self) -> Result<OciManifest> {
        if self.is_index() {
            return Err(Error::invalid(
                format!("manifest {}", self.digest()),
                format!("'{}' is an index, not an image manifest", self.media_type),
            ));
        }
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Fail unless the content hashes to `expected`
    pub fn verify_digest(&self, expected: &str) -> Result<()> {
        let actual = self.digest();
        if actual != expected {
            return Err(Error::invalid(
                format!("manifest {expected}"),
                format!("content digest is {actual}"),
            ));
        }
        Ok(())
    }
}

/// Content of the component config blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_descriptor_layer: Option<OciDescriptor>,
}

/// Registry reference of a component version in `repo`
pub fn oci_ref(repo: &OciRegistryRepository, name: &str, version: &str) -> Result<String> {
    if name.is_empty() || version.is_empty() {
        return Err(Error::invalid(
            "component reference",
            "name and version are required",
        ));
    }
    let base = repo.base_url.trim_end_matches('/');
    let base = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .unwrap_or(base);
    Ok(match repo.component_name_mapping {
        ComponentNameMapping::UrlPath => {
            format!("{base}/{COMPONENT_DESCRIPTOR_NAMESPACE}/{name}:{version}")
        }
        ComponentNameMapping::Sha256Digest => format!("{base}/{}:{version}", sha256_hex(name)),
    })
}

/// Tar the descriptor into a single-file layer
pub fn encode_descriptor_layer(cd: &ComponentDescriptor) -> Result<Vec<u8>> {
    let data = codec::encode(cd)?;
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, COMPONENT_DESCRIPTOR_FILE, data.as_slice())?;
    Ok(builder.into_inner()?)
}

/// Decode a descriptor layer of either supported media type
pub fn decode_descriptor_layer(media_type: &str, data: &[u8]) -> Result<ComponentDescriptor> {
    match media_type {
        COMPONENT_DESCRIPTOR_JSON_MEDIA_TYPE => codec::decode(data),
        COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE => {
            let content = read_descriptor_from_tar(data)?;
            codec::decode(&content)
        }
        other => Err(Error::invalid(
            "component descriptor layer",
            format!("unsupported media type '{other}'"),
        )),
    }
}

fn read_descriptor_from_tar(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(data);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_descriptor =
            entry.path()?.to_string_lossy().trim_start_matches("./") == COMPONENT_DESCRIPTOR_FILE;
        if is_descriptor {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Err(Error::invalid(
        "component descriptor layer",
        format!("no {COMPONENT_DESCRIPTOR_FILE} in layer"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::oci_repository_context;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_oci_ref_mappings() {
        let repo = OciRegistryRepository::new("example.com/ns/", ComponentNameMapping::UrlPath);
        assert_eq!(
            oci_ref(&repo, "example.com/comp", "v1.0.0").unwrap(),
            "example.com/ns/component-descriptors/example.com/comp:v1.0.0"
        );

        let repo = OciRegistryRepository::new("example.com", ComponentNameMapping::Sha256Digest);
        let r = oci_ref(&repo, "example.com/comp", "v1.0.0").unwrap();
        assert_eq!(r, format!("example.com/{}:v1.0.0", sha256_hex("example.com/comp")));
        assert!(oci_ref(&repo, "", "v1").is_err());
    }

    #[test]
    fn test_descriptor_layer() {
        let mut cd = ComponentDescriptor::new("example.com/comp", "v1.0.0");
        cd.inject_repository_context(oci_repository_context("example.com").unwrap());
        let layer = encode_descriptor_layer(&cd).unwrap();
        assert_eq!(
            decode_descriptor_layer(COMPONENT_DESCRIPTOR_TAR_MEDIA_TYPE, &layer).unwrap(),
            cd
        );

        let json = codec::Codec::default().encode_json(&cd).unwrap();
        assert_eq!(
            decode_descriptor_layer(COMPONENT_DESCRIPTOR_JSON_MEDIA_TYPE, &json).unwrap(),
            cd
        );
        assert!(decode_descriptor_layer("application/zip", &layer).is_err());
    }

    #[test]
    fn test_raw_manifest_keeps_unknown_fields() {
        let data = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","artifactType":"application/vnd.example+type","config":{"mediaType":"application/json","digest":"sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a","size":2},"layers":[{"mediaType":"text/plain","digest":"sha256:da4eb1d7b5e7b4bc4c3b5e1d7f3c1b1a0a1b2c3d4e5f60718293a4b5c6d7e8f9","size":5,"urls":["https://mirror.example.com/layer"]}]}"#.to_vec();
        let raw = RawManifest::from_registry(None, data.clone()).unwrap();
        assert_eq!(raw.media_type, MANIFEST_MEDIA_TYPE);
        assert_eq!(raw.digest(), sha256_digest(&data));
        assert_eq!(raw.blobs().unwrap().len(), 2);
        assert!(raw.children().unwrap().is_empty());
        assert_eq!(raw.data, data);
    }

    #[test]
    fn test_raw_index() {
        let child = OciDescriptor::for_bytes(MANIFEST_MEDIA_TYPE, b"{}");
        let data = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "manifests": [child],
        }))
        .unwrap();
        let raw = RawManifest::from_registry(Some("application/json"), data).unwrap();
        assert_eq!(raw.media_type, INDEX_MEDIA_TYPE);
        assert!(raw.is_index());
        assert_eq!(raw.children().unwrap(), vec![child]);
        assert!(raw.blobs().unwrap().is_empty());
        assert_eq!(raw.parse().unwrap_err().kind(), crate::ErrorKind::Invalid);
        assert!(raw.verify_digest("sha256:00").is_err());
        assert!(raw.verify_digest(&raw.digest()).is_ok());
    }

    #[test]
    fn test_manifest_wire_shape() {
        let config = OciDescriptor::for_bytes(COMPONENT_CONFIG_MEDIA_TYPE, b"{}");
        let manifest = OciManifest::new(config, vec![]);
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], MANIFEST_MEDIA_TYPE);
        assert_eq!(value["config"]["mediaType"], COMPONENT_CONFIG_MEDIA_TYPE);
    }
}
