//! Repository contexts: where a component is, or was, stored

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::typed::{TypedObject, UnstructuredTypedObject};

/// How a component name maps onto a registry repository path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentNameMapping {
    /// `<baseUrl>/component-descriptors/<name>:<version>`
    #[default]
    #[serde(rename = "urlPath")]
    UrlPath,
    /// `<baseUrl>/<hex(sha256(name))>:<version>`
    #[serde(rename = "sha256-digest")]
    Sha256Digest,
}

impl std::str::FromStr for ComponentNameMapping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "urlPath" => Ok(Self::UrlPath),
            "sha256-digest" => Ok(Self::Sha256Digest),
            other => Err(format!("unknown component name mapping '{other}'")),
        }
    }
}

/// Repository context of type `ociRegistry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciRegistryRepository {
    pub base_url: String,
    #[serde(default)]
    pub component_name_mapping: ComponentNameMapping,
}

impl TypedObject for OciRegistryRepository {
    const TYPE: &'static str = "ociRegistry";
}

impl OciRegistryRepository {
    pub fn new(base_url: impl Into<String>, mapping: ComponentNameMapping) -> Self {
        Self {
            base_url: base_url.into(),
            component_name_mapping: mapping,
        }
    }

    /// Decode a repository context envelope
    pub fn from_context(ctx: &UnstructuredTypedObject) -> Result<Self> {
        ctx.decode_into()
    }

    /// Wrap into a repository context envelope
    pub fn to_context(&self) -> Result<UnstructuredTypedObject> {
        UnstructuredTypedObject::new(self)
    }
}

/// Convenience constructor for an `ociRegistry` context with url path mapping
pub fn oci_repository_context(base_url: &str) -> Result<UnstructuredTypedObject> {
    OciRegistryRepository::new(base_url, ComponentNameMapping::UrlPath).to_context()
}
