//! Component descriptor data model (schema `v2`)
//!
//! A component descriptor names a component version and lists its resources,
//! sources and references to other components. It also records the history
//! of repositories the component was stored in; the last entry of
//! `repositoryContexts` is the effective one.
//!
//! ```yaml
//! meta:
//!   schemaVersion: v2
//! component:
//!   name: example.com/my-comp
//!   version: v1.0.0
//!   provider: internal
//!   repositoryContexts:
//!     - type: ociRegistry
//!       baseUrl: registry.example.com
//!   resources:
//!     - name: image
//!       version: v1.0.0
//!       type: ociImage
//!       relation: external
//!       access:
//!         type: ociRegistry
//!         imageReference: registry.example.com/image:v1.0.0
//! ```
//!
//! Signed descriptors additionally carry a digest on every reference and
//! resource plus a top-level `signatures` list; see [`crate::signing`].

pub mod access;
pub mod codec;
pub mod repository;
pub mod typed;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use access::{
    Access, LocalFilesystemBlobAccess, LocalOciBlobAccess, OciRegistryAccess, RelativeOciAccess,
};
pub use codec::{Codec, DecodeOptions};
pub use repository::{oci_repository_context, ComponentNameMapping, OciRegistryRepository};
pub use typed::{TypeRegistry, TypeScheme, TypedObject, UnstructuredTypedObject};

/// Schema version written by this crate
pub const SCHEMA_VERSION: &str = "v2";

/// Extra identity attributes of a resource, source or reference
pub type Identity = BTreeMap<String, String>;

/// Identity attribute that is always derived from the element name
pub const IDENTITY_NAME_KEY: &str = "name";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub meta: Metadata,
    pub component: ComponentSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub schema_version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repository_contexts: Vec<UnstructuredTypedObject>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRelation {
    /// Built and versioned together with the component
    Local,
    #[default]
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub relation: ResourceRelation,
    #[serde(default, rename = "srcRef", skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<UnstructuredTypedObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

/// Link from a resource to the sources it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identity_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<UnstructuredTypedObject>,
}

/// Pointer to another component version; resolved lazily, never embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

/// Content digest of a resource or referenced component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSpec {
    pub hash_algorithm: String,
    pub normalisation_algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSpec {
    pub algorithm: String,
    pub value: String,
    pub media_type: String,
}

/// A signed descriptor digest, identified by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub digest: DigestSpec,
    pub signature: SignatureSpec,
}

/// Elements keyed by `(name, extraIdentity)` within one descriptor
pub trait IdentityElement {
    fn element_name(&self) -> &str;
    fn extra_identity(&self) -> &Identity;

    /// Full identity: the extra identity plus the element name
    fn identity(&self) -> Identity {
        let mut id = self.extra_identity().clone();
        id.insert(IDENTITY_NAME_KEY.to_string(), self.element_name().to_string());
        id
    }
}

macro_rules! identity_element {
    ($ty:ty) => {
        impl IdentityElement for $ty {
            fn element_name(&self) -> &str {
                &self.name
            }

            fn extra_identity(&self) -> &Identity {
                &self.extra_identity
            }
        }
    };
}

identity_element!(Resource);
identity_element!(Source);
identity_element!(ComponentReference);

/// Replace the element with the same identity, or append
pub(crate) fn upsert<T: IdentityElement>(list: &mut Vec<T>, element: T) {
    let id = element.identity();
    match list.iter_mut().find(|e| e.identity() == id) {
        Some(existing) => *existing = element,
        None => list.push(element),
    }
}

impl ComponentDescriptor {
    /// Minimal descriptor with no resources and no repository history
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            meta: Metadata::default(),
            component: ComponentSpec {
                name: name.into(),
                version: version.into(),
                repository_contexts: Vec::new(),
                provider: "internal".to_string(),
                sources: Vec::new(),
                component_references: Vec::new(),
                resources: Vec::new(),
                labels: Vec::new(),
            },
            signatures: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    /// The most recently appended repository context
    pub fn effective_repository_context(&self) -> Option<&UnstructuredTypedObject> {
        self.component.repository_contexts.last()
    }

    /// Make `ctx` the effective repository context
    ///
    /// History is append-only: the context is appended unless it already is
    /// the effective one.
    pub fn inject_repository_context(&mut self, ctx: UnstructuredTypedObject) {
        if self.effective_repository_context() != Some(&ctx) {
            self.component.repository_contexts.push(ctx);
        }
    }

    /// Fill in values that may be omitted on the wire
    pub fn apply_defaults(&mut self) {
        if self.meta.schema_version.is_empty() {
            self.meta.schema_version = SCHEMA_VERSION.to_string();
        }
        let version = self.component.version.clone();
        for res in &mut self.component.resources {
            if res.relation == ResourceRelation::Local && res.version.is_empty() {
                res.version = version.clone();
            }
        }
    }

    pub fn resource(&self, identity: &Identity) -> Option<&Resource> {
        self.component
            .resources
            .iter()
            .find(|r| &r.identity() == identity)
    }

    pub fn resources_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.component.resources.iter().filter(move |r| r.name == name)
    }

    pub fn set_resource(&mut self, resource: Resource) {
        upsert(&mut self.component.resources, resource);
    }

    pub fn set_source(&mut self, source: Source) {
        upsert(&mut self.component.sources, source);
    }

    pub fn set_component_reference(&mut self, reference: ComponentReference) {
        upsert(&mut self.component.component_references, reference);
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.name == name)
    }

    /// Replace the signature with the same name, or append
    pub fn set_signature(&mut self, signature: Signature) {
        match self.signatures.iter_mut().find(|s| s.name == signature.name) {
            Some(existing) => *existing = signature,
            None => self.signatures.push(signature),
        }
    }
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        resource_type: impl Into<String>,
        relation: ResourceRelation,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra_identity: Identity::new(),
            labels: Vec::new(),
            resource_type: resource_type.into(),
            relation,
            source_refs: Vec::new(),
            access: None,
            digest: None,
        }
    }

    pub fn with_access(mut self, access: UnstructuredTypedObject) -> Self {
        self.access = Some(access);
        self
    }

    /// Decoded view of the access method, if any
    pub fn access_view(&self) -> crate::Result<Option<Access>> {
        self.access.as_ref().map(Access::from_unstructured).transpose()
    }
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra_identity: Identity::new(),
            labels: Vec::new(),
            source_type: source_type.into(),
            access: None,
        }
    }
}
