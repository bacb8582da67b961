//! Encoding and decoding of component descriptors
//!
//! Descriptors are written as YAML. Decoding accepts YAML or JSON, applies
//! defaults and, unless disabled, validates the result.

use crate::error::Result;

use super::typed::TypeRegistry;
use super::validation::validate_with;
use super::ComponentDescriptor;

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Skip validation after decoding (for editing incomplete archives)
    pub disable_validation: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Codec {
    types: TypeRegistry,
    options: DecodeOptions,
}

impl Codec {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            types,
            options: DecodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn decode(&self, data: &[u8]) -> Result<ComponentDescriptor> {
        let mut cd: ComponentDescriptor = match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => serde_json::from_slice(data)?,
            _ => serde_yaml_ng::from_slice(data)?,
        };
        cd.apply_defaults();
        if !self.options.disable_validation {
            validate_with(&cd, &self.types)?;
        }
        Ok(cd)
    }

    pub fn encode(&self, cd: &ComponentDescriptor) -> Result<Vec<u8>> {
        Ok(serde_yaml_ng::to_string(cd)?.into_bytes())
    }

    pub fn encode_json(&self, cd: &ComponentDescriptor) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(cd)?)
    }
}

/// Decode with the built-in type registry and validation enabled
pub fn decode(data: &[u8]) -> Result<ComponentDescriptor> {
    Codec::default().decode(data)
}

/// Encode as YAML
pub fn encode(cd: &ComponentDescriptor) -> Result<Vec<u8>> {
    Codec::default().encode(cd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        oci_repository_context, ComponentReference, Label, LocalFilesystemBlobAccess,
        OciRegistryAccess, Resource, ResourceRelation, Source, UnstructuredTypedObject,
    };
    use pretty_assertions::assert_eq;

    fn sample() -> ComponentDescriptor {
        let mut cd = ComponentDescriptor::new("github.com/acme/backend", "v2.1.0");
        cd.inject_repository_context(oci_repository_context("eu.gcr.io/acme").unwrap());
        cd.component.labels.push(Label {
            name: "acme.io/team".into(),
            value: serde_json::json!({"owner": "platform", "tier": 1}),
        });
        cd.set_resource(
            Resource::new("image", "v2.1.0", "ociImage", ResourceRelation::External).with_access(
                UnstructuredTypedObject::new(&OciRegistryAccess {
                    image_reference: "eu.gcr.io/acme/backend:v2.1.0".into(),
                })
                .unwrap(),
            ),
        );
        cd.set_resource(
            Resource::new("chart", "v2.1.0", "helmChart", ResourceRelation::Local).with_access(
                UnstructuredTypedObject::new(&LocalFilesystemBlobAccess {
                    filename: "sha256.abcd".into(),
                    media_type: Some("application/gzip".into()),
                })
                .unwrap(),
            ),
        );
        let mut src = Source::new("repo", "v2.1.0", "git");
        src.access = Some(
            UnstructuredTypedObject::from_bytes(
                br#"{"type": "github", "repoUrl": "github.com/acme/backend", "commit": "abc"}"#,
            )
            .unwrap(),
        );
        cd.set_source(src);
        cd.set_component_reference(ComponentReference {
            name: "db".into(),
            component_name: "github.com/acme/db".into(),
            version: "v1.0.0".into(),
            extra_identity: Default::default(),
            labels: vec![],
            digest: None,
        });
        cd
    }

    #[test]
    fn test_yaml_round_trip() {
        let cd = sample();
        let data = encode(&cd).unwrap();
        assert_eq!(decode(&data).unwrap(), cd);
    }

    #[test]
    fn test_json_round_trip() {
        let cd = sample();
        let data = Codec::default().encode_json(&cd).unwrap();
        assert_eq!(decode(&data).unwrap(), cd);
    }

    #[test]
    fn test_decode_validates_by_default() {
        let yaml = b"meta:\n  schemaVersion: v2\ncomponent:\n  name: not a name\n  version: v1\n  provider: internal\n";
        assert!(decode(yaml).is_err());

        let codec = Codec::default().with_options(DecodeOptions {
            disable_validation: true,
        });
        let cd = codec.decode(yaml).unwrap();
        assert_eq!(cd.name(), "not a name");
        assert!(cd.component.resources.is_empty());
    }

    #[test]
    fn test_decode_applies_defaults() {
        let yaml = br#"
meta:
  schemaVersion: v2
component:
  name: example.com/comp
  version: v0.1.0
  provider: internal
  repositoryContexts: []
  resources:
    - name: blob
      type: plain
      relation: local
      access:
        type: localOciBlob
        digest: sha256:0011
"#;
        let cd = decode(yaml).unwrap();
        assert_eq!(cd.component.resources[0].version, "v0.1.0");
    }
}
