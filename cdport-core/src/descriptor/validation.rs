//! Structural validation of component descriptors

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::{Error, Result};

use super::typed::TypeRegistry;
use super::{
    ComponentDescriptor, Identity, IdentityElement, ResourceRelation, IDENTITY_NAME_KEY,
    SCHEMA_VERSION,
};

/// Component names are domain-prefixed paths, e.g. `github.com/org/component`
static COMPONENT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9.\-]+[.][a-z][a-z]+/[-a-z0-9/_.]*$").expect("component name pattern")
});

/// Validate a descriptor against the built-in type registry
pub fn validate(cd: &ComponentDescriptor) -> Result<()> {
    validate_with(cd, &TypeRegistry::default())
}

/// Validate a descriptor, checking typed objects against `types`
///
/// All violations are collected and reported in one [`Error::Invalid`].
pub fn validate_with(cd: &ComponentDescriptor, types: &TypeRegistry) -> Result<()> {
    let mut problems = Vec::new();
    let component = &cd.component;

    if cd.meta.schema_version != SCHEMA_VERSION {
        problems.push(format!(
            "meta.schemaVersion: unsupported version '{}'",
            cd.meta.schema_version
        ));
    }

    if component.name.is_empty() {
        problems.push("component.name: required".to_string());
    } else if !COMPONENT_NAME.is_match(&component.name) {
        problems.push(format!(
            "component.name: '{}' does not match {}",
            component.name,
            COMPONENT_NAME.as_str()
        ));
    } else if component.name.split('/').any(|s| s == "." || s == "..") {
        problems.push(format!(
            "component.name: '{}' contains a relative path segment",
            component.name
        ));
    }
    if component.version.is_empty() {
        problems.push("component.version: required".to_string());
    }
    if component.provider.is_empty() {
        problems.push("component.provider: required".to_string());
    }

    for (i, ctx) in component.repository_contexts.iter().enumerate() {
        if let Err(e) = types.repositories.validate(ctx) {
            problems.push(format!("component.repositoryContexts[{i}]: {e}"));
        }
    }

    check_identities("component.resources", &component.resources, &mut problems);
    check_identities("component.sources", &component.sources, &mut problems);
    check_identities(
        "component.componentReferences",
        &component.component_references,
        &mut problems,
    );

    for (i, res) in component.resources.iter().enumerate() {
        let path = format!("component.resources[{i}]");
        if res.resource_type.is_empty() {
            problems.push(format!("{path}.type: required"));
        }
        if res.version.is_empty() {
            problems.push(format!("{path}.version: required"));
        }
        if res.relation == ResourceRelation::Local && res.version != component.version {
            problems.push(format!(
                "{path}.version: local resource must carry the component version '{}' (found '{}')",
                component.version, res.version
            ));
        }
        match &res.access {
            Some(access) => {
                if let Err(e) = types.access.validate(access) {
                    problems.push(format!("{path}.access: {e}"));
                }
            }
            None => problems.push(format!("{path}.access: required")),
        }
    }

    for (i, src) in component.sources.iter().enumerate() {
        let path = format!("component.sources[{i}]");
        if src.source_type.is_empty() {
            problems.push(format!("{path}.type: required"));
        }
        match &src.access {
            Some(access) => {
                if let Err(e) = types.access.validate(access) {
                    problems.push(format!("{path}.access: {e}"));
                }
            }
            None => problems.push(format!("{path}.access: required")),
        }
    }

    for (i, reference) in component.component_references.iter().enumerate() {
        let path = format!("component.componentReferences[{i}]");
        if reference.component_name.is_empty() {
            problems.push(format!("{path}.componentName: required"));
        }
        if reference.version.is_empty() {
            problems.push(format!("{path}.version: required"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid(
            format!("component descriptor {}:{}", component.name, component.version),
            problems.join("; "),
        ))
    }
}

fn check_identities<T: IdentityElement>(path: &str, elements: &[T], problems: &mut Vec<String>) {
    let mut seen: HashSet<Identity> = HashSet::new();
    for (i, element) in elements.iter().enumerate() {
        if element.element_name().is_empty() {
            problems.push(format!("{path}[{i}].name: required"));
        }
        if element.extra_identity().contains_key(IDENTITY_NAME_KEY) {
            problems.push(format!(
                "{path}[{i}].extraIdentity: key '{IDENTITY_NAME_KEY}' is reserved"
            ));
        }
        if !seen.insert(element.identity()) {
            problems.push(format!(
                "{path}[{i}]: duplicate identity {:?}",
                element.identity()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        oci_repository_context, ComponentReference, LocalOciBlobAccess, Resource,
        UnstructuredTypedObject,
    };

    fn valid() -> ComponentDescriptor {
        let mut cd = ComponentDescriptor::new("example.com/my-comp", "v1.0.0");
        cd.inject_repository_context(oci_repository_context("example.com").unwrap());
        cd.set_resource(
            Resource::new("blob", "v1.0.0", "plain", ResourceRelation::Local).with_access(
                UnstructuredTypedObject::new(&LocalOciBlobAccess {
                    digest: "sha256:00".into(),
                })
                .unwrap(),
            ),
        );
        cd
    }

    #[test]
    fn test_valid_descriptor() {
        validate(&valid()).unwrap();
    }

    #[test]
    fn test_name_charset() {
        let mut cd = valid();
        cd.component.name = "My Component".into();
        let err = validate(&cd).unwrap_err();
        assert!(err.to_string().contains("component.name"));
    }

    #[test]
    fn test_relative_name_segments() {
        for name in ["a.io/../../../tmp/x", "example.com/./comp", "example.com/comp/.."] {
            let mut cd = valid();
            cd.component.name = name.into();
            let err = validate(&cd).unwrap_err();
            assert!(err.to_string().contains("relative path segment"), "{name}: {err}");
        }
        let mut cd = valid();
        cd.component.name = "example.com/comp..v2/x.y".into();
        validate(&cd).unwrap();
    }

    #[test]
    fn test_empty_version() {
        let mut cd = valid();
        cd.component.version.clear();
        cd.component.resources.clear();
        assert!(validate(&cd).unwrap_err().to_string().contains("component.version"));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut cd = valid();
        let dup = cd.component.resources[0].clone();
        cd.component.resources.push(dup);
        assert!(validate(&cd)
            .unwrap_err()
            .to_string()
            .contains("duplicate identity"));
    }

    #[test]
    fn test_duplicate_name_with_different_extra_identity_allowed() {
        let mut cd = valid();
        let mut other = cd.component.resources[0].clone();
        other.extra_identity.insert("arch".into(), "arm64".into());
        cd.component.resources.push(other);
        validate(&cd).unwrap();
    }

    #[test]
    fn test_extra_identity_name_key_reserved() {
        let mut cd = valid();
        cd.component.component_references.push(ComponentReference {
            name: "dep".into(),
            component_name: "example.com/dep".into(),
            version: "v1".into(),
            extra_identity: [("name".to_string(), "x".to_string())].into_iter().collect(),
            labels: vec![],
            digest: None,
        });
        assert!(validate(&cd).unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn test_local_resource_must_carry_component_version() {
        let mut cd = valid();
        cd.component.resources[0].version = "v0.9.0".into();
        assert!(validate(&cd)
            .unwrap_err()
            .to_string()
            .contains("local resource must carry"));
    }

    #[test]
    fn test_bad_known_access_payload() {
        let mut cd = valid();
        cd.component.resources[0].access =
            Some(UnstructuredTypedObject::from_bytes(b"type: localOciBlob\n").unwrap());
        assert!(validate(&cd).is_err());
        validate_with(&cd, &TypeRegistry::empty()).unwrap();
    }
}
