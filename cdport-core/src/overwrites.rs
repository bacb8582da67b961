//! Rewriting of component lookups
//!
//! Overwrite rules redirect a `(repository context, name, version)` lookup
//! to another location or version before the resolver touches the cache or
//! a registry.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::descriptor::UnstructuredTypedObject;

/// The key a component is looked up by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptorReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_context: Option<UnstructuredTypedObject>,
    pub component_name: String,
    pub version: String,
}

impl ComponentDescriptorReference {
    pub fn new(
        repository_context: Option<UnstructuredTypedObject>,
        component_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repository_context,
            component_name: component_name.into(),
            version: version.into(),
        }
    }
}

/// Partial reference; unset or empty fields are wildcards when matching and
/// are left unchanged when substituting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverwriteReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_context: Option<UnstructuredTypedObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl OverwriteReference {
    fn name(&self) -> Option<&str> {
        self.component_name.as_deref().filter(|s| !s.is_empty())
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref().filter(|s| !s.is_empty())
    }

    fn matches(&self, reference: &ComponentDescriptorReference) -> bool {
        if let Some(name) = self.name() {
            if name != reference.component_name {
                return false;
            }
        }
        if let Some(version) = self.version() {
            if version != reference.version {
                return false;
            }
        }
        if let Some(ctx) = &self.repository_context {
            if reference.repository_context.as_ref() != Some(ctx) {
                return false;
            }
        }
        true
    }
}

/// One overwrite rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOverwrite {
    pub source: OverwriteReference,
    pub substitution: OverwriteReference,
}

/// Value of one field across all matching rules
enum Merged<'a, T: ?Sized> {
    Unset,
    One(&'a T),
    Ambiguous,
}

impl<'a, T: ?Sized> Merged<'a, T> {
    fn offer(&mut self, value: Option<&'a T>) {
        if let Some(value) = value {
            *self = match self {
                Merged::Unset => Merged::One(value),
                _ => Merged::Ambiguous,
            };
        }
    }

    fn get(&self) -> Option<&'a T> {
        match self {
            Merged::One(v) => Some(v),
            _ => None,
        }
    }
}

/// Thread-safe table of overwrite rules
#[derive(Debug, Default)]
pub struct SubstitutionManager {
    rules: RwLock<Vec<ComponentOverwrite>>,
}

impl SubstitutionManager {
    pub fn new(rules: Vec<ComponentOverwrite>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn add_rule(&self, rule: ComponentOverwrite) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    pub fn set_rules(&self, rules: Vec<ComponentOverwrite>) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite `reference` in place; returns whether any rule matched
    ///
    /// Substitutions of all matching rules are merged field by field. A field
    /// that two or more matching rules set is ambiguous and left unchanged.
    pub fn substitute(&self, reference: &mut ComponentDescriptorReference) -> bool {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        let mut matched = false;
        let mut ctx: Merged<UnstructuredTypedObject> = Merged::Unset;
        let mut name: Merged<str> = Merged::Unset;
        let mut version: Merged<str> = Merged::Unset;

        for rule in rules.iter().filter(|r| r.source.matches(reference)) {
            matched = true;
            ctx.offer(rule.substitution.repository_context.as_ref());
            name.offer(rule.substitution.name());
            version.offer(rule.substitution.version());
        }
        if !matched {
            return false;
        }

        for (field, merged) in [("componentName", &name), ("version", &version)] {
            if matches!(merged, Merged::Ambiguous) {
                tracing::debug!(
                    "Ambiguous overwrite of {field} for {}:{}, leaving it unchanged",
                    reference.component_name,
                    reference.version
                );
            }
        }

        if let Some(c) = ctx.get() {
            reference.repository_context = Some(c.clone());
        }
        if let Some(n) = name.get() {
            reference.component_name = n.to_string();
        }
        if let Some(v) = version.get() {
            reference.version = v.to_string();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::oci_repository_context;
    use pretty_assertions::assert_eq;

    fn by_name(name: &str) -> OverwriteReference {
        OverwriteReference {
            component_name: Some(name.into()),
            ..Default::default()
        }
    }

    fn by_version(version: &str) -> OverwriteReference {
        OverwriteReference {
            version: Some(version.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_rules_no_change() {
        let mgr = SubstitutionManager::default();
        let mut r = ComponentDescriptorReference::new(None, "a", "v1");
        assert!(!mgr.substitute(&mut r));
        assert_eq!(r, ComponentDescriptorReference::new(None, "a", "v1"));
    }

    #[test]
    fn test_replaces_only_supplied_fields() {
        let ctx = oci_repository_context("example.com/other").unwrap();
        let mgr = SubstitutionManager::new(vec![ComponentOverwrite {
            source: by_name("a"),
            substitution: OverwriteReference {
                repository_context: Some(ctx.clone()),
                ..Default::default()
            },
        }]);
        let mut r = ComponentDescriptorReference::new(None, "a", "v1");
        assert!(mgr.substitute(&mut r));
        assert_eq!(r, ComponentDescriptorReference::new(Some(ctx), "a", "v1"));
    }

    #[test]
    fn test_empty_matcher_is_wildcard_and_empty_substitution_still_matches() {
        let mgr = SubstitutionManager::new(vec![ComponentOverwrite {
            source: OverwriteReference::default(),
            substitution: OverwriteReference {
                version: Some(String::new()),
                ..Default::default()
            },
        }]);
        let mut r = ComponentDescriptorReference::new(None, "a", "v1");
        assert!(mgr.substitute(&mut r));
        assert_eq!(r.version, "v1");
    }

    #[test]
    fn test_non_matching_context() {
        let mgr = SubstitutionManager::new(vec![ComponentOverwrite {
            source: OverwriteReference {
                repository_context: Some(oci_repository_context("example.com/a").unwrap()),
                ..Default::default()
            },
            substitution: by_version("v2"),
        }]);
        let mut r = ComponentDescriptorReference::new(
            Some(oci_repository_context("example.com/b").unwrap()),
            "a",
            "v1",
        );
        assert!(!mgr.substitute(&mut r));
    }

    #[test]
    fn test_ambiguous_field_is_skipped() {
        let mgr = SubstitutionManager::new(vec![
            ComponentOverwrite {
                source: by_name("A"),
                substitution: by_version("v2"),
            },
            ComponentOverwrite {
                source: by_version("v1"),
                substitution: by_version("v3"),
            },
        ]);
        let mut r = ComponentDescriptorReference::new(None, "A", "v1");
        assert!(mgr.substitute(&mut r));
        assert_eq!(r.version, "v1");
    }

    #[test]
    fn test_fields_from_different_rules_merge() {
        let mgr = SubstitutionManager::new(vec![
            ComponentOverwrite {
                source: by_name("A"),
                substitution: by_version("v2"),
            },
            ComponentOverwrite {
                source: by_version("v1"),
                substitution: by_name("B"),
            },
        ]);
        mgr.add_rule(ComponentOverwrite {
            source: by_name("other"),
            substitution: by_name("C"),
        });
        assert_eq!(mgr.len(), 3);

        let mut r = ComponentDescriptorReference::new(None, "A", "v1");
        assert!(mgr.substitute(&mut r));
        assert_eq!(r, ComponentDescriptorReference::new(None, "B", "v2"));

        mgr.set_rules(Vec::new());
        assert!(mgr.is_empty());
    }
}
