//! Shared helpers for the integration tests

#![allow(dead_code)]

use cdport_core::archive::{BlobInput, ComponentArchive};
use cdport_core::descriptor::{
    ComponentDescriptor, ComponentNameMapping, ComponentReference, OciRegistryRepository,
    Resource, ResourceRelation,
};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn repo(base_url: &str) -> OciRegistryRepository {
    OciRegistryRepository::new(base_url, ComponentNameMapping::UrlPath)
}

/// In-memory archive with one local `plain` blob named `blob`
pub fn archive_with_blob(name: &str, version: &str, content: &[u8]) -> ComponentArchive {
    let mut ca = ComponentArchive::new(ComponentDescriptor::new(name, version))
        .expect("archive");
    ca.add_resource(
        Resource::new("blob", version, "plain", ResourceRelation::Local),
        Some(BlobInput::from_bytes("text/plain", content.to_vec())),
    )
    .expect("add resource");
    ca
}

pub fn reference_to(component_name: &str, version: &str) -> ComponentReference {
    ComponentReference {
        name: component_name
            .rsplit('/')
            .next()
            .unwrap_or(component_name)
            .to_string(),
        component_name: component_name.to_string(),
        version: version.to_string(),
        extra_identity: Default::default(),
        labels: vec![],
        digest: None,
    }
}
