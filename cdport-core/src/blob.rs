//! Access to the content of resources

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::descriptor::Resource;
use crate::error::{Error, Result};

/// Media type used when a blob does not declare one
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Metadata of a resolved blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// Sink for streamed blob content
pub type BlobWriter<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Serves the content behind a resource's access method
#[async_trait]
pub trait BlobResolver: Send + Sync {
    /// Whether this resolver serves the resource's access type
    fn can_resolve(&self, resource: &Resource) -> bool;

    async fn info(&self, resource: &Resource) -> Result<BlobInfo>;

    /// Stream the blob into `writer`
    async fn resolve(&self, resource: &Resource, writer: BlobWriter<'_>) -> Result<BlobInfo>;
}

/// Dispatches to the first resolver that accepts the resource
#[derive(Default)]
pub struct AggregatedBlobResolver {
    resolvers: Vec<Box<dyn BlobResolver>>,
}

impl AggregatedBlobResolver {
    pub fn new(resolvers: Vec<Box<dyn BlobResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn add(&mut self, resolver: Box<dyn BlobResolver>) {
        self.resolvers.push(resolver);
    }

    fn find(&self, resource: &Resource) -> Result<&dyn BlobResolver> {
        self.resolvers
            .iter()
            .find(|r| r.can_resolve(resource))
            .map(|r| r.as_ref())
            .ok_or_else(|| {
                let access = resource
                    .access
                    .as_ref()
                    .map(|a| a.object_type().to_string())
                    .unwrap_or_else(|| "<none>".to_string());
                Error::not_found(format!(
                    "no blob resolver for resource '{}' with access type {access}",
                    resource.name
                ))
            })
    }
}

#[async_trait]
impl BlobResolver for AggregatedBlobResolver {
    fn can_resolve(&self, resource: &Resource) -> bool {
        self.resolvers.iter().any(|r| r.can_resolve(resource))
    }

    async fn info(&self, resource: &Resource) -> Result<BlobInfo> {
        self.find(resource)?.info(resource).await
    }

    async fn resolve(&self, resource: &Resource, writer: BlobWriter<'_>) -> Result<BlobInfo> {
        self.find(resource)?.resolve(resource, writer).await
    }
}

/// Access type name of a resource, if it has an access method
pub(crate) fn access_type(resource: &Resource) -> Option<&str> {
    resource.access.as_ref().map(|a| a.object_type())
}
