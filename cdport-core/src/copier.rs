//! Recursive replication of components between registries
//!
//! A copy resolves the component in the source repository, copies its
//! references first, then pushes a manifest to the target repository that
//! carries the descriptor and every `localOciBlob` resource. OCI artifacts
//! referenced by resources are deep-copied only when copying by value.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::blob::{BlobResolver, BlobWriter};
use crate::descriptor::{
    oci_repository_context, Access, OciRegistryAccess, OciRegistryRepository, RelativeOciAccess,
    Resource, UnstructuredTypedObject,
};
use crate::digest::parse_digest;
use crate::error::{Error, Result};
use crate::oci::blobcache::write_cached;
use crate::oci::{
    copy_artifact, oci_ref, BlobCache, BlobStore, ManifestBuilder, OciDescriptor, Reference,
    RegistryClient,
};
use crate::resolver::Resolver;

pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Base URL of the repository components are read from
    pub source_repository: String,
    /// Base URL of the repository components are written to
    pub target_repository: String,
    /// Copy referenced components first
    pub recursive: bool,
    /// Push even if the target already has the component
    pub force: bool,
    /// Deep-copy OCI artifacts referenced by resources
    pub copy_by_value: bool,
    /// Encode the full source reference into the target artifact path
    pub keep_source_repository: bool,
    /// Where artifacts copied by value go; the target repository if unset
    pub target_artifact_repository: Option<String>,
    /// Base for `relativeOciReference` accesses; the source repository if unset
    pub source_artifact_repository: Option<String>,
    /// Rewrite copied artifact accesses as `relativeOciReference`
    pub convert_to_relative_oci_references: bool,
    /// Literal `(left, right)` replacements applied to synthesized artifact refs
    pub replace_oci_refs: Vec<(String, String)>,
    /// Extra tags the component manifest is pushed under
    pub additional_tags: Vec<String>,
    pub max_retries: u32,
    pub backoff_factor: Duration,
}

impl CopyOptions {
    pub fn new(source_repository: impl Into<String>, target_repository: impl Into<String>) -> Self {
        Self {
            source_repository: source_repository.into(),
            target_repository: target_repository.into(),
            recursive: true,
            force: false,
            copy_by_value: false,
            keep_source_repository: false,
            target_artifact_repository: None,
            source_artifact_repository: None,
            convert_to_relative_oci_references: false,
            replace_oci_refs: Vec::new(),
            additional_tags: Vec::new(),
            max_retries: 0,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }

    pub fn target_artifact_repository(&self) -> &str {
        self.target_artifact_repository
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.target_repository)
    }

    pub fn source_artifact_repository(&self) -> &str {
        self.source_artifact_repository
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.source_repository)
    }
}

/// Parse `left:right` replace expressions
pub fn parse_replace_expressions<S: AsRef<str>>(exprs: &[S]) -> Result<Vec<(String, String)>> {
    exprs
        .iter()
        .map(|expr| {
            let expr = expr.as_ref();
            match expr.split(':').collect::<Vec<_>>().as_slice() {
                [left, right] => Ok((left.to_string(), right.to_string())),
                _ => Err(Error::invalid(
                    format!("replace expression '{expr}'"),
                    "must have the format left:right",
                )),
            }
        })
        .collect()
}

/// `factor * 2^attempt`
pub fn exponential_backoff(factor: Duration, attempt: u32) -> Duration {
    factor.saturating_mul(2u32.saturating_pow(attempt))
}

/// Host (with any non-default port) and path of an artifact repository URL
fn artifact_root(target_repo: &str) -> Result<(String, String)> {
    let with_scheme = if target_repo.contains("://") {
        target_repo.to_string()
    } else {
        format!("http://{target_repo}")
    };
    let url = reqwest::Url::parse(&with_scheme)
        .map_err(|e| Error::invalid(format!("target repository '{target_repo}'"), e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid(format!("target repository '{target_repo}'"), "no host"))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((host, url.path().trim_matches('/').to_string()))
}

/// Target reference of an artifact copied by value
///
/// Without `keep_source_repository` the host is swapped and the repository
/// path is appended to the target path. With it, the source host and path
/// are kept as the repository, with `.` and `:` replaced by `_`.
pub fn target_oci_artifact_ref(
    target_repo: &str,
    reference: &str,
    keep_source_repository: bool,
) -> Result<String> {
    let (host, base) = artifact_root(target_repo)?;
    let mut parsed = Reference::parse(reference)?;
    let repository = if keep_source_repository {
        parsed.name().replace(['.', ':'], "_")
    } else {
        parsed.repository.clone()
    };
    parsed.repository = join_path(&base, &repository);
    parsed.host = host;
    Ok(parsed.to_string())
}

/// `target` relative to the artifact repository `target_repo`
///
/// `None` if the reference does not live below that repository, which
/// happens when a replace expression moved it elsewhere.
pub fn relative_artifact_ref(target_repo: &str, target: &str) -> Result<Option<String>> {
    let (host, base) = artifact_root(target_repo)?;
    let mut parsed = Reference::parse(target)?;
    if parsed.host != host {
        return Ok(None);
    }
    if !base.is_empty() {
        match parsed
            .repository
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) => parsed.repository = rest.to_string(),
            None => return Ok(None),
        }
    }
    let full = parsed.to_string();
    Ok(full
        .split_once('/')
        .map(|(_, relative)| relative.to_string()))
}

fn join_path(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}

#[derive(Default)]
struct CopyState {
    in_progress: Vec<(String, String)>,
    done: HashSet<(String, String)>,
}

/// Serves pushed layers from the source component or the blob cache
struct CopyBlobStore<'a> {
    resources: HashMap<String, Resource>,
    blobs: &'a dyn BlobResolver,
    cache: &'a dyn BlobCache,
}

#[async_trait]
impl BlobStore for CopyBlobStore<'_> {
    async fn write_blob(&self, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
        match self.resources.get(&desc.digest) {
            Some(res) => {
                tracing::debug!("Streaming blob {} of resource {}", desc.digest, res.name);
                self.blobs.resolve(res, writer).await?;
                Ok(())
            }
            None => write_cached(self.cache, desc, writer).await,
        }
    }
}

pub struct Copier {
    options: CopyOptions,
    resolver: Resolver,
    client: Arc<dyn RegistryClient>,
    cache: Arc<dyn BlobCache>,
    source_ctx: UnstructuredTypedObject,
    target_ctx: UnstructuredTypedObject,
    target_repo: OciRegistryRepository,
}

impl Copier {
    pub fn new(options: CopyOptions, resolver: Resolver, cache: Arc<dyn BlobCache>) -> Result<Self> {
        if options.source_repository.is_empty() || options.target_repository.is_empty() {
            return Err(Error::invalid(
                "copy options",
                "source and target repository are required",
            ));
        }
        let source_ctx = oci_repository_context(&options.source_repository)?;
        let target_ctx = oci_repository_context(&options.target_repository)?;
        let target_repo = OciRegistryRepository::from_context(&target_ctx)?;
        Ok(Self {
            client: resolver.client().clone(),
            options,
            resolver,
            cache,
            source_ctx,
            target_ctx,
            target_repo,
        })
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Copy one component version, and its references when recursive
    pub async fn copy(&self, name: &str, version: &str) -> Result<()> {
        let mut state = CopyState::default();
        self.copy_retrying(name, version, &mut state).await
    }

    fn copy_retrying<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        state: &'a mut CopyState,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let key = (name.to_string(), version.to_string());
            if state.done.contains(&key) {
                tracing::debug!("{}:{} already copied", name, version);
                return Ok(());
            }
            if state.in_progress.contains(&key) {
                let mut chain: Vec<String> = state
                    .in_progress
                    .iter()
                    .map(|(n, v)| format!("{n}:{v}"))
                    .collect();
                chain.push(format!("{name}:{version}"));
                return Err(Error::CyclicReference { chain });
            }

            state.in_progress.push(key.clone());
            let result = self.retry_loop(name, version, state).await;
            state.in_progress.pop();
            if result.is_ok() {
                state.done.insert(key);
            }
            result
        })
    }

    async fn retry_loop(&self, name: &str, version: &str, state: &mut CopyState) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.copy_once(name, version, state).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    let backoff = exponential_backoff(self.options.backoff_factor, attempt);
                    tracing::warn!(
                        "Copy of {}:{} failed ({}), retrying after {:?}",
                        name,
                        version,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn copy_once(&self, name: &str, version: &str, state: &mut CopyState) -> Result<()> {
        tracing::info!("Copying component {}:{}", name, version);
        let (mut cd, blobs) = self
            .resolver
            .resolve_with_blob_resolver(&self.source_ctx, name, version)
            .await?;

        if self.options.recursive {
            let references: Vec<(String, String)> = cd
                .component
                .component_references
                .iter()
                .map(|r| (r.component_name.clone(), r.version.clone()))
                .collect();
            for (ref_name, ref_version) in &references {
                self.copy_retrying(ref_name, ref_version, state).await?;
            }
        }

        if !self.options.force && !self.options.copy_by_value {
            match self.resolver.resolve(&self.target_ctx, name, version).await {
                Ok(_) => {
                    tracing::info!("{}:{} already exists in target, nothing to copy", name, version);
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::debug!("Target lookup of {}:{} failed: {}", name, version, e),
            }
        }

        cd.inject_repository_context(self.target_ctx.clone());

        let mut builder = ManifestBuilder::new(self.cache.as_ref());
        let mut blob_to_resource = HashMap::new();
        for res in &mut cd.component.resources {
            match res.access_view()? {
                Some(Access::LocalOciBlob(_)) => {
                    let info = blobs.info(res).await?;
                    parse_digest(&info.digest)?;
                    builder.add_resource_layer(&res.name, &info);
                    blob_to_resource.insert(info.digest.clone(), res.clone());
                }
                Some(Access::OciRegistry(access)) if self.options.copy_by_value => {
                    let target = self.copy_artifact_by_value(&res.name, &access.image_reference).await?;
                    res.access = Some(self.copied_access(&target)?);
                }
                Some(Access::RelativeOciReference(access)) if self.options.copy_by_value => {
                    let src = join_path(self.options.source_artifact_repository(), &access.reference);
                    let target = self.copy_artifact_by_value(&res.name, &src).await?;
                    res.access = Some(self.copied_access(&target)?);
                }
                _ => {}
            }
        }

        let manifest = builder.build(&cd).await?;
        let reference = oci_ref(&self.target_repo, cd.name(), cd.version())?;
        let store = CopyBlobStore {
            resources: blob_to_resource,
            blobs: blobs.as_ref(),
            cache: self.cache.as_ref(),
        };
        self.client.push_manifest(&reference, &manifest, &store).await?;

        for tag in &self.options.additional_tags {
            let tagged = Reference::parse(&reference)?.with_tag(tag.as_str()).to_string();
            self.client.push_manifest(&tagged, &manifest, &store).await?;
            tracing::debug!("Tagged {} as {}", reference, tagged);
        }

        tracing::info!("Copied {}:{} to {}", name, version, reference);
        Ok(())
    }

    async fn copy_artifact_by_value(&self, resource: &str, src: &str) -> Result<String> {
        let mut target = target_oci_artifact_ref(
            self.options.target_artifact_repository(),
            src,
            self.options.keep_source_repository,
        )?;
        for (left, right) in &self.options.replace_oci_refs {
            target = target.replace(left.as_str(), right);
        }
        tracing::info!("Copying artifact of {} from {} to {}", resource, src, target);
        copy_artifact(self.client.as_ref(), src, &target).await?;
        Ok(target)
    }

    fn copied_access(&self, target: &str) -> Result<UnstructuredTypedObject> {
        if self.options.convert_to_relative_oci_references {
            let root = self.options.target_artifact_repository();
            match relative_artifact_ref(root, target)? {
                Some(reference) => {
                    return UnstructuredTypedObject::new(&RelativeOciAccess { reference })
                }
                None => tracing::warn!(
                    "{} is not below artifact repository {}, keeping an absolute reference",
                    target,
                    root
                ),
            }
        }
        UnstructuredTypedObject::new(&OciRegistryAccess {
            image_reference: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{BlobInput, ComponentArchive};
    use crate::descriptor::{ComponentDescriptor, ComponentNameMapping, ComponentReference, ResourceRelation};
    use crate::oci::{push_archive, MemoryBlobCache, MemoryRegistry, OciManifest, RawManifest};
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const R1: &str = "r1.example.com";
    const R2: &str = "r2.example.com";

    /// Counts manifest lookups and optionally fails them
    struct ObservedClient {
        inner: MemoryRegistry,
        fail_with: Option<fn() -> Error>,
        manifest_gets: Mutex<Vec<String>>,
        attempts: AtomicUsize,
    }

    impl ObservedClient {
        fn new(inner: MemoryRegistry) -> Self {
            Self {
                inner,
                fail_with: None,
                manifest_gets: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
            }
        }

        fn gets_matching(&self, needle: &str) -> usize {
            self.manifest_gets
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl RegistryClient for ObservedClient {
        async fn get_raw_manifest(&self, reference: &str) -> Result<RawManifest> {
            self.inner.get_raw_manifest(reference).await
        }

        async fn get_manifest(&self, reference: &str) -> Result<OciManifest> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.manifest_gets.lock().unwrap().push(reference.to_string());
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            self.inner.get_manifest(reference).await
        }

        async fn fetch(&self, reference: &str, desc: &OciDescriptor, writer: BlobWriter<'_>) -> Result<()> {
            self.inner.fetch(reference, desc, writer).await
        }

        async fn push_raw_manifest(
            &self,
            reference: &str,
            manifest: &RawManifest,
            store: &dyn BlobStore,
        ) -> Result<()> {
            self.inner.push_raw_manifest(reference, manifest, store).await
        }
    }

    async fn push_component(
        client: &dyn RegistryClient,
        name: &str,
        refs: &[&str],
        resources: Vec<(Resource, Option<BlobInput>)>,
    ) {
        let mut ca = ComponentArchive::new(ComponentDescriptor::new(name, "v1")).unwrap();
        for r in refs {
            ca.add_component_reference(ComponentReference {
                name: r.rsplit('/').next().unwrap().to_string(),
                component_name: r.to_string(),
                version: "v1".into(),
                extra_identity: Default::default(),
                labels: vec![],
                digest: None,
            })
            .unwrap();
        }
        for (res, input) in resources {
            ca.add_resource(res, input).unwrap();
        }
        let repo = OciRegistryRepository::new(R1, ComponentNameMapping::UrlPath);
        push_archive(client, &ca, &repo, &MemoryBlobCache::default())
            .await
            .unwrap();
    }

    fn copier(client: Arc<dyn RegistryClient>, options: CopyOptions) -> Copier {
        Copier::new(
            options,
            Resolver::new(client),
            Arc::new(MemoryBlobCache::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_target_ref_synthesis() {
        assert_eq!(
            target_oci_artifact_ref("example.com/ns", "upstream.io/repo/img:v1", false).unwrap(),
            "example.com/ns/repo/img:v1"
        );
        let kept = target_oci_artifact_ref("example.com/ns", "upstream.io/repo/img:v1", true).unwrap();
        assert_eq!(kept, "example.com/ns/upstream_io/repo/img:v1");
        let repository = Reference::parse(&kept).unwrap().repository;
        assert!(!repository.contains('.') && !repository.contains(':'));

        assert_eq!(
            target_oci_artifact_ref("https://localhost:5000", "upstream.io:8443/img:v1", true).unwrap(),
            "localhost:5000/upstream_io_8443/img:v1"
        );
    }

    #[test]
    fn test_relative_artifact_ref() {
        let relative = |root: &str, target: &str| relative_artifact_ref(root, target).unwrap();
        assert_eq!(
            relative("https://r2.example.com/artifacts", "r2.example.com/artifacts/repo/img:v1"),
            Some("repo/img:v1".to_string())
        );
        assert_eq!(
            relative("http://r2.example.com:80/artifacts/", "r2.example.com/artifacts/img@sha256:ab"),
            Some("img@sha256:ab".to_string())
        );
        assert_eq!(
            relative("localhost:5000", "localhost:5000/repo/img:v1"),
            Some("repo/img:v1".to_string())
        );
        // moved by a replace expression
        assert_eq!(relative("r2.example.com/artifacts", "mirror.example.com/artifacts/img:v1"), None);
        assert_eq!(relative("r2.example.com/art", "r2.example.com/artifacts/img:v1"), None);

        let target = target_oci_artifact_ref("https://r2.example.com/artifacts", "upstream.io/repo/img:v1", false)
            .unwrap()
            .replace("artifacts/repo", "artifacts/mirrored");
        assert_eq!(
            relative("https://r2.example.com/artifacts", &target),
            Some("mirrored/img:v1".to_string())
        );
    }

    #[test]
    fn test_replace_expressions() {
        assert_eq!(
            parse_replace_expressions(&["eu.gcr.io:example.com"]).unwrap(),
            vec![("eu.gcr.io".to_string(), "example.com".to_string())]
        );
        assert!(parse_replace_expressions(&["a:b:c"]).is_err());
        assert!(parse_replace_expressions(&["ab"]).is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let f = Duration::from_secs(1);
        assert_eq!(
            (0..4).map(|a| exponential_backoff(f, a)).collect::<Vec<_>>(),
            vec![f, 2 * f, 4 * f, 8 * f]
        );
    }

    #[tokio::test]
    async fn test_idempotent_copy() {
        let registry = Arc::new(MemoryRegistry::new());
        let blob = Resource::new("blob", "v1", "plain", ResourceRelation::Local);
        push_component(
            registry.as_ref(),
            "example.com/c",
            &[],
            vec![(blob, Some(BlobInput::from_bytes("text/plain", b"x".to_vec())))],
        )
        .await;

        let copier = copier(registry.clone(), CopyOptions::new(R1, R2));
        let before = registry.writes();
        copier.copy("example.com/c", "v1").await.unwrap();
        let after_first = registry.writes();
        assert!(after_first > before);

        copier.copy("example.com/c", "v1").await.unwrap();
        assert_eq!(registry.writes(), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_timing() {
        let mut client = ObservedClient::new(MemoryRegistry::new());
        client.fail_with = Some(|| Error::transport("registry unavailable"));
        let client = Arc::new(client);

        let mut options = CopyOptions::new(R1, R2);
        options.max_retries = 3;
        let copier = copier(client.clone(), options);

        let start = tokio::time::Instant::now();
        let err = copier.copy("example.com/c", "v1").await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(client.attempts.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_is_not_retried() {
        let mut client = ObservedClient::new(MemoryRegistry::new());
        client.fail_with = Some(|| Error::invalid("manifest", "broken"));
        let client = Arc::new(client);

        let mut options = CopyOptions::new(R1, R2);
        options.max_retries = 3;
        let err = copier(client.clone(), options)
            .copy("example.com/c", "v1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(client.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cycle_detected() {
        let registry = Arc::new(MemoryRegistry::new());
        push_component(registry.as_ref(), "example.com/a", &["example.com/b"], vec![]).await;
        push_component(registry.as_ref(), "example.com/b", &["example.com/a"], vec![]).await;

        let err = copier(registry, CopyOptions::new(R1, R2))
            .copy("example.com/a", "v1")
            .await
            .unwrap_err();
        match err {
            Error::CyclicReference { chain } => assert_eq!(
                chain,
                vec!["example.com/a:v1", "example.com/b:v1", "example.com/a:v1"]
            ),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_diamond_copied_once() {
        let client = Arc::new(ObservedClient::new(MemoryRegistry::new()));
        push_component(client.as_ref(), "example.com/d", &[], vec![]).await;
        push_component(client.as_ref(), "example.com/b", &["example.com/d"], vec![]).await;
        push_component(client.as_ref(), "example.com/c", &["example.com/d"], vec![]).await;
        push_component(
            client.as_ref(),
            "example.com/a",
            &["example.com/b", "example.com/c"],
            vec![],
        )
        .await;

        copier(client.clone(), CopyOptions::new(R1, R2))
            .copy("example.com/a", "v1")
            .await
            .unwrap();
        assert_eq!(client.gets_matching(&format!("{R1}/component-descriptors/example.com/d:")), 1);
        assert!(client.inner.get_manifest(&format!("{R2}/component-descriptors/example.com/d:v1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_by_value_rewrites_accesses() {
        let registry = Arc::new(MemoryRegistry::new());
        let cache = MemoryBlobCache::default();
        let config = OciDescriptor::for_bytes("application/json", b"{}");
        cache.add_bytes(&config, b"{}".to_vec()).await.unwrap();
        let image = OciManifest::new(config, vec![]);
        registry
            .push_manifest("upstream.io/repo/img:v1", &image, &cache)
            .await
            .unwrap();
        registry
            .push_manifest(&format!("{R1}/artifacts/rel:v1"), &image, &cache)
            .await
            .unwrap();

        let absolute = Resource::new("img", "v1", "ociImage", ResourceRelation::External).with_access(
            UnstructuredTypedObject::new(&OciRegistryAccess {
                image_reference: "upstream.io/repo/img:v1".into(),
            })
            .unwrap(),
        );
        let relative = Resource::new("rel", "v1", "ociImage", ResourceRelation::External).with_access(
            UnstructuredTypedObject::new(&RelativeOciAccess {
                reference: "artifacts/rel:v1".into(),
            })
            .unwrap(),
        );
        push_component(
            registry.as_ref(),
            "example.com/c",
            &[],
            vec![(absolute, None), (relative, None)],
        )
        .await;

        let mut options = CopyOptions::new(R1, R2);
        options.copy_by_value = true;
        options.replace_oci_refs = vec![("/repo/".into(), "/mirror/".into())];
        copier(registry.clone(), options).copy("example.com/c", "v1").await.unwrap();

        let cd = Resolver::new(registry.clone())
            .resolve(&oci_repository_context(R2).unwrap(), "example.com/c", "v1")
            .await
            .unwrap();
        let accesses: Vec<_> = cd
            .component
            .resources
            .iter()
            .map(|r| r.access_view().unwrap().unwrap())
            .collect();
        assert_eq!(
            accesses,
            vec![
                Access::OciRegistry(OciRegistryAccess {
                    image_reference: format!("{R2}/mirror/img:v1"),
                }),
                Access::OciRegistry(OciRegistryAccess {
                    image_reference: format!("{R2}/artifacts/rel:v1"),
                }),
            ]
        );
        assert!(registry.get_manifest(&format!("{R2}/mirror/img:v1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_convert_to_relative() {
        let registry = Arc::new(MemoryRegistry::new());
        let cache = MemoryBlobCache::default();
        let config = OciDescriptor::for_bytes("application/json", b"{}");
        cache.add_bytes(&config, b"{}".to_vec()).await.unwrap();
        registry
            .push_manifest("upstream.io/repo/img:v1", &OciManifest::new(config, vec![]), &cache)
            .await
            .unwrap();
        let absolute = Resource::new("img", "v1", "ociImage", ResourceRelation::External).with_access(
            UnstructuredTypedObject::new(&OciRegistryAccess {
                image_reference: "upstream.io/repo/img:v1".into(),
            })
            .unwrap(),
        );
        push_component(registry.as_ref(), "example.com/c", &[], vec![(absolute, None)]).await;

        let mut options = CopyOptions::new(R1, R2);
        options.copy_by_value = true;
        options.target_artifact_repository = Some(format!("https://{R2}/artifacts"));
        options.convert_to_relative_oci_references = true;
        options.additional_tags = vec!["stable".into()];
        copier(registry.clone(), options).copy("example.com/c", "v1").await.unwrap();

        let cd = Resolver::new(registry.clone())
            .resolve(&oci_repository_context(R2).unwrap(), "example.com/c", "v1")
            .await
            .unwrap();
        assert_eq!(
            cd.component.resources[0].access_view().unwrap(),
            Some(Access::RelativeOciReference(RelativeOciAccess {
                reference: "repo/img:v1".into(),
            }))
        );
        assert!(registry
            .get_manifest(&format!("{R2}/component-descriptors/example.com/c:stable"))
            .await
            .is_ok());
    }
}
