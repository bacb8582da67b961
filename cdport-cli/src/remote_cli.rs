//! Registry commands: get, copy and push

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::time::Duration;

use cdport_core::archive::ComponentArchive;
use cdport_core::copier::{parse_replace_expressions, Copier};
use cdport_core::descriptor::{oci_repository_context, Codec, OciRegistryRepository};
use cdport_core::oci::push_archive;

use crate::{parse_duration, Session};

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Repository base URL, e.g. eu.gcr.io/my-project/components
    pub base_url: String,

    /// Component name
    pub name: String,

    /// Component version
    pub version: String,

    /// Print JSON instead of YAML
    #[clap(long)]
    pub json: bool,

    /// Bypass the local descriptor cache
    #[clap(long)]
    pub no_cache: bool,
}

impl GetArgs {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = oci_repository_context(&self.base_url)?;
        let resolver = session.resolver(session.registry_client()?, !self.no_cache)?;
        let cd = resolver
            .resolve(&ctx, &self.name, &self.version)
            .await
            .with_context(|| {
                format!("Failed to resolve {}:{} from {}", self.name, self.version, self.base_url)
            })?;

        let codec = Codec::default();
        let data = if self.json {
            codec.encode_json(&cd)?
        } else {
            codec.encode(&cd)?
        };
        println!("{}", String::from_utf8_lossy(&data));
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CopyArgs {
    /// Component name
    pub name: String,

    /// Component version
    pub version: String,

    /// Source repository base URL
    #[clap(long)]
    pub from: String,

    /// Target repository base URL
    #[clap(long)]
    pub to: String,

    /// Copy referenced components too
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    pub recursive: bool,

    /// Overwrite component descriptors that already exist in the target
    #[clap(long)]
    pub force: bool,

    /// Copy referenced OCI artifacts instead of keeping the references
    #[clap(long)]
    pub copy_by_value: bool,

    /// Keep the source repository path in the target artifact reference
    #[clap(long)]
    pub keep_source_repository: bool,

    /// Repository for artifacts copied by value (default: --to)
    #[clap(long)]
    pub target_artifact_repository: Option<String>,

    /// Base of relative OCI references (default: --from)
    #[clap(long)]
    pub source_artifact_repository: Option<String>,

    /// Rewrite copied artifacts as relative references
    #[clap(long = "relative-urls")]
    pub relative_urls: bool,

    /// Replace expressions `left:right` applied to copied artifact references
    #[clap(long = "replace-oci-ref", value_delimiter = ',')]
    pub replace_oci_refs: Vec<String>,

    /// Additional tags for the copied component manifest
    #[clap(long = "additional-tag", value_delimiter = ',')]
    pub additional_tags: Vec<String>,

    /// Retries per component (default: from config, else 0)
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Backoff between retries is backoff-factor * 2^attempt (e.g. 1s, 500ms)
    #[clap(long, value_parser = parse_duration)]
    pub backoff_factor: Option<Duration>,

    /// Bypass the local descriptor cache
    #[clap(long)]
    pub no_cache: bool,
}

impl CopyArgs {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let mut options = session.config().copy_options(&self.from, &self.to)?;
        options.recursive = self.recursive;
        options.force = self.force;
        options.copy_by_value = self.copy_by_value;
        options.keep_source_repository = self.keep_source_repository;
        options.target_artifact_repository = self.target_artifact_repository;
        options.source_artifact_repository = self.source_artifact_repository;
        options.convert_to_relative_oci_references = self.relative_urls;
        options.replace_oci_refs = parse_replace_expressions(&self.replace_oci_refs)?;
        options.additional_tags = self.additional_tags;
        if let Some(max_retries) = self.max_retries {
            options.max_retries = max_retries;
        }
        if let Some(backoff_factor) = self.backoff_factor {
            options.backoff_factor = backoff_factor;
        }

        let resolver = session.resolver(session.registry_client()?, !self.no_cache)?;
        let copier = Copier::new(options, resolver, session.blob_cache()?)?;
        copier
            .copy(&self.name, &self.version)
            .await
            .with_context(|| {
                format!(
                    "Failed to copy {}:{} from {} to {}",
                    self.name, self.version, self.from, self.to
                )
            })?;
        println!("Copied {}:{} to {}", self.name, self.version, self.to);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Component archive (directory, tar or tgz)
    pub archive: PathBuf,

    /// Repository base URL (default: the archive's repository context)
    #[clap(long)]
    pub repo_ctx: Option<String>,
}

impl PushArgs {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let archive = ComponentArchive::parse(&self.archive)
            .with_context(|| format!("Failed to read archive {}", self.archive.display()))?;

        let repo = match &self.repo_ctx {
            Some(base_url) => OciRegistryRepository::from_context(&oci_repository_context(base_url)?)?,
            None => {
                let ctx = archive
                    .descriptor()
                    .effective_repository_context()
                    .context("Archive has no repository context, pass --repo-ctx")?;
                OciRegistryRepository::from_context(ctx)?
            }
        };

        let client = session.registry_client()?;
        let cache = session.blob_cache()?;
        let reference = push_archive(client.as_ref(), &archive, &repo, cache.as_ref())
            .await
            .with_context(|| format!("Failed to push {}", self.archive.display()))?;
        println!("{reference}");
        Ok(())
    }
}
