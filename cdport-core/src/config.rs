//! Transport configuration file
//!
//! Loaded from `config.yaml` in the platform config directory unless an
//! explicit path is given. A missing file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FilesystemCache;
use crate::copier::{CopyOptions, DEFAULT_BACKOFF_FACTOR};
use crate::oci::{FilesystemBlobCache, HostConfig, HttpRegistryClient, RegistryAuth};
use crate::overwrites::{ComponentOverwrite, SubstitutionManager};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Descriptor cache; `<user cache dir>/cdport/components` if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Blob cache for generated layers; `<user cache dir>/cdport/blobs` if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overwrites: Vec<ComponentOverwrite>,
    #[serde(default)]
    pub copy: CopyConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_factor_seconds: f64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_factor_seconds: default_backoff_seconds(),
        }
    }
}

fn default_backoff_seconds() -> f64 {
    DEFAULT_BACKOFF_FACTOR.as_secs_f64()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub plain_http: bool,
}

impl RegistryConfig {
    fn host_config(&self) -> HostConfig {
        let auth = match (&self.username, &self.password) {
            (Some(username), Some(password)) => RegistryAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => RegistryAuth::Anonymous,
        };
        HostConfig {
            auth,
            plain_http: self.plain_http,
        }
    }
}

impl TransportConfig {
    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!(
            "Loaded config from {} ({} overwrites, {} registries)",
            path.display(),
            config.overwrites.len(),
            config.registries.len()
        );
        Ok(config)
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(default_cache_root()?.join("components")),
        }
    }

    pub fn blob_cache_dir(&self) -> Result<PathBuf> {
        match &self.blob_cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(default_cache_root()?.join("blobs")),
        }
    }

    pub fn component_cache(&self) -> Result<FilesystemCache> {
        Ok(FilesystemCache::new(self.cache_dir()?))
    }

    pub fn blob_cache(&self) -> Result<FilesystemBlobCache> {
        Ok(FilesystemBlobCache::new(self.blob_cache_dir()?))
    }

    pub fn substitution_manager(&self) -> Arc<SubstitutionManager> {
        Arc::new(SubstitutionManager::new(self.overwrites.clone()))
    }

    pub fn registry_client(&self) -> Result<HttpRegistryClient> {
        let mut client = HttpRegistryClient::new().context("Failed to build HTTP client")?;
        for registry in &self.registries {
            client = client.with_host(registry.host.clone(), registry.host_config());
        }
        Ok(client)
    }

    pub fn backoff_factor(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.copy.backoff_factor_seconds).with_context(|| {
            format!(
                "Invalid copy.backoffFactorSeconds: {}",
                self.copy.backoff_factor_seconds
            )
        })
    }

    /// Copy options seeded with the configured retry policy
    pub fn copy_options(&self, source: &str, target: &str) -> Result<CopyOptions> {
        let mut options = CopyOptions::new(source, target);
        options.max_retries = self.copy.max_retries;
        options.backoff_factor = self.backoff_factor()?;
        Ok(options)
    }
}

/// `<config dir>/cdport/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = directories::ProjectDirs::from("io", "cdport", "cdport")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .or_else(|| dirs::config_dir().map(|d| d.join("cdport")))
        .context("Could not determine config directory")?;
    Ok(config_dir.join(CONFIG_FILE))
}

fn default_cache_root() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|d| d.join("cdport"))
        .context("Could not determine cache directory")
}
