//! cdport command line interface
//!
//! Argument definitions live in this library so they can be exercised by
//! parser tests; `main.rs` only wires tracing and dispatches.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cdport_core::cache::ComponentCache;
use cdport_core::config::TransportConfig;
use cdport_core::oci::{BlobCache, RegistryClient};
use cdport_core::resolver::Resolver;

pub mod archive_cli;
pub mod cache_cli;
pub mod ctf_cli;
pub mod remote_cli;

use archive_cli::ArchiveCommand;
use cache_cli::CacheCommand;
use ctf_cli::CtfCommand;
use remote_cli::{CopyArgs, GetArgs, PushArgs};

/// Trace modules for debugging transport runs
#[derive(Debug, Clone, ValueEnum)]
pub enum TraceModule {
    Resolve,
    Copy,
    Oci,
    Archive,
    All,
}

impl TraceModule {
    pub fn to_filter_directive(&self) -> &'static str {
        match self {
            TraceModule::Resolve => "cdport_core::resolver=trace",
            TraceModule::Copy => "cdport_core::copier=trace",
            TraceModule::Oci => "cdport_core::oci=trace",
            TraceModule::Archive => "cdport_core::archive=trace",
            TraceModule::All => "cdport_core=trace",
        }
    }
}

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "cdport",
    about = "Component archives, transport containers and registry replication",
    version
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,

    /// Enable JSON tracing for modules (comma-separated: resolve,copy,oci,archive,all)
    #[clap(long, value_delimiter = ',', global = true)]
    pub trace: Vec<TraceModule>,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Configuration file (default: <config dir>/cdport/config.yaml)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a component descriptor from a registry
    Get(GetArgs),

    /// Copy a component, and its references, from one registry to another
    Copy(CopyArgs),

    /// Push a component archive to a registry
    Push(PushArgs),

    /// Create and edit component archives
    Archive {
        #[clap(subcommand)]
        command: ArchiveCommand,
    },

    /// Bundle component archives into a transport container
    Ctf {
        #[clap(subcommand)]
        command: CtfCommand,
    },

    /// Manage the local descriptor cache
    Cache {
        #[clap(subcommand)]
        command: CacheCommand,
    },
}

impl Command {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self {
            Command::Get(args) => args.execute(session).await,
            Command::Copy(args) => args.execute(session).await,
            Command::Push(args) => args.execute(session).await,
            Command::Archive { command } => command.execute(session).await,
            Command::Ctf { command } => command.execute(session).await,
            Command::Cache { command } => command.execute(session).await,
        }
    }
}

/// Loaded configuration plus the clients built from it
pub struct Session {
    config: TransportConfig,
}

impl Session {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::new(TransportConfig::load(path)?))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn registry_client(&self) -> Result<Arc<dyn RegistryClient>> {
        Ok(Arc::new(self.config.registry_client()?))
    }

    pub fn component_cache(&self) -> Result<Arc<dyn ComponentCache>> {
        Ok(Arc::new(self.config.component_cache()?))
    }

    pub fn blob_cache(&self) -> Result<Arc<dyn BlobCache>> {
        Ok(Arc::new(self.config.blob_cache()?))
    }

    /// Resolver with the configured overwrites and, unless disabled, the cache
    pub fn resolver(&self, client: Arc<dyn RegistryClient>, use_cache: bool) -> Result<Resolver> {
        let mut resolver = Resolver::new(client);
        if use_cache {
            resolver = resolver.with_cache(self.component_cache()?);
        }
        if !self.config.overwrites.is_empty() {
            resolver = resolver.with_overwrites(self.config.substitution_manager());
        }
        Ok(resolver)
    }
}

/// Parse a Go-style duration (`500ms`, `1s`, `2m`) or plain seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let value: f64 = number
        .parse()
        .with_context(|| format!("Invalid duration: {s}"))?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(anyhow!("Invalid duration unit '{other}' in {s}")),
    };
    Duration::try_from_secs_f64(seconds).with_context(|| format!("Invalid duration: {s}"))
}

/// Parse `key=value`
pub fn parse_key_value(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(anyhow!("Empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
