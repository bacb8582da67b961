//! Transport container commands

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use cdport_core::archive::{push_ctf, ComponentArchive, Ctf};
use cdport_core::descriptor::{oci_repository_context, OciRegistryRepository};

use crate::Session;

#[derive(Subcommand, Debug)]
pub enum CtfCommand {
    /// Add component archives, replacing entries of the same component version
    Add {
        /// Transport container file, created if missing
        ctf: PathBuf,

        /// Component archives (directory, tar or tgz)
        #[clap(required = true)]
        archives: Vec<PathBuf>,
    },

    /// List the components in a container
    List {
        /// Transport container file
        ctf: PathBuf,
    },

    /// Push every contained component to a registry
    Push {
        /// Transport container file
        ctf: PathBuf,

        /// Repository base URL
        #[clap(long)]
        repo_ctx: String,
    },
}

/// Table row for container entries
#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "References")]
    references: usize,
    #[tabled(rename = "Entry")]
    entry: String,
}

impl CtfCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self {
            CtfCommand::Add { ctf, archives } => {
                let container = Ctf::open(&ctf)
                    .with_context(|| format!("Failed to open {}", ctf.display()))?;
                for path in archives {
                    let archive = ComponentArchive::parse(&path)
                        .with_context(|| format!("Failed to read archive {}", path.display()))?;
                    container.add_archive(&archive).with_context(|| {
                        format!("Failed to add {} to {}", path.display(), ctf.display())
                    })?;
                    println!(
                        "Added {}:{}",
                        archive.descriptor().name(),
                        archive.descriptor().version()
                    );
                }
                Ok(())
            }
            CtfCommand::List { ctf } => list(&ctf),
            CtfCommand::Push { ctf, repo_ctx } => {
                let container = Ctf::open(&ctf)
                    .with_context(|| format!("Failed to open {}", ctf.display()))?;
                let repo = OciRegistryRepository::from_context(&oci_repository_context(&repo_ctx)?)?;
                let client = session.registry_client()?;
                let cache = session.blob_cache()?;
                let pushed = push_ctf(client.as_ref(), &container, &repo, cache.as_ref())
                    .await
                    .with_context(|| format!("Failed to push {}", ctf.display()))?;
                for reference in &pushed {
                    println!("{reference}");
                }
                tracing::info!("Pushed {} components to {}", pushed.len(), repo_ctx);
                Ok(())
            }
        }
    }
}

fn list(ctf: &Path) -> Result<()> {
    if !ctf.exists() {
        anyhow::bail!("Transport container {} does not exist", ctf.display());
    }
    let container = Ctf::open(ctf)?;
    let mut rows = Vec::new();
    container.walk(|entry, archive| {
        let cd = archive.descriptor();
        rows.push(EntryRow {
            name: cd.name().to_string(),
            version: cd.version().to_string(),
            resources: cd.component.resources.len(),
            references: cd.component.component_references.len(),
            entry: entry.to_string(),
        });
        Ok(())
    })?;

    if rows.is_empty() {
        println!("No components in {}", ctf.display());
        return Ok(());
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}
