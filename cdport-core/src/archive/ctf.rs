//! Component Transport Format: many component archives in one tar file
//!
//! Each entry is a tar-serialized component archive named after its
//! component. The container is rewritten entry by entry through temporary
//! files, so no archive is held in memory. There is no file locking;
//! concurrent writers must be serialized by the caller.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::descriptor::OciRegistryRepository;
use crate::error::Result;
use crate::oci::{push_archive, BlobCache, RegistryClient};

use super::ComponentArchive;

/// Entry name of a component version inside a CTF
pub fn entry_name(name: &str, version: &str) -> String {
    format!("{}-{version}.tar", name.replace(['/', ':'], "_"))
}

#[derive(Debug, Clone)]
pub struct Ctf {
    path: PathBuf,
}

impl Ctf {
    /// Open a container, creating an empty one if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tar::Builder::new(File::create(&path)?).into_inner()?;
            tracing::debug!("Created empty transport container {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add an archive, replacing an existing entry of the same name in place
    pub fn add_archive(&self, archive: &ComponentArchive) -> Result<()> {
        let cd = archive.descriptor();
        let name = entry_name(cd.name(), cd.version());

        let mut staged = archive.write_tar(tempfile::tempfile()?)?;
        let size = staged.seek(SeekFrom::End(0))?;
        staged.seek(SeekFrom::Start(0))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let rewritten = tempfile::NamedTempFile::new_in(dir)?;
        let mut builder = tar::Builder::new(rewritten.reopen()?);
        let mut replaced = false;

        let mut current = tar::Archive::new(BufReader::new(File::open(&self.path)?));
        for entry in current.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            if path == Path::new(&name) {
                append_entry(&mut builder, &name, size, &mut staged)?;
                replaced = true;
            } else {
                let mut header = entry.header().clone();
                builder.append_data(&mut header, &path, &mut entry)?;
            }
        }
        if !replaced {
            append_entry(&mut builder, &name, size, &mut staged)?;
        }
        builder.into_inner()?.sync_all()?;
        rewritten.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!(
            "{} {} in {}",
            if replaced { "Replaced" } else { "Added" },
            name,
            self.path.display()
        );
        Ok(())
    }

    pub fn entry_names(&self) -> Result<Vec<String>> {
        let mut archive = tar::Archive::new(BufReader::new(File::open(&self.path)?));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            names.push(entry?.path()?.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Visit every contained archive in container order
    pub fn walk<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, ComponentArchive) -> Result<()>,
    {
        let mut container = tar::Archive::new(BufReader::new(File::open(&self.path)?));
        for entry in container.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut magic = [0u8; 2];
            entry.read_exact(&mut magic)?;
            let reader = (&magic[..]).chain(entry);
            let archive = if magic == [0x1f, 0x8b] {
                ComponentArchive::from_tar(GzDecoder::new(reader))?
            } else {
                ComponentArchive::from_tar(reader)?
            };
            f(&name, archive)?;
        }
        Ok(())
    }

    /// All contained archives, unpacked to temporary directories
    pub fn archives(&self) -> Result<Vec<ComponentArchive>> {
        let mut archives = Vec::new();
        self.walk(|_, archive| {
            archives.push(archive);
            Ok(())
        })?;
        Ok(archives)
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    size: u64,
    content: &mut File,
) -> Result<()> {
    content.seek(SeekFrom::Start(0))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, content)?;
    Ok(())
}

/// Push every archive of the container to `repo`
pub async fn push_ctf(
    client: &dyn RegistryClient,
    ctf: &Ctf,
    repo: &OciRegistryRepository,
    cache: &dyn BlobCache,
) -> Result<Vec<String>> {
    let mut pushed = Vec::new();
    for archive in ctf.archives()? {
        pushed.push(push_archive(client, &archive, repo, cache).await?);
    }
    Ok(pushed)
}
