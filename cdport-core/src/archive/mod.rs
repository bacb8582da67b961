//! Component archives
//!
//! An archive is one component descriptor plus the blobs of its local
//! resources and sources:
//!
//! ```text
//! component-descriptor.yaml
//! blobs/
//!   sha256.<hex>
//! ```
//!
//! Archives are read from a directory, a tar or a gzipped tar and can be
//! written in any of the three formats.

pub mod ctf;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use crate::blob::{access_type, BlobInfo, BlobResolver, BlobWriter, DEFAULT_MEDIA_TYPE};
use crate::descriptor::{
    oci_repository_context, validation, Access, Codec, ComponentDescriptor, ComponentReference,
    DecodeOptions, LocalFilesystemBlobAccess, Resource, ResourceRelation, Source, TypedObject,
    UnstructuredTypedObject,
};
use crate::digest::{copy_hashed, digest_filename, sha256_digest, DigestWriter};
use crate::error::{Error, Result};
use crate::oci::COMPONENT_DESCRIPTOR_FILE;

pub use ctf::{entry_name, push_ctf, Ctf};

/// Directory holding the archive's blobs
pub const BLOBS_DIR: &str = "blobs";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Filesystem,
    Tar,
    TarGzip,
}

impl std::str::FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fs" | "filesystem" => Ok(Self::Filesystem),
            "tar" => Ok(Self::Tar),
            "tgz" | "tar.gz" | "tar.gzip" => Ok(Self::TarGzip),
            other => Err(format!("unknown archive format '{other}'")),
        }
    }
}

/// Content to store as a blob of the archive
pub struct BlobInput {
    pub media_type: String,
    reader: Box<dyn Read + Send>,
    // keeps staged content alive until it is read
    _staged: Option<tempfile::NamedTempFile>,
}

impl BlobInput {
    pub fn from_reader(media_type: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            media_type: media_type.into(),
            reader: Box::new(reader),
            _staged: None,
        }
    }

    pub fn from_bytes(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::from_reader(media_type, std::io::Cursor::new(data))
    }

    pub fn from_file(media_type: impl Into<String>, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(media_type, BufReader::new(file)))
    }

    /// Tar a directory, gzipped when `compress` is set
    pub fn from_dir(dir: &Path, compress: bool) -> Result<Self> {
        let staged = tempfile::NamedTempFile::new()?;
        let out = staged.reopen()?;
        if compress {
            let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            builder.append_dir_all(".", dir)?;
            builder.into_inner()?.finish()?;
        } else {
            let mut builder = tar::Builder::new(out);
            builder.append_dir_all(".", dir)?;
            builder.into_inner()?;
        }
        let media_type = if compress {
            "application/gzip"
        } else {
            "application/x-tar"
        };
        let reader = BufReader::new(staged.reopen()?);
        Ok(Self {
            media_type: media_type.to_string(),
            reader: Box::new(reader),
            _staged: Some(staged),
        })
    }
}

#[derive(Debug)]
pub struct ComponentArchive {
    descriptor: ComponentDescriptor,
    root: PathBuf,
    _tmp: Option<TempDir>,
}

impl ComponentArchive {
    /// Archive for `descriptor` backed by a temporary directory
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self> {
        let tmp = TempDir::new()?;
        std::fs::create_dir_all(tmp.path().join(BLOBS_DIR))?;
        Ok(Self {
            descriptor,
            root: tmp.path().to_path_buf(),
            _tmp: Some(tmp),
        })
    }

    /// Initialise an archive directory with a minimal descriptor
    pub fn create(dir: &Path, name: &str, version: &str, base_url: Option<&str>) -> Result<Self> {
        let cd_path = dir.join(COMPONENT_DESCRIPTOR_FILE);
        if cd_path.exists() {
            return Err(Error::Conflict(format!(
                "component archive already exists at {}",
                dir.display()
            )));
        }
        let mut descriptor = ComponentDescriptor::new(name, version);
        if let Some(base_url) = base_url {
            descriptor.inject_repository_context(oci_repository_context(base_url)?);
        }
        validation::validate(&descriptor)?;

        std::fs::create_dir_all(dir.join(BLOBS_DIR))?;
        let archive = Self {
            descriptor,
            root: dir.to_path_buf(),
            _tmp: None,
        };
        archive.save()?;
        Ok(archive)
    }

    pub fn from_filesystem(dir: &Path) -> Result<Self> {
        Self::from_filesystem_with(dir, DecodeOptions::default())
    }

    pub fn from_filesystem_with(dir: &Path, options: DecodeOptions) -> Result<Self> {
        let cd_path = dir.join(COMPONENT_DESCRIPTOR_FILE);
        let data = match std::fs::read(&cd_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::invalid(
                    format!("component archive {}", dir.display()),
                    format!("missing {COMPONENT_DESCRIPTOR_FILE}"),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let descriptor = Codec::default().with_options(options.clone()).decode(&data)?;
        let archive = Self {
            descriptor,
            root: dir.to_path_buf(),
            _tmp: None,
        };
        if !options.disable_validation {
            archive.check_blobs()?;
        }
        Ok(archive)
    }

    /// Unpack a tar stream into a temporary directory
    pub fn from_tar(reader: impl Read) -> Result<Self> {
        let tmp = TempDir::new()?;
        tar::Archive::new(reader).unpack(tmp.path())?;
        let mut archive = Self::from_filesystem(tmp.path())?;
        archive._tmp = Some(tmp);
        Ok(archive)
    }

    /// Open an archive in any format
    ///
    /// Directories are read in place; files are sniffed for the gzip magic
    /// and read as tar otherwise.
    pub fn parse(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Self::from_filesystem(path);
        }
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let n = read_prefix(&mut file, &mut magic)?;
        let file = File::open(path)?;
        if n == 2 && magic == GZIP_MAGIC {
            tracing::debug!("Reading {} as tar+gzip archive", path.display());
            Self::from_tar(GzDecoder::new(BufReader::new(file)))
        } else {
            tracing::debug!("Reading {} as tar archive", path.display());
            Self::from_tar(BufReader::new(file))
        }
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut ComponentDescriptor {
        &mut self.descriptor
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Digest of the encoded descriptor
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&Codec::default().encode(&self.descriptor)?))
    }

    /// Path of a blob file; the name must be a plain file name
    pub fn blob_path(&self, filename: &str) -> Result<PathBuf> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(BLOBS_DIR).join(filename)),
            _ => Err(Error::invalid(
                "blob file name",
                format!("'{filename}' is not a plain file name"),
            )),
        }
    }

    /// Write the descriptor to the archive directory
    pub fn save(&self) -> Result<()> {
        let data = Codec::default().encode(&self.descriptor)?;
        std::fs::write(self.root.join(COMPONENT_DESCRIPTOR_FILE), data)?;
        Ok(())
    }

    /// Store `input` as a content-addressed blob
    fn store_blob(&self, mut input: BlobInput) -> Result<LocalFilesystemBlobAccess> {
        let blobs = self.root.join(BLOBS_DIR);
        std::fs::create_dir_all(&blobs)?;
        let staged = tempfile::NamedTempFile::new_in(&blobs)?;
        let mut writer = DigestWriter::new(staged.reopen()?);
        std::io::copy(&mut input.reader, &mut writer)?;
        let (mut file, digest, size) = writer.finish();
        file.flush()?;

        let filename = digest_filename(&digest)?;
        let path = blobs.join(&filename);
        if path.exists() {
            tracing::debug!("Blob {} already in archive", digest);
        } else {
            staged.persist(&path).map_err(|e| e.error)?;
            tracing::debug!("Stored blob {} ({} bytes)", digest, size);
        }
        Ok(LocalFilesystemBlobAccess {
            filename,
            media_type: Some(input.media_type),
        })
    }

    /// Add or replace a resource, storing `input` as its blob
    pub fn add_resource(&mut self, mut resource: Resource, input: Option<BlobInput>) -> Result<()> {
        if let Some(input) = input {
            resource.access = Some(UnstructuredTypedObject::new(&self.store_blob(input)?)?);
        }
        if resource.relation == ResourceRelation::Local && resource.version.is_empty() {
            resource.version = self.descriptor.version().to_string();
        }
        self.check_access(&resource.name, resource.access.as_ref())?;
        self.commit(|cd| cd.set_resource(resource))
    }

    /// Add or replace a resource, copying its content from `resolver`
    pub async fn add_resource_from_resolver(
        &mut self,
        mut resource: Resource,
        resolver: &dyn BlobResolver,
    ) -> Result<()> {
        let blobs = self.root.join(BLOBS_DIR);
        tokio::fs::create_dir_all(&blobs).await?;
        let staged = tempfile::NamedTempFile::new_in(&blobs)?;
        let mut file = tokio::fs::File::from_std(staged.reopen()?);
        let info = resolver.resolve(&resource, &mut file).await?;
        file.flush().await?;
        drop(file);

        let filename = digest_filename(&info.digest)?;
        staged.persist(blobs.join(&filename)).map_err(|e| e.error)?;
        resource.access = Some(UnstructuredTypedObject::new(&LocalFilesystemBlobAccess {
            filename,
            media_type: Some(info.media_type),
        })?);
        self.add_resource(resource, None)
    }

    pub fn add_source(&mut self, mut source: Source, input: Option<BlobInput>) -> Result<()> {
        if let Some(input) = input {
            source.access = Some(UnstructuredTypedObject::new(&self.store_blob(input)?)?);
        }
        self.check_access(&source.name, source.access.as_ref())?;
        self.commit(|cd| cd.set_source(source))
    }

    pub fn add_component_reference(&mut self, reference: ComponentReference) -> Result<()> {
        if reference.component_name.is_empty() || reference.version.is_empty() {
            return Err(Error::invalid(
                format!("component reference '{}'", reference.name),
                "componentName and version are required",
            ));
        }
        self.commit(|cd| cd.set_component_reference(reference))
    }

    /// Apply `edit` to a copy of the descriptor and keep it only if the
    /// result validates
    fn commit(&mut self, edit: impl FnOnce(&mut ComponentDescriptor)) -> Result<()> {
        let mut candidate = self.descriptor.clone();
        edit(&mut candidate);
        validation::validate(&candidate)?;
        self.descriptor = candidate;
        Ok(())
    }

    fn check_access(&self, element: &str, access: Option<&UnstructuredTypedObject>) -> Result<()> {
        let Some(access) = access else {
            return Ok(());
        };
        if access.object_type() != LocalFilesystemBlobAccess::TYPE {
            return Ok(());
        }
        let access: LocalFilesystemBlobAccess = access.decode_into()?;
        if !self.blob_path(&access.filename)?.is_file() {
            return Err(Error::invalid(
                format!("access of '{element}'"),
                format!("blob {} does not exist in the archive", access.filename),
            ));
        }
        Ok(())
    }

    /// Every `localFilesystemBlob` access must point at an existing blob
    pub fn check_blobs(&self) -> Result<()> {
        let component = &self.descriptor.component;
        for res in &component.resources {
            self.check_access(&res.name, res.access.as_ref())?;
        }
        for src in &component.sources {
            self.check_access(&src.name, src.access.as_ref())?;
        }
        Ok(())
    }

    /// Size, digest and media type of a blob file
    pub async fn file_blob_info(&self, access: &LocalFilesystemBlobAccess) -> Result<BlobInfo> {
        let path = self.blob_path(&access.filename)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("blob {}", access.filename)))
            }
            Err(e) => return Err(e.into()),
        };
        let (digest, size) = copy_hashed(&mut file, &mut tokio::io::sink()).await?;
        Ok(BlobInfo {
            media_type: access
                .media_type
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string()),
            digest,
            size,
        })
    }

    /// Write the archive to `path` in the given format
    pub fn write(&self, path: &Path, format: ArchiveFormat) -> Result<()> {
        match format {
            ArchiveFormat::Filesystem => self.write_filesystem(path),
            ArchiveFormat::Tar => {
                self.write_tar(File::create(path)?)?;
                Ok(())
            }
            ArchiveFormat::TarGzip => {
                let encoder = self.write_tar(GzEncoder::new(File::create(path)?, Compression::default()))?;
                encoder.finish()?;
                Ok(())
            }
        }
    }

    /// Stream the archive as tar into `writer`, returning the writer
    pub fn write_tar<W: Write>(&self, writer: W) -> Result<W> {
        let mut builder = tar::Builder::new(writer);
        let data = Codec::default().encode(&self.descriptor)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, COMPONENT_DESCRIPTOR_FILE, data.as_slice())?;

        for name in self.blob_names()? {
            let path = self.root.join(BLOBS_DIR).join(&name);
            builder.append_path_with_name(&path, Path::new(BLOBS_DIR).join(&name))?;
        }
        Ok(builder.into_inner()?)
    }

    fn write_filesystem(&self, dir: &Path) -> Result<()> {
        let blobs = dir.join(BLOBS_DIR);
        std::fs::create_dir_all(&blobs)?;
        if dir != self.root {
            for name in self.blob_names()? {
                std::fs::copy(self.root.join(BLOBS_DIR).join(&name), blobs.join(&name))?;
            }
        }
        let data = Codec::default().encode(&self.descriptor)?;
        std::fs::write(dir.join(COMPONENT_DESCRIPTOR_FILE), data)?;
        Ok(())
    }

    /// Blob file names, sorted
    fn blob_names(&self) -> Result<Vec<String>> {
        let dir = self.root.join(BLOBS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    // skip half-written staging files
                    if !name.starts_with(".tmp") {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl BlobResolver for ComponentArchive {
    fn can_resolve(&self, resource: &Resource) -> bool {
        access_type(resource) == Some(LocalFilesystemBlobAccess::TYPE)
    }

    async fn info(&self, resource: &Resource) -> Result<BlobInfo> {
        self.file_blob_info(&local_access(resource)?).await
    }

    async fn resolve(&self, resource: &Resource, writer: BlobWriter<'_>) -> Result<BlobInfo> {
        let access = local_access(resource)?;
        let info = self.file_blob_info(&access).await?;
        let mut file = tokio::fs::File::open(self.blob_path(&access.filename)?).await?;
        tokio::io::copy(&mut file, writer).await?;
        Ok(info)
    }
}

fn local_access(resource: &Resource) -> Result<LocalFilesystemBlobAccess> {
    match resource.access_view()? {
        Some(Access::LocalFilesystemBlob(access)) => Ok(access),
        _ => Err(Error::invalid(
            format!("resource '{}'", resource.name),
            "access is not a localFilesystemBlob",
        )),
    }
}
