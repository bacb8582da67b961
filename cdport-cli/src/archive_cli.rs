//! Component archive commands

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use cdport_core::archive::{ArchiveFormat, BlobInput, ComponentArchive};
use cdport_core::blob::DEFAULT_MEDIA_TYPE;
use cdport_core::descriptor::{
    oci_repository_context, Access, ComponentReference, Identity, Label, Resource,
    ResourceRelation, Source, UnstructuredTypedObject,
};
use cdport_core::signing::{
    sign_descriptor, verify_descriptor, Digester, RsaSigner, RsaVerifier, MEDIA_TYPE_PEM,
    MEDIA_TYPE_RSA_SIGNATURE,
};

use crate::{parse_key_value, Session};

#[derive(Subcommand, Debug)]
pub enum ArchiveCommand {
    /// Initialise an archive directory with an empty descriptor
    Create {
        /// Archive directory
        dir: PathBuf,

        /// Component name, e.g. github.com/acme/backend
        #[clap(long)]
        name: String,

        /// Component version
        #[clap(long)]
        version: String,

        /// Repository base URL recorded as the repository context
        #[clap(long)]
        repo_ctx: Option<String>,
    },

    /// Add or replace a resource
    AddResource(AddResourceArgs),

    /// Add or replace a source
    AddSource(AddSourceArgs),

    /// Add or replace a component reference
    AddReference {
        /// Archive directory
        dir: PathBuf,

        /// Reference name, unique within the descriptor
        #[clap(long)]
        name: String,

        /// Name of the referenced component
        #[clap(long)]
        component_name: String,

        /// Version of the referenced component
        #[clap(long)]
        version: String,

        /// Extra identity attributes (key=value)
        #[clap(long = "extra-identity", value_parser = parse_key_value)]
        extra_identity: Vec<(String, String)>,
    },

    /// Write an archive in another format
    Export {
        /// Archive directory, tar or tgz
        archive: PathBuf,

        /// Output path
        output: PathBuf,

        /// Output format: fs, tar or tgz
        #[clap(long, short, default_value = "tar")]
        format: ArchiveFormat,
    },

    /// Download a component and its local blobs into an archive
    Pull {
        /// Repository base URL
        base_url: String,

        /// Component name
        name: String,

        /// Component version
        version: String,

        /// Output path
        output: PathBuf,

        /// Output format: fs, tar or tgz
        #[clap(long, short, default_value = "fs")]
        format: ArchiveFormat,
    },

    /// Add digests to the descriptor and sign it with an RSA key
    Sign(SignArgs),

    /// Check a named signature and the digests it covers
    Verify {
        /// Archive directory, tar or tgz
        archive: PathBuf,

        #[clap(long)]
        signature_name: String,

        /// PEM encoded RSA public key
        #[clap(long)]
        public_key: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignatureEncoding {
    /// Hex encoded signature value
    Rsa,
    /// Signature as a PEM block
    Pem,
}

impl SignatureEncoding {
    fn media_type(self) -> &'static str {
        match self {
            SignatureEncoding::Rsa => MEDIA_TYPE_RSA_SIGNATURE,
            SignatureEncoding::Pem => MEDIA_TYPE_PEM,
        }
    }
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Archive directory
    pub dir: PathBuf,

    /// Signature name; an existing signature with this name is replaced
    #[clap(long)]
    pub signature_name: String,

    /// PKCS#8 PEM encoded RSA private key
    #[clap(long)]
    pub private_key: PathBuf,

    #[clap(long, value_enum, default_value = "rsa")]
    pub encoding: SignatureEncoding,

    /// Access types whose content is excluded from the signature
    #[clap(long, value_delimiter = ',')]
    pub skip_access_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RelationArg {
    Local,
    External,
}

impl From<RelationArg> for ResourceRelation {
    fn from(relation: RelationArg) -> Self {
        match relation {
            RelationArg::Local => ResourceRelation::Local,
            RelationArg::External => ResourceRelation::External,
        }
    }
}

#[derive(Args, Debug)]
pub struct AddResourceArgs {
    /// Archive directory
    pub dir: PathBuf,

    #[clap(long)]
    pub name: String,

    #[clap(long = "type")]
    pub resource_type: String,

    /// Resource version (default: the component version)
    #[clap(long)]
    pub version: Option<String>,

    #[clap(long, value_enum, default_value = "local")]
    pub relation: RelationArg,

    /// File or directory stored as the resource blob
    #[clap(long, conflicts_with = "access")]
    pub input: Option<PathBuf>,

    /// Media type of the blob (default: application/octet-stream, tar for directories)
    #[clap(long)]
    pub media_type: Option<String>,

    /// Gzip a directory input
    #[clap(long)]
    pub compress: bool,

    /// Access as YAML or JSON, e.g. '{"type": "ociRegistry", "imageReference": "..."}'
    #[clap(long)]
    pub access: Option<String>,

    /// Extra identity attributes (key=value)
    #[clap(long = "extra-identity", value_parser = parse_key_value)]
    pub extra_identity: Vec<(String, String)>,

    /// Labels (name=value, value parsed as JSON when possible)
    #[clap(long = "label", value_parser = parse_key_value)]
    pub labels: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct AddSourceArgs {
    /// Archive directory
    pub dir: PathBuf,

    #[clap(long)]
    pub name: String,

    #[clap(long = "type")]
    pub source_type: String,

    /// Source version (default: the component version)
    #[clap(long)]
    pub version: Option<String>,

    /// File or directory stored as the source blob
    #[clap(long, conflicts_with = "access")]
    pub input: Option<PathBuf>,

    /// Media type of the blob
    #[clap(long)]
    pub media_type: Option<String>,

    /// Gzip a directory input
    #[clap(long)]
    pub compress: bool,

    /// Access as YAML or JSON
    #[clap(long)]
    pub access: Option<String>,

    /// Labels (name=value, value parsed as JSON when possible)
    #[clap(long = "label", value_parser = parse_key_value)]
    pub labels: Vec<(String, String)>,
}

impl ArchiveCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self {
            ArchiveCommand::Create {
                dir,
                name,
                version,
                repo_ctx,
            } => {
                ComponentArchive::create(&dir, &name, &version, repo_ctx.as_deref())
                    .with_context(|| format!("Failed to create archive at {}", dir.display()))?;
                println!("Created component archive {name}:{version} at {}", dir.display());
                Ok(())
            }
            ArchiveCommand::AddResource(args) => args.execute(),
            ArchiveCommand::AddSource(args) => args.execute(),
            ArchiveCommand::AddReference {
                dir,
                name,
                component_name,
                version,
                extra_identity,
            } => {
                let mut archive = open_archive(&dir)?;
                archive.add_component_reference(ComponentReference {
                    name,
                    component_name,
                    version,
                    extra_identity: extra_identity.into_iter().collect(),
                    labels: vec![],
                    digest: None,
                })?;
                archive.save()?;
                Ok(())
            }
            ArchiveCommand::Export {
                archive,
                output,
                format,
            } => {
                let ca = ComponentArchive::parse(&archive)
                    .with_context(|| format!("Failed to read archive {}", archive.display()))?;
                ca.write(&output, format)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                tracing::info!("Exported {} to {}", archive.display(), output.display());
                Ok(())
            }
            ArchiveCommand::Pull {
                base_url,
                name,
                version,
                output,
                format,
            } => pull(session, &base_url, &name, &version, &output, format).await,
            ArchiveCommand::Sign(args) => args.execute(session).await,
            ArchiveCommand::Verify {
                archive,
                signature_name,
                public_key,
            } => verify(session, &archive, &signature_name, &public_key).await,
        }
    }
}

impl AddResourceArgs {
    fn execute(self) -> Result<()> {
        let mut archive = open_archive(&self.dir)?;
        let version = self
            .version
            .unwrap_or_else(|| archive.descriptor().version().to_string());
        let mut resource = Resource::new(
            self.name,
            version,
            self.resource_type,
            self.relation.into(),
        );
        resource.extra_identity = self.extra_identity.into_iter().collect::<Identity>();
        resource.labels = labels(self.labels);
        if let Some(access) = &self.access {
            resource.access = Some(parse_access(access)?);
        }
        let input = blob_input(self.input.as_deref(), self.media_type, self.compress)?;

        let name = resource.name.clone();
        archive
            .add_resource(resource, input)
            .with_context(|| format!("Failed to add resource {name}"))?;
        archive.save()?;
        Ok(())
    }
}

impl SignArgs {
    async fn execute(self, session: &Session) -> Result<()> {
        let mut archive = open_archive(&self.dir)?;
        let signer = RsaSigner::from_file(&self.private_key, self.encoding.media_type())
            .with_context(|| format!("Failed to load {}", self.private_key.display()))?;
        let digester = Digester::new(session.resolver(session.registry_client()?, true)?)
            .with_skip_access_types(self.skip_access_types);

        let mut cd = archive.descriptor().clone();
        digester
            .add_digests(&mut cd, &archive)
            .await
            .context("Failed to digest component")?;
        sign_descriptor(&mut cd, &signer, &self.signature_name)?;
        *archive.descriptor_mut() = cd;
        archive.save()?;
        println!(
            "Signed {}:{} as {}",
            archive.descriptor().name(),
            archive.descriptor().version(),
            self.signature_name
        );
        Ok(())
    }
}

async fn verify(
    session: &Session,
    path: &Path,
    signature_name: &str,
    public_key: &Path,
) -> Result<()> {
    let archive = ComponentArchive::parse(path)
        .with_context(|| format!("Failed to read archive {}", path.display()))?;
    let verifier = RsaVerifier::from_file(public_key)
        .with_context(|| format!("Failed to load {}", public_key.display()))?;
    let cd = archive.descriptor();
    verify_descriptor(cd, &verifier, signature_name).with_context(|| {
        format!(
            "Signature {signature_name} of {}:{} is invalid",
            cd.name(),
            cd.version()
        )
    })?;
    Digester::new(session.resolver(session.registry_client()?, true)?)
        .check_digests(cd, &archive)
        .await
        .context("Digests do not match the content")?;
    println!("Signature {signature_name} of {}:{} is valid", cd.name(), cd.version());
    Ok(())
}

impl AddSourceArgs {
    fn execute(self) -> Result<()> {
        let mut archive = open_archive(&self.dir)?;
        let version = self
            .version
            .unwrap_or_else(|| archive.descriptor().version().to_string());
        let mut source = Source::new(self.name, version, self.source_type);
        source.labels = labels(self.labels);
        if let Some(access) = &self.access {
            source.access = Some(parse_access(access)?);
        }
        let input = blob_input(self.input.as_deref(), self.media_type, self.compress)?;

        let name = source.name.clone();
        archive
            .add_source(source, input)
            .with_context(|| format!("Failed to add source {name}"))?;
        archive.save()?;
        Ok(())
    }
}

fn open_archive(dir: &Path) -> Result<ComponentArchive> {
    ComponentArchive::from_filesystem(dir)
        .with_context(|| format!("Failed to open archive at {}", dir.display()))
}

fn parse_access(input: &str) -> Result<UnstructuredTypedObject> {
    let access = UnstructuredTypedObject::from_bytes(input.as_bytes())
        .context("Failed to parse access")?;
    // known access types must decode
    Access::from_unstructured(&access).context("Invalid access")?;
    Ok(access)
}

fn blob_input(
    input: Option<&Path>,
    media_type: Option<String>,
    compress: bool,
) -> Result<Option<BlobInput>> {
    let Some(path) = input else {
        return Ok(None);
    };
    let mut blob = if path.is_dir() {
        BlobInput::from_dir(path, compress)?
    } else {
        BlobInput::from_file(DEFAULT_MEDIA_TYPE, path)
            .with_context(|| format!("Failed to open {}", path.display()))?
    };
    if let Some(media_type) = media_type {
        blob.media_type = media_type;
    }
    Ok(Some(blob))
}

fn labels(pairs: Vec<(String, String)>) -> Vec<Label> {
    pairs
        .into_iter()
        .map(|(name, value)| Label {
            name,
            value: serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value)),
        })
        .collect()
}

async fn pull(
    session: &Session,
    base_url: &str,
    name: &str,
    version: &str,
    output: &Path,
    format: ArchiveFormat,
) -> Result<()> {
    let ctx = oci_repository_context(base_url)?;
    let resolver = session.resolver(session.registry_client()?, true)?;
    let (cd, blobs) = resolver
        .resolve_with_blob_resolver(&ctx, name, version)
        .await
        .with_context(|| format!("Failed to resolve {name}:{version} from {base_url}"))?;

    let mut archive = ComponentArchive::new(cd.clone())?;
    for res in &cd.component.resources {
        if matches!(res.access_view()?, Some(Access::LocalOciBlob(_))) {
            archive
                .add_resource_from_resolver(res.clone(), blobs.as_ref())
                .await
                .with_context(|| format!("Failed to download resource {}", res.name))?;
        }
    }
    archive
        .write(output, format)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Pulled {name}:{version} to {}", output.display());
    Ok(())
}
