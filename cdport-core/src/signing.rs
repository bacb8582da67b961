//! Descriptor digests and RSA signatures
//!
//! A descriptor is signed over its normalised form: a canonical JSON
//! rendering of name, version, provider, resources and component
//! references, where every resource with content and every reference
//! carries a digest. [`Digester`] computes those digests, recursing into
//! referenced components; [`sign_descriptor`] and [`verify_descriptor`]
//! sign and check the digest of the normalised form.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::blob::BlobResolver;
use crate::descriptor::{
    ComponentDescriptor, ComponentReference, DigestSpec, Identity, LocalFilesystemBlobAccess,
    LocalOciBlobAccess, OciRegistryAccess, Resource, ResourceRelation, Signature, SignatureSpec,
    TypedObject, UnstructuredTypedObject,
};
use crate::digest::{copy_hashed, parse_digest};
use crate::error::{Error, Result};
use crate::resolver::Resolver;

pub const SHA256: &str = "sha256";

pub const JSON_NORMALISATION_V1: &str = "jsonNormalisation/v1";
pub const OCI_ARTIFACT_DIGEST_V1: &str = "ociArtifactDigest/v1";
pub const GENERIC_BLOB_DIGEST_V1: &str = "genericBlobDigest/v1";

/// Normalisation marking a resource whose content is not signed
pub const EXCLUDE_FROM_SIGNATURE: &str = "EXCLUDE-FROM-SIGNATURE";
pub const NO_DIGEST: &str = "NO-DIGEST";

pub const RSA_PKCS1_V15: &str = "RSASSA-PKCS1-V1_5";

/// Signature value is the hex encoded signature
pub const MEDIA_TYPE_RSA_SIGNATURE: &str = "application/vnd.ocm.signature.rsa";
/// Signature value is a `SIGNATURE` PEM block
pub const MEDIA_TYPE_PEM: &str = "application/x-pem-file";

pub const SIGNATURE_PEM_BLOCK: &str = "SIGNATURE";
pub const SIGNATURE_ALGORITHM_HEADER: &str = "Signature Algorithm";

/// Access type of resources without content
pub const NONE_ACCESS_TYPE: &str = "None";

impl DigestSpec {
    /// sha256 over `data`
    pub fn sha256(normalisation_algorithm: &str, data: &[u8]) -> Self {
        Self {
            hash_algorithm: SHA256.to_string(),
            normalisation_algorithm: normalisation_algorithm.to_string(),
            value: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn exclude_from_signature() -> Self {
        Self {
            hash_algorithm: NO_DIGEST.to_string(),
            normalisation_algorithm: EXCLUDE_FROM_SIGNATURE.to_string(),
            value: NO_DIGEST.to_string(),
        }
    }

    pub fn is_excluded(&self) -> bool {
        *self == Self::exclude_from_signature()
    }

    fn is_complete(&self) -> bool {
        !self.hash_algorithm.is_empty()
            && !self.normalisation_algorithm.is_empty()
            && !self.value.is_empty()
    }
}

fn has_content(res: &Resource) -> bool {
    res.access
        .as_ref()
        .is_some_and(|a| a.object_type() != NONE_ACCESS_TYPE)
}

fn component_id(cd: &ComponentDescriptor) -> String {
    format!("component descriptor {}:{}", cd.name(), cd.version())
}

/// Check that every reference and every resource with content has a digest
pub fn check_normalisable(cd: &ComponentDescriptor) -> Result<()> {
    let invalid = |reason: String| Error::invalid(component_id(cd), reason);
    for reference in &cd.component.component_references {
        if !reference.digest.as_ref().is_some_and(DigestSpec::is_complete) {
            return Err(invalid(format!(
                "missing digest in component reference {}:{}",
                reference.name, reference.version
            )));
        }
    }
    for res in &cd.component.resources {
        match (has_content(res), &res.digest) {
            (true, None) => {
                return Err(invalid(format!(
                    "missing digest in resource {}:{}",
                    res.name, res.version
                )))
            }
            (false, Some(_)) => {
                return Err(invalid(format!(
                    "digest without access in resource {}:{}",
                    res.name, res.version
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// List of single-key objects sorted by key
fn entries<K: Into<String>>(items: impl IntoIterator<Item = (K, Value)>) -> Value {
    let mut items: Vec<(String, Value)> = items.into_iter().map(|(k, v)| (k.into(), v)).collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Array(
        items
            .into_iter()
            .map(|(k, v)| Value::Object(Map::from_iter([(k, v)])))
            .collect(),
    )
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn extra_identity(identity: &Identity) -> Value {
    if identity.is_empty() {
        return Value::Null;
    }
    entries(identity.iter().map(|(k, v)| (k.as_str(), string(v))))
}

fn digest_entries(digest: &DigestSpec) -> Value {
    entries([
        ("hashAlgorithm", string(&digest.hash_algorithm)),
        ("normalisationAlgorithm", string(&digest.normalisation_algorithm)),
        ("value", string(&digest.value)),
    ])
}

fn relation(relation: ResourceRelation) -> Value {
    match relation {
        ResourceRelation::Local => string("local"),
        ResourceRelation::External => string("external"),
    }
}

fn normalised_reference(reference: &ComponentReference) -> Result<Value> {
    let digest = reference.digest.as_ref().ok_or_else(|| {
        Error::invalid(
            format!("component reference {}:{}", reference.name, reference.version),
            "missing digest",
        )
    })?;
    Ok(entries([
        ("componentName", string(&reference.component_name)),
        ("name", string(&reference.name)),
        ("version", string(&reference.version)),
        ("extraIdentity", extra_identity(&reference.extra_identity)),
        ("digest", digest_entries(digest)),
    ]))
}

fn normalised_resource(res: &Resource) -> Value {
    let mut fields = vec![
        ("name", string(&res.name)),
        ("version", string(&res.version)),
        ("type", string(&res.resource_type)),
        ("relation", relation(res.relation)),
        ("extraIdentity", extra_identity(&res.extra_identity)),
    ];
    if let (true, Some(digest)) = (has_content(res), &res.digest) {
        fields.push(("digest", digest_entries(digest)));
    }
    entries(fields)
}

/// Canonical JSON of the signed parts of `cd` (`jsonNormalisation/v1`)
///
/// Labels, sources, repository contexts and signatures are not part of
/// the normalised form.
pub fn normalise(cd: &ComponentDescriptor) -> Result<Vec<u8>> {
    check_normalisable(cd)?;
    let references = cd
        .component
        .component_references
        .iter()
        .map(normalised_reference)
        .collect::<Result<Vec<_>>>()?;
    let resources = cd
        .component
        .resources
        .iter()
        .map(normalised_resource)
        .collect();
    let component = entries([
        ("name", string(cd.name())),
        ("version", string(cd.version())),
        ("provider", string(&cd.component.provider)),
        ("componentReferences", Value::Array(references)),
        ("resources", Value::Array(resources)),
    ]);
    let normalised = entries([
        ("meta", entries([("schemaVersion", string(&cd.meta.schema_version))])),
        ("component", component),
    ]);
    Ok(serde_json::to_vec(&normalised)?)
}

/// sha256 digest of the normalised descriptor
pub fn digest_descriptor(cd: &ComponentDescriptor) -> Result<DigestSpec> {
    Ok(DigestSpec::sha256(JSON_NORMALISATION_V1, &normalise(cd)?))
}

/// Produces a signature over a descriptor digest
pub trait Signer {
    fn sign(&self, digest: &DigestSpec) -> Result<SignatureSpec>;
}

/// Checks a signature against its recorded digest
pub trait Verifier {
    fn verify(&self, signature: &Signature) -> Result<()>;
}

/// Raw hash bytes of a sha256 digest
fn hash_bytes(digest: &DigestSpec) -> Result<Vec<u8>> {
    if digest.hash_algorithm != SHA256 {
        return Err(Error::invalid(
            "digest",
            format!("unsupported hash algorithm '{}'", digest.hash_algorithm),
        ));
    }
    let bytes = hex::decode(&digest.value)
        .map_err(|e| Error::invalid("digest", format!("'{}': {e}", digest.value)))?;
    if bytes.len() != Sha256::output_size() {
        return Err(Error::invalid(
            "digest",
            format!("'{}' is not a sha256 value", digest.value),
        ));
    }
    Ok(bytes)
}

fn check_media_type(media_type: &str) -> Result<()> {
    match media_type {
        MEDIA_TYPE_RSA_SIGNATURE | MEDIA_TYPE_PEM => Ok(()),
        other => Err(Error::invalid(
            "signature media type",
            format!("'{other}' is not supported"),
        )),
    }
}

/// RSASSA-PKCS1-V1_5 signer over sha256 digests
pub struct RsaSigner {
    key: RsaPrivateKey,
    media_type: String,
}

impl RsaSigner {
    /// Signer for a PKCS#8 PEM private key, writing values of `media_type`
    pub fn from_pem(pem: &str, media_type: impl Into<String>) -> Result<Self> {
        let media_type = media_type.into();
        check_media_type(&media_type)?;
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::invalid("rsa private key", e.to_string()))?;
        Ok(Self { key, media_type })
    }

    pub fn from_file(path: &Path, media_type: impl Into<String>) -> Result<Self> {
        Self::from_pem(&std::fs::read_to_string(path)?, media_type)
    }
}

impl Signer for RsaSigner {
    fn sign(&self, digest: &DigestSpec) -> Result<SignatureSpec> {
        let signature = self
            .key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hash_bytes(digest)?)
            .map_err(|e| Error::invalid("rsa signature", e.to_string()))?;
        let value = if self.media_type == MEDIA_TYPE_PEM {
            encode_signature_pem(&signature)
        } else {
            hex::encode(&signature)
        };
        Ok(SignatureSpec {
            algorithm: RSA_PKCS1_V15.to_string(),
            value,
            media_type: self.media_type.clone(),
        })
    }
}

/// Verifies RSASSA-PKCS1-V1_5 signatures in either value encoding
pub struct RsaVerifier {
    key: RsaPublicKey,
}

impl RsaVerifier {
    /// Verifier for a PEM encoded public key (`PUBLIC KEY` block)
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| Error::invalid("rsa public key", e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }
}

impl Verifier for RsaVerifier {
    fn verify(&self, signature: &Signature) -> Result<()> {
        let what = format!("signature '{}'", signature.name);
        let spec = &signature.signature;
        if spec.algorithm != RSA_PKCS1_V15 {
            return Err(Error::invalid(
                what,
                format!("unsupported algorithm '{}'", spec.algorithm),
            ));
        }
        let value = match spec.media_type.as_str() {
            MEDIA_TYPE_RSA_SIGNATURE => {
                hex::decode(&spec.value).map_err(|e| Error::invalid(&what, e.to_string()))?
            }
            MEDIA_TYPE_PEM => decode_signature_pem(&spec.value)?,
            other => {
                return Err(Error::invalid(
                    what,
                    format!("unsupported media type '{other}'"),
                ))
            }
        };
        self.key
            .verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &hash_bytes(&signature.digest)?,
                &value,
            )
            .map_err(|e| Error::invalid(what, format!("verification failed: {e}")))
    }
}

/// One PEM block: label, headers and decoded content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    pub label: String,
    pub headers: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

fn encode_signature_pem(signature: &[u8]) -> String {
    let encoded = BASE64.encode(signature);
    let mut pem = format!(
        "-----BEGIN {SIGNATURE_PEM_BLOCK}-----\n{SIGNATURE_ALGORITHM_HEADER}: {RSA_PKCS1_V15}\n\n"
    );
    // base64 output is ascii
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {SIGNATURE_PEM_BLOCK}-----\n"));
    pem
}

/// Parse all PEM blocks of `input`; text between blocks is ignored
pub fn parse_pem(input: &str) -> Result<Vec<PemBlock>> {
    let invalid = |reason: &str| Error::invalid("pem", reason);
    let mut blocks = Vec::new();
    let mut lines = input.lines().map(str::trim_end);
    while let Some(line) = lines.next() {
        let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|l| l.strip_suffix("-----"))
        else {
            continue;
        };
        let end = format!("-----END {label}-----");
        let mut headers = BTreeMap::new();
        let mut body = String::new();
        let mut in_headers = true;
        let mut closed = false;
        for line in lines.by_ref() {
            if line == end {
                closed = true;
                break;
            }
            if in_headers {
                if line.is_empty() {
                    in_headers = false;
                    continue;
                }
                if let Some((key, value)) = line.split_once(':') {
                    headers.insert(key.trim().to_string(), value.trim().to_string());
                    continue;
                }
                in_headers = false;
            }
            body.push_str(line.trim());
        }
        if !closed {
            return Err(invalid(&format!("block '{label}' is not terminated")));
        }
        let data = BASE64
            .decode(body)
            .map_err(|e| invalid(&format!("block '{label}': {e}")))?;
        blocks.push(PemBlock {
            label: label.to_string(),
            headers,
            data,
        });
    }
    if blocks.is_empty() && !input.trim().is_empty() {
        return Err(invalid("no pem block found"));
    }
    Ok(blocks)
}

fn decode_signature_pem(value: &str) -> Result<Vec<u8>> {
    let invalid = |reason: String| Error::invalid("signature pem", reason);
    let mut blocks = parse_pem(value)?;
    if blocks.len() != 1 {
        return Err(invalid(format!(
            "expected one {SIGNATURE_PEM_BLOCK} block, found {}",
            blocks.len()
        )));
    }
    let block = blocks.remove(0);
    if block.label != SIGNATURE_PEM_BLOCK {
        return Err(invalid(format!("unexpected block '{}'", block.label)));
    }
    match block.headers.get(SIGNATURE_ALGORITHM_HEADER) {
        Some(algorithm) if algorithm == RSA_PKCS1_V15 => Ok(block.data),
        Some(algorithm) => Err(invalid(format!("unsupported algorithm '{algorithm}'"))),
        None => Err(invalid(format!(
            "missing '{SIGNATURE_ALGORITHM_HEADER}' header"
        ))),
    }
}

/// Sign the normalised descriptor and record the signature under `name`
///
/// A signature with the same name is replaced.
pub fn sign_descriptor(
    cd: &mut ComponentDescriptor,
    signer: &dyn Signer,
    name: &str,
) -> Result<()> {
    let digest = digest_descriptor(cd)?;
    let signature = signer.sign(&digest)?;
    cd.set_signature(Signature {
        name: name.to_string(),
        digest,
        signature,
    });
    tracing::info!("Signed {}:{} as '{}'", cd.name(), cd.version(), name);
    Ok(())
}

/// Check the signature named `name` and that it covers `cd` as it is now
pub fn verify_descriptor(
    cd: &ComponentDescriptor,
    verifier: &dyn Verifier,
    name: &str,
) -> Result<()> {
    let signature = cd.signature(name).ok_or_else(|| {
        Error::not_found(format!("signature '{name}' in {}", component_id(cd)))
    })?;
    verifier.verify(signature)?;
    let digest = digest_descriptor(cd)?;
    if digest != signature.digest {
        return Err(Error::invalid(
            format!("signature '{name}'"),
            format!(
                "signed digest {} does not match the descriptor digest {}",
                signature.digest.value, digest.value
            ),
        ));
    }
    tracing::debug!("Verified signature '{}' of {}:{}", name, cd.name(), cd.version());
    Ok(())
}

/// Digests computed for one descriptor, in element order
struct Computed {
    references: Vec<DigestSpec>,
    resources: Vec<Option<DigestSpec>>,
}

fn mismatch(what: String, expected: &DigestSpec, actual: &DigestSpec) -> Error {
    Error::invalid(
        what,
        format!(
            "calculated digest {} does not match existing digest {}",
            actual.value, expected.value
        ),
    )
}

/// Computes resource and component reference digests
///
/// Referenced components are resolved from the effective repository
/// context of the referencing descriptor.
pub struct Digester {
    resolver: Resolver,
    skip_access_types: HashSet<String>,
}

impl Digester {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            skip_access_types: HashSet::new(),
        }
    }

    /// Resources with these access types get the exclude digest
    pub fn with_skip_access_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_access_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the digest of every reference and every resource with content
    ///
    /// `blobs` serves the local blobs of `cd`. A digest that is already
    /// present must match the calculated one.
    pub async fn add_digests(
        &self,
        cd: &mut ComponentDescriptor,
        blobs: &dyn BlobResolver,
    ) -> Result<()> {
        let mut chain = vec![(cd.name().to_string(), cd.version().to_string())];
        self.digest_component(cd, blobs, &mut chain).await
    }

    /// Recalculate all digests of `cd` and compare them with the stored ones
    pub async fn check_digests(
        &self,
        cd: &ComponentDescriptor,
        blobs: &dyn BlobResolver,
    ) -> Result<()> {
        let mut chain = vec![(cd.name().to_string(), cd.version().to_string())];
        let computed = self.compute(cd, blobs, &mut chain).await?;
        let references = cd.component.component_references.iter();
        for (reference, digest) in references.zip(&computed.references) {
            let what = format!("component reference {}:{}", reference.name, reference.version);
            match &reference.digest {
                Some(existing) if existing == digest => {}
                Some(existing) => return Err(mismatch(what, existing, digest)),
                None => return Err(Error::invalid(what, "missing digest")),
            }
        }
        for (res, digest) in cd.component.resources.iter().zip(&computed.resources) {
            let what = format!("resource {}:{}", res.name, res.version);
            match (&res.digest, digest) {
                (Some(existing), Some(digest)) if existing != digest => {
                    return Err(mismatch(what, existing, digest))
                }
                (None, Some(_)) => return Err(Error::invalid(what, "missing digest")),
                (Some(_), None) => return Err(Error::invalid(what, "digest without access")),
                _ => {}
            }
        }
        tracing::debug!("Digests of {}:{} match", cd.name(), cd.version());
        Ok(())
    }

    async fn digest_component(
        &self,
        cd: &mut ComponentDescriptor,
        blobs: &dyn BlobResolver,
        chain: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for res in &mut cd.component.resources {
            let skipped = res
                .access
                .as_ref()
                .is_some_and(|a| self.skip_access_types.contains(a.object_type()));
            if skipped {
                tracing::info!(
                    "Excluding resource {}:{} of {}:{} from the signature",
                    res.name,
                    res.version,
                    cd.component.name,
                    cd.component.version
                );
                res.digest = Some(DigestSpec::exclude_from_signature());
            }
        }

        let computed = self.compute(cd, blobs, chain).await?;
        for (reference, digest) in cd
            .component
            .component_references
            .iter_mut()
            .zip(computed.references)
        {
            if let Some(existing) = &reference.digest {
                if *existing != digest {
                    let what =
                        format!("component reference {}:{}", reference.name, reference.version);
                    return Err(mismatch(what, existing, &digest));
                }
            }
            reference.digest = Some(digest);
        }
        for (res, digest) in cd.component.resources.iter_mut().zip(computed.resources) {
            let Some(digest) = digest else {
                continue;
            };
            if let Some(existing) = &res.digest {
                if *existing != digest {
                    let what = format!("resource {}:{}", res.name, res.version);
                    return Err(mismatch(what, existing, &digest));
                }
            }
            res.digest = Some(digest);
        }
        Ok(())
    }

    async fn compute(
        &self,
        cd: &ComponentDescriptor,
        blobs: &dyn BlobResolver,
        chain: &mut Vec<(String, String)>,
    ) -> Result<Computed> {
        let mut references = Vec::new();
        for reference in &cd.component.component_references {
            let ctx = cd.effective_repository_context().ok_or_else(|| {
                Error::invalid(
                    component_id(cd),
                    "no repository context to resolve component references from",
                )
            })?;
            references.push(self.reference_digest(ctx, reference, &mut *chain).await?);
        }
        let mut resources = Vec::new();
        for res in &cd.component.resources {
            resources.push(self.resource_digest(res, blobs).await?);
        }
        Ok(Computed {
            references,
            resources,
        })
    }

    fn reference_digest<'a>(
        &'a self,
        ctx: &'a UnstructuredTypedObject,
        reference: &'a ComponentReference,
        chain: &'a mut Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<DigestSpec>> + Send + 'a>> {
        Box::pin(async move {
            let key = (reference.component_name.clone(), reference.version.clone());
            if chain.contains(&key) {
                let mut names: Vec<String> =
                    chain.iter().map(|(n, v)| format!("{n}:{v}")).collect();
                names.push(format!("{}:{}", key.0, key.1));
                return Err(Error::CyclicReference { chain: names });
            }
            let (mut child, blobs) = self
                .resolver
                .resolve_with_blob_resolver(ctx, &key.0, &key.1)
                .await?;
            chain.push(key);
            let digested = self.digest_component(&mut child, blobs.as_ref(), &mut *chain).await;
            chain.pop();
            digested?;
            tracing::debug!("Digested referenced component {}:{}", child.name(), child.version());
            digest_descriptor(&child)
        })
    }

    /// Digest of a resource's content; `None` for resources without content
    pub async fn resource_digest(
        &self,
        res: &Resource,
        blobs: &dyn BlobResolver,
    ) -> Result<Option<DigestSpec>> {
        if let Some(digest) = res.digest.as_ref().filter(|d| d.is_excluded()) {
            return Ok(Some(digest.clone()));
        }
        let Some(access) = &res.access else {
            return Ok(None);
        };
        match access.object_type() {
            NONE_ACCESS_TYPE => Ok(None),
            OciRegistryAccess::TYPE => {
                let access: OciRegistryAccess = access.decode_into()?;
                let manifest = self
                    .resolver
                    .client()
                    .get_raw_manifest(&access.image_reference)
                    .await?;
                Ok(Some(DigestSpec::sha256(OCI_ARTIFACT_DIGEST_V1, &manifest.data)))
            }
            LocalOciBlobAccess::TYPE | LocalFilesystemBlobAccess::TYPE => {
                let staged = tempfile::NamedTempFile::new()?;
                let mut file = tokio::fs::File::from_std(staged.reopen()?);
                blobs.resolve(res, &mut file).await?;
                file.flush().await?;
                drop(file);

                let mut reader = tokio::fs::File::open(staged.path()).await?;
                let (digest, _) = copy_hashed(&mut reader, &mut tokio::io::sink()).await?;
                let (_, value) = parse_digest(&digest)?;
                Ok(Some(DigestSpec {
                    hash_algorithm: SHA256.to_string(),
                    normalisation_algorithm: GENERIC_BLOB_DIGEST_V1.to_string(),
                    value: value.to_string(),
                }))
            }
            other => Err(Error::invalid(
                format!("resource {}:{}", res.name, res.version),
                format!("access type '{other}' cannot be digested"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const KEY: &str = include_str!("../tests/fixtures/signing/rsa_key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/signing/rsa_pub.pem");
    const OTHER_PUBLIC_KEY: &str = include_str!("../tests/fixtures/signing/other_pub.pem");

    fn digest(normalisation: &str, value: &str) -> DigestSpec {
        DigestSpec {
            hash_algorithm: SHA256.to_string(),
            normalisation_algorithm: normalisation.to_string(),
            value: value.repeat(32),
        }
    }

    fn digested() -> ComponentDescriptor {
        let mut cd = ComponentDescriptor::new("example.com/comp", "v1.0.0");
        cd.component.provider = "acme".to_string();

        let mut img = Resource::new("img", "1.0.0", "ociImage", ResourceRelation::External);
        img.extra_identity.insert("os".to_string(), "linux".to_string());
        img.extra_identity.insert("arch".to_string(), "amd64".to_string());
        img.access = Some(
            UnstructuredTypedObject::new(&OciRegistryAccess {
                image_reference: "r1.example.com/img:1.0.0".to_string(),
            })
            .unwrap(),
        );
        img.digest = Some(digest(OCI_ARTIFACT_DIGEST_V1, "cd"));
        cd.component.resources.push(img);
        cd.component.resources.push(Resource::new(
            "docs",
            "v1.0.0",
            "plain",
            ResourceRelation::Local,
        ));

        cd.component.component_references.push(ComponentReference {
            name: "child".to_string(),
            component_name: "example.com/child".to_string(),
            version: "v2.0.0".to_string(),
            extra_identity: Identity::new(),
            labels: vec![],
            digest: Some(digest(JSON_NORMALISATION_V1, "ab")),
        });
        cd
    }

    #[test]
    fn test_normalised_form() {
        let ab = "ab".repeat(32);
        let cd = "cd".repeat(32);
        let expected = format!(
            concat!(
                r#"[{{"component":[{{"componentReferences":[[{{"componentName":"example.com/child"}},"#,
                r#"{{"digest":[{{"hashAlgorithm":"sha256"}},{{"normalisationAlgorithm":"jsonNormalisation/v1"}},{{"value":"{ab}"}}]}},"#,
                r#"{{"extraIdentity":null}},{{"name":"child"}},{{"version":"v2.0.0"}}]]}},"#,
                r#"{{"name":"example.com/comp"}},{{"provider":"acme"}},"#,
                r#"{{"resources":[[{{"digest":[{{"hashAlgorithm":"sha256"}},{{"normalisationAlgorithm":"ociArtifactDigest/v1"}},{{"value":"{cd}"}}]}},"#,
                r#"{{"extraIdentity":[{{"arch":"amd64"}},{{"os":"linux"}}]}},{{"name":"img"}},{{"relation":"external"}},{{"type":"ociImage"}},{{"version":"1.0.0"}}],"#,
                r#"[{{"extraIdentity":null}},{{"name":"docs"}},{{"relation":"local"}},{{"type":"plain"}},{{"version":"v1.0.0"}}]]}},"#,
                r#"{{"version":"v1.0.0"}}]}},{{"meta":[{{"schemaVersion":"v2"}}]}}]"#,
            ),
            ab = ab,
            cd = cd,
        );
        let normalised = String::from_utf8(normalise(&digested()).unwrap()).unwrap();
        assert_eq!(normalised, expected);
        assert_eq!(
            digest_descriptor(&digested()).unwrap(),
            DigestSpec {
                hash_algorithm: SHA256.to_string(),
                normalisation_algorithm: JSON_NORMALISATION_V1.to_string(),
                value: "8ab046f05d86f4fd5127872e4524c8347747ce0d9e685c68b8f543b7dcb58e68"
                    .to_string(),
            }
        );
    }

    #[test]
    fn test_unsigned_parts_do_not_change_digest() {
        let base = digest_descriptor(&digested()).unwrap();
        let mut cd = digested();
        cd.component.labels.push(crate::descriptor::Label {
            name: "team".to_string(),
            value: serde_json::json!("a"),
        });
        cd.inject_repository_context(
            crate::descriptor::oci_repository_context("r1.example.com").unwrap(),
        );
        assert_eq!(digest_descriptor(&cd).unwrap(), base);

        cd.component.resources[0].version = "1.0.1".to_string();
        assert_ne!(digest_descriptor(&cd).unwrap(), base);
    }

    #[test]
    fn test_not_normalisable() {
        let mut cd = digested();
        cd.component.component_references[0].digest = None;
        let err = normalise(&cd).unwrap_err();
        assert!(err.to_string().contains("missing digest in component reference"));

        let mut cd = digested();
        cd.component.resources[0].digest = None;
        let err = normalise(&cd).unwrap_err();
        assert!(err.to_string().contains("missing digest in resource img"));

        let mut cd = digested();
        cd.component.resources[1].digest = Some(digest(GENERIC_BLOB_DIGEST_V1, "ef"));
        let err = normalise(&cd).unwrap_err();
        assert!(err.to_string().contains("digest without access"));

        let mut cd = digested();
        cd.component.resources[1].access =
            Some(UnstructuredTypedObject::from_parts(NONE_ACCESS_TYPE, Map::new()));
        assert!(normalise(&cd).is_ok());
    }

    #[test]
    fn test_sign_and_verify() {
        for media_type in [MEDIA_TYPE_RSA_SIGNATURE, MEDIA_TYPE_PEM] {
            let mut cd = digested();
            let signer = RsaSigner::from_pem(KEY, media_type).unwrap();
            sign_descriptor(&mut cd, &signer, "release").unwrap();

            let signature = cd.signature("release").unwrap();
            assert_eq!(signature.signature.media_type, media_type);
            assert_eq!(signature.signature.algorithm, RSA_PKCS1_V15);
            assert_eq!(signature.digest, digest_descriptor(&cd).unwrap());

            let verifier = RsaVerifier::from_pem(PUBLIC_KEY).unwrap();
            verify_descriptor(&cd, &verifier, "release").unwrap();
        }
    }

    #[test]
    fn test_pem_signature_layout() {
        let mut cd = digested();
        sign_descriptor(&mut cd, &RsaSigner::from_pem(KEY, MEDIA_TYPE_PEM).unwrap(), "s").unwrap();
        let value = &cd.signature("s").unwrap().signature.value;
        assert!(value.starts_with(
            "-----BEGIN SIGNATURE-----\nSignature Algorithm: RSASSA-PKCS1-V1_5\n\n"
        ));
        assert!(value.ends_with("-----END SIGNATURE-----\n"));

        let blocks = parse_pem(value).unwrap();
        assert_eq!(blocks.len(), 1);
        // 1024 bit key
        assert_eq!(blocks[0].data.len(), 128);
    }

    #[test]
    fn test_resign_replaces_signature() {
        let mut cd = digested();
        let signer = RsaSigner::from_pem(KEY, MEDIA_TYPE_RSA_SIGNATURE).unwrap();
        sign_descriptor(&mut cd, &signer, "release").unwrap();
        sign_descriptor(&mut cd, &signer, "release").unwrap();
        sign_descriptor(&mut cd, &signer, "audit").unwrap();
        let names: Vec<_> = cd.signatures.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["release", "audit"]);
    }

    #[test]
    fn test_verify_rejects_changed_descriptor() {
        let mut cd = digested();
        let signer = RsaSigner::from_pem(KEY, MEDIA_TYPE_RSA_SIGNATURE).unwrap();
        sign_descriptor(&mut cd, &signer, "release").unwrap();
        cd.component.resources[0].digest = Some(digest(OCI_ARTIFACT_DIGEST_V1, "ee"));

        let verifier = RsaVerifier::from_pem(PUBLIC_KEY).unwrap();
        let err = verify_descriptor(&cd, &verifier, "release").unwrap_err();
        assert!(err.to_string().contains("does not match the descriptor digest"));
    }

    #[test]
    fn test_verify_rejects_forged_digest() {
        let mut cd = digested();
        let signer = RsaSigner::from_pem(KEY, MEDIA_TYPE_RSA_SIGNATURE).unwrap();
        sign_descriptor(&mut cd, &signer, "release").unwrap();
        cd.signatures[0].digest.value = "00".repeat(32);

        let verifier = RsaVerifier::from_pem(PUBLIC_KEY).unwrap();
        let err = verify_descriptor(&cd, &verifier, "release").unwrap_err();
        assert!(err.to_string().contains("verification failed"));
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let mut cd = digested();
        let signer = RsaSigner::from_pem(KEY, MEDIA_TYPE_PEM).unwrap();
        sign_descriptor(&mut cd, &signer, "release").unwrap();

        let verifier = RsaVerifier::from_pem(OTHER_PUBLIC_KEY).unwrap();
        assert!(verify_descriptor(&cd, &verifier, "release").is_err());
    }

    #[test]
    fn test_verify_missing_signature() {
        let verifier = RsaVerifier::from_pem(PUBLIC_KEY).unwrap();
        let err = verify_descriptor(&digested(), &verifier, "release").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_signer_rejects_bad_input() {
        assert!(RsaSigner::from_pem(KEY, "text/plain").is_err());
        assert!(RsaSigner::from_pem(PUBLIC_KEY, MEDIA_TYPE_PEM).is_err());
        assert!(RsaVerifier::from_pem(KEY).is_err());

        let signer = RsaSigner::from_pem(KEY, MEDIA_TYPE_PEM).unwrap();
        let mut md5 = digest(JSON_NORMALISATION_V1, "ab");
        md5.hash_algorithm = "md5".to_string();
        assert!(signer.sign(&md5).is_err());
    }

    #[test]
    fn test_parse_pem() {
        let pem = "junk\n-----BEGIN SIGNATURE-----\nA: b\n\naGVs\nbG8=\n-----END SIGNATURE-----\n";
        let blocks = parse_pem(pem).unwrap();
        assert_eq!(blocks[0].label, "SIGNATURE");
        assert_eq!(blocks[0].headers.get("A").map(String::as_str), Some("b"));
        assert_eq!(blocks[0].data, b"hello");

        assert!(parse_pem("-----BEGIN SIGNATURE-----\naGVsbG8=\n").is_err());
        assert!(parse_pem("not pem").is_err());
        assert!(parse_pem("").unwrap().is_empty());
    }

    #[test]
    fn test_exclude_digest() {
        let excluded = DigestSpec::exclude_from_signature();
        assert!(excluded.is_excluded());
        assert_eq!(excluded.hash_algorithm, "NO-DIGEST");
        assert_eq!(excluded.normalisation_algorithm, "EXCLUDE-FROM-SIGNATURE");
        assert!(!digest(GENERIC_BLOB_DIGEST_V1, "ab").is_excluded());
    }
}
