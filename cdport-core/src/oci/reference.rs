//! OCI image references: `host[:port]/repository[:tag][@digest]`

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const DOCKER_HUB_HOST: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub host: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::invalid(format!("oci reference '{input}'"), reason);

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (input, None),
        };

        // a tag colon only counts after the last path separator
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (
                &rest[..last_slash + i],
                Some(rest[last_slash + i + 1..].to_string()),
            ),
            None => (rest, None),
        };

        let (host, repository) = match name.split_once('/') {
            Some((first, path)) if is_host(first) => (first.to_string(), path.to_string()),
            Some(_) => (DOCKER_HUB_HOST.to_string(), name.to_string()),
            None => (DOCKER_HUB_HOST.to_string(), format!("library/{name}")),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path segment"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository must be lowercase"));
        }
        if matches!(&tag, Some(t) if t.is_empty()) {
            return Err(invalid("empty tag"));
        }
        if matches!(&digest, Some(d) if !d.contains(':')) {
            return Err(invalid("malformed digest"));
        }

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            host,
            repository,
            tag,
            digest,
        })
    }

    /// `host/repository` without tag or digest
    pub fn name(&self) -> String {
        format!("{}/{}", self.host, self.repository)
    }

    /// Digest if present, tag otherwise; what a manifest is addressed by
    pub fn locator(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            digest: None,
            ..self.clone()
        }
    }

    /// Same repository, pinned to `digest`
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            tag: None,
            digest: Some(digest.into()),
            ..self.clone()
        }
    }
}

fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
