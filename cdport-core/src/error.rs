//! Error types shared by every layer of the transport engine
//!
//! Lower layers return these typed errors without logging or retrying.
//! Only the copier retries, and only errors for which
//! [`Error::is_retryable`] returns true.

use thiserror::Error;

/// Coarse classification of an [`Error`], for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Transport,
    Conflict,
    CyclicReference,
    Io,
}

/// Errors produced by descriptor handling, resolution and transport
#[derive(Error, Debug)]
pub enum Error {
    /// A component, blob or manifest could not be found
    #[error("not found: {0}")]
    NotFound(String),

    /// A descriptor, resource, identity or wire document failed validation
    #[error("invalid {what}: {reason}")]
    Invalid { what: String, reason: String },

    /// A registry or network operation failed
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Something already exists and overwriting was not requested
    #[error("conflict: {0}")]
    Conflict(String),

    /// Recursive traversal reached a component that is already being processed
    #[error("cyclic component reference: {}", .chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Invalid {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invalid { .. } => ErrorKind::Invalid,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::CyclicReference { .. } => ErrorKind::CyclicReference,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether the copier's retry wrapper may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Io)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::invalid("json document", err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for Error {
    fn from(err: serde_yaml_ng::Error) -> Self {
        Error::invalid("yaml document", err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::transport_with("http request failed", err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_retryability() {
        assert!(Error::transport("boom").is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!Error::invalid("descriptor", "bad name").is_retryable());
        assert!(!Error::Conflict("exists".into()).is_retryable());
        assert!(Error::not_found("x").is_not_found());
    }

    #[test]
    fn test_cyclic_reference_message() {
        let err = Error::CyclicReference {
            chain: vec!["a:1".into(), "b:1".into(), "a:1".into()],
        };
        assert_eq!(err.to_string(), "cyclic component reference: a:1 -> b:1 -> a:1");
    }
}
