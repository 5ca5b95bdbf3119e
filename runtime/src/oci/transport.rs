//! Registry transport seam.
//!
//! The engine talks to registries only through [`RegistryTransport`]. The
//! native client ([`super::registry::OciRegistryTransport`]) and the subprocess
//! client ([`super::oras::OrasTransport`]) are interchangeable implementations;
//! everything above this trait is oblivious to which one is in use.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::digest;

/// Classified transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    /// Network-level failure worth retrying
    Transient,
    Other,
}

/// Failure reported by a registry transport.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Classify an HTTP-style status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 => TransportErrorKind::Unauthorized,
            403 => TransportErrorKind::Forbidden,
            404 => TransportErrorKind::NotFound,
            408 | 429 | 500..=599 => TransportErrorKind::Transient,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, message)
    }

    /// Classify a free-form failure message, as printed by registry tools.
    ///
    /// Digests are removed before matching, so hex runs inside them cannot
    /// pass for status codes. A standalone status code decides first, then
    /// keywords.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut text = message.to_ascii_lowercase();
        for found in digest::extract_all(&text) {
            text = text.replace(&found, "");
        }

        let status = STATUS_CODE
            .captures_iter(&text)
            .filter_map(|c| c[1].parse::<u16>().ok())
            .next();
        if let Some(status) = status {
            return Self::from_status(status, message);
        }

        let kind = if text.contains("unauthorized") || text.contains("authentication required") {
            TransportErrorKind::Unauthorized
        } else if text.contains("forbidden") || text.contains("denied") {
            TransportErrorKind::Forbidden
        } else if TRANSIENT_MARKERS.iter().any(|m| text.contains(m)) {
            TransportErrorKind::Transient
        } else if NOT_FOUND_MARKERS.iter().any(|m| text.contains(m)) {
            TransportErrorKind::NotFound
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == TransportErrorKind::Transient
    }
}

/// A 4xx/5xx code standing alone: not part of a port, address, path or word.
static STATUS_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s(\[,;=])([45][0-9]{2})(?:$|[\s)\],;:])").expect("valid status regex")
});

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "broken pipe",
    "unexpected eof",
    "temporarily unavailable",
    "temporary failure in name resolution",
    "too many requests",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "manifest unknown",
    "blob unknown",
    "name unknown",
];

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Pull and push primitives of a registry client.
///
/// `repository` is `registry/name`; `label` is a tag or a digest.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch the raw manifest document.
    async fn pull_manifest(&self, repository: &str, label: &str) -> TransportResult<Vec<u8>>;

    /// Fetch a blob by digest.
    async fn pull_blob(&self, repository: &str, digest: &str) -> TransportResult<Vec<u8>>;

    /// Upload a blob under its digest.
    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> TransportResult<()>;

    /// Upload a manifest under `tag`, returning the manifest digest.
    async fn push_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &[u8],
    ) -> TransportResult<String>;
}
