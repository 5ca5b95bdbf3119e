//! Template artifact reference parsing.
//!
//! Parses references like `example.azurecr.io/templates/hl7v2:v1.0` into structured
//! components. Unlike container image references there is no default registry:
//! the registry segment before the first `/` is mandatory.

use fhir_templates_core::error::{ArtifactError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use super::digest;

/// Label used when neither tag nor digest is given.
const DEFAULT_TAG: &str = "latest";

/// Short names of the bundled template sets.
pub const DEFAULT_TEMPLATE_ALIASES: &[&str] = &[
    "microsofthealth/fhirconverter:default",
    "microsofthealth/hl7v2templates:default",
    "microsofthealth/ccdatemplates:default",
    "microsofthealth/jsontemplates:default",
    "microsofthealth/stu3tor4templates:default",
    "microsofthealth/fhirtohl7v2templates:default",
];

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
        .expect("valid name regex")
});

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"));

/// Parsed template artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactReference {
    /// Registry hostname, optionally with port (e.g., "example.azurecr.io", "localhost:5000")
    pub registry: String,
    /// Repository path inside the registry (e.g., "templates/hl7v2")
    pub name: String,
    /// Tag (e.g., "v1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ArtifactReference {
    /// Parse a reference string.
    ///
    /// Supports formats:
    /// - `registry.io/name` → tag `latest`
    /// - `registry.io/org/name:v1`
    /// - `registry.io/name@sha256:<hex>`
    /// - `registry.io:5000/name:v1@sha256:<hex>` (digest wins)
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let invalid = |reason: &str| ArtifactError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }

        // Registry ends at the first '/'
        let slash_pos = reference
            .find('/')
            .ok_or_else(|| invalid("missing registry delimiter '/'"))?;
        if slash_pos == 0 {
            return Err(invalid("registry is empty"));
        }
        if slash_pos == reference.len() - 1 {
            return Err(invalid("repository name is empty"));
        }
        let registry = &reference[..slash_pos];
        let remainder = &reference[slash_pos + 1..];

        // Split off digest first (@ separator)
        let (name_tag, digest) = match remainder.rfind('@') {
            Some(at_pos) => {
                let digest_part = &remainder[at_pos + 1..];
                if digest_part.is_empty() {
                    return Err(invalid("digest delimiter '@' is not followed by a digest"));
                }
                if !digest::is_well_formed(digest_part) {
                    return Err(invalid("digest must have the form algorithm:hex"));
                }
                (&remainder[..at_pos], Some(digest_part.to_string()))
            }
            None => (remainder, None),
        };

        // Tag follows the last ':' after the last '/'
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon_pos) => {
                let colon_pos = last_segment_start + colon_pos;
                let tag = &name_tag[colon_pos + 1..];
                if tag.is_empty() {
                    return Err(invalid("tag delimiter ':' is not followed by a tag"));
                }
                if !TAG_PATTERN.is_match(tag) {
                    return Err(invalid("tag contains invalid characters"));
                }
                (&name_tag[..colon_pos], Some(tag.to_string()))
            }
            None => (name_tag, None),
        };

        if !NAME_PATTERN.is_match(name) {
            return Err(invalid(
                "repository name must be lowercase alphanumerics separated by single '.', '_', '-' or '/'",
            ));
        }

        Ok(ArtifactReference {
            registry: registry.to_string(),
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// Check whether a reference string parses, without surfacing the error.
    pub fn is_valid(reference: &str) -> bool {
        Self::parse(reference).is_ok()
    }

    /// Check whether `reference` names one of the bundled template sets.
    ///
    /// Matching is case-insensitive and independent of [`ArtifactReference::parse`].
    pub fn is_default_alias(reference: &str) -> bool {
        let reference = reference.trim();
        DEFAULT_TEMPLATE_ALIASES
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(reference))
    }

    /// The authoritative label: digest if present, else tag, else `latest`.
    pub fn label(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Whether the reference is pinned to immutable content.
    pub fn is_digest_addressed(&self) -> bool {
        self.digest.is_some()
    }

    /// `registry/name`, without label.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.registry, self.name)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Copy of this reference pinned to `digest`, keeping the tag for display.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ArtifactReference {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
