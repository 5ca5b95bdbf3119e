//! Content digest helpers.
//!
//! Digests are rendered as `algorithm:hex`. Only SHA-256 is computed, but any
//! algorithm name is recognized when scanning or validating.

use fhir_templates_core::error::{ArtifactError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Algorithm prefix used for every computed digest.
pub const SHA256_PREFIX: &str = "sha256:";

static DIGEST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}").expect("valid digest regex")
});

static WELL_FORMED_DIGEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("valid digest regex")
});

/// Compute the SHA-256 digest of `data` as `sha256:<hex>`.
pub fn compute(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{}{}", SHA256_PREFIX, hex::encode(hash))
}

/// Find every `algorithm:hex` digest in free text, in order of appearance.
///
/// Used to recover digests printed by the packaging tool.
pub fn extract_all(text: &str) -> Vec<String> {
    DIGEST_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Check whether `digest` has the `algorithm:hex` shape.
pub fn is_well_formed(digest: &str) -> bool {
    WELL_FORMED_DIGEST.is_match(digest)
}

/// Verify that `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: &str) -> Result<()> {
    let actual = compute(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ArtifactError::Integrity {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Hex part of a digest, without the algorithm prefix.
pub fn hex_part(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}
