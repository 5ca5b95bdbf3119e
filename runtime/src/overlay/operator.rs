//! Overlay algorithm over layer file sets.
//!
//! All functions are pure transforms: inputs are never mutated and every result
//! is a new [`FileSet`] or [`Layer`].
//!
//! # Layer metadata
//!
//! A layer produced by [`generate_diff`] carries a JSON document at
//! [`METADATA_PATH`]:
//!
//! ```text
//! { "sequenceNumber": 2,
//!   "fileDigests": { "ADT_A01.liquid": "sha256:..." },
//!   "signature": null }
//! ```
//!
//! `fileDigests` covers every path of the full template tree at the time the
//! layer was generated, so the next diff can be computed from the metadata
//! alone.

use std::collections::{BTreeMap, BTreeSet};

use fhir_templates_core::error::{ArtifactError, Result};
use serde::{Deserialize, Serialize};

use super::layer::{layer_file_name, FileSet, Layer, LayerContent, UNKNOWN_SEQUENCE};
use crate::oci::{archive, digest};

/// Reserved path of the overlay metadata document inside a layer.
pub const METADATA_PATH: &str = ".image/overlay-metadata.json";

/// Overlay metadata document stored in each generated layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMetadata {
    pub sequence_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_digests: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Move the metadata document out of `files` and apply it.
///
/// Without a metadata document the sequence number is `-1` (unknown).
pub fn extract_metadata(mut files: FileSet, layer: &str) -> Result<FileSet> {
    match files.files.remove(METADATA_PATH) {
        Some(Some(document)) => {
            let metadata: OverlayMetadata =
                serde_json::from_slice(&document).map_err(|e| ArtifactError::Metadata {
                    layer: layer.to_string(),
                    message: format!("Failed to parse {}: {}", METADATA_PATH, e),
                })?;
            files.sequence_number = metadata.sequence_number;
            files.file_digests = metadata.file_digests;
        }
        Some(None) => {
            return Err(ArtifactError::Metadata {
                layer: layer.to_string(),
                message: format!("{} is recorded as deleted", METADATA_PATH),
            });
        }
        None => {
            files.sequence_number = UNKNOWN_SEQUENCE;
            files.file_digests = None;
        }
    }
    Ok(files)
}

/// Order layers by ascending sequence number (base first).
///
/// Layers with an unknown sequence number sort before every numbered layer:
/// a layer without overlay metadata can only be a hand-authored base. The sort
/// is stable, so layers with equal numbers keep their input order.
pub fn sort_layers(mut layers: Vec<FileSet>) -> Vec<FileSet> {
    layers.sort_by_key(|layer| sort_key(layer.sequence_number));
    layers
}

fn sort_key(sequence_number: i64) -> i64 {
    if sequence_number < 0 {
        i64::MIN
    } else {
        sequence_number
    }
}

/// Flatten sorted layers into a single tombstone-free file set.
///
/// Layers are visited from highest to lowest. The first (highest) version of a
/// path wins, and a tombstone masks the path in every lower layer.
pub fn merge(sorted_layers: &[FileSet]) -> FileSet {
    let mut merged = FileSet::new();
    let mut removed: BTreeSet<&str> = BTreeSet::new();

    for layer in sorted_layers.iter().rev() {
        let mut pending_removed = Vec::new();
        for (path, content) in &layer.files {
            match content {
                None => pending_removed.push(path.as_str()),
                Some(bytes) => {
                    if !merged.contains(path) && !removed.contains(path.as_str()) {
                        merged.insert_file(path.clone(), bytes.clone());
                    }
                }
            }
        }
        removed.extend(pending_removed);
    }

    merged.sequence_number = sorted_layers.len() as i64;
    merged
}

/// Compute the layer that turns `snapshot` into `current`.
///
/// Returns `None` when nothing was added, changed or removed; callers must not
/// push an empty layer.
pub fn generate_diff(current: &FileSet, snapshot: Option<&FileSet>) -> Option<FileSet> {
    let mut remaining: BTreeMap<String, String> = match snapshot {
        Some(snapshot) => snapshot_digests(snapshot),
        None => BTreeMap::new(),
    };

    let mut diff = FileSet::new();
    let mut current_digests = BTreeMap::new();

    for (path, content) in current.contents() {
        let content_digest = digest::compute(content);
        match remaining.remove(path) {
            Some(previous) if previous == content_digest => {}
            _ => diff.insert_file(path, content),
        }
        current_digests.insert(path.to_string(), content_digest);
    }

    for path in remaining.into_keys() {
        diff.insert_tombstone(path);
    }

    if diff.is_empty() {
        return None;
    }

    diff.sequence_number = match snapshot {
        Some(snapshot) => snapshot.sequence_number.max(0) + 1,
        None => 1,
    };
    diff.file_digests = Some(current_digests);

    tracing::debug!(
        sequence_number = diff.sequence_number,
        changed = diff.contents().count(),
        removed = diff.files.values().filter(|c| c.is_none()).count(),
        "Generated diff layer"
    );

    Some(diff)
}

/// Path → digest view of a snapshot, preferring its recorded metadata.
fn snapshot_digests(snapshot: &FileSet) -> BTreeMap<String, String> {
    match &snapshot.file_digests {
        Some(digests) => digests.clone(),
        None => snapshot
            .contents()
            .map(|(path, content)| (path.to_string(), digest::compute(content)))
            .collect(),
    }
}

/// Compress a file set into a layer blob.
///
/// Tombstones are written as whiteout entries and the sequence number and
/// digests as the metadata document.
pub fn archive_layer(files: &FileSet) -> Result<Layer> {
    let file_name = layer_file_name(files.sequence_number);

    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut deleted = BTreeSet::new();
    for (path, content) in &files.files {
        match content {
            Some(bytes) => {
                entries.insert(path.clone(), bytes.clone());
            }
            None => {
                deleted.insert(path.clone());
            }
        }
    }

    if files.sequence_number != UNKNOWN_SEQUENCE || files.file_digests.is_some() {
        let metadata = OverlayMetadata {
            sequence_number: files.sequence_number,
            file_digests: files.file_digests.clone(),
            signature: None,
        };
        entries.insert(METADATA_PATH.to_string(), serde_json::to_vec(&metadata)?);
    }

    let data = archive::archive_with_deletions(&entries, &deleted, &file_name)?;
    let mut layer = Layer::from_raw(data).with_file_name(file_name);
    layer.sequence_number = files.sequence_number;
    Ok(layer)
}

/// Compress several file sets, preserving their order.
pub fn archive_layers(sets: &[FileSet]) -> Result<Vec<Layer>> {
    sets.iter().map(archive_layer).collect()
}

/// Decompress a raw layer and apply its metadata.
pub fn extract_layer(layer: &Layer) -> Result<FileSet> {
    let name = layer.describe();
    match &layer.content {
        LayerContent::Raw(data) => {
            let files = archive::extract(data, &name)?;
            extract_metadata(files, &name)
        }
        LayerContent::Files(files) => Ok(files.clone()),
        LayerContent::Templates(_) => Err(ArtifactError::Archive {
            layer: name,
            message: "expected a raw or extracted layer, found parsed templates".to_string(),
        }),
    }
}

/// Decompress several layers, preserving their order.
pub fn extract_layers(layers: &[Layer]) -> Result<Vec<FileSet>> {
    layers.iter().map(extract_layer).collect()
}
