//! Local packaging workflow.
//!
//! `pull` unpacks an artifact into a working directory: every layer archive is
//! kept under `.image/layers`, the first one also under `.image/base`, and the
//! merged template tree is written to the root. `push` compares the root with
//! the base layer, archives the difference as a new layer and pushes
//! `[base, diff]`.

use std::path::Path;
use std::sync::Arc;

use fhir_templates_core::error::{ArtifactError, Result};
use tokio_util::sync::CancellationToken;

use super::fs::OverlayFileSystem;
use super::layer::{FileSet, Layer};
use super::operator;
use crate::oci::{ArtifactReference, RegistryArtifactProvider};

/// Summary of a completed pull.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub manifest_digest: String,
    pub layers: usize,
    /// Number of files in the merged tree
    pub files: usize,
}

/// Summary of a completed push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub manifest_digest: String,
    /// Layers in the pushed artifact
    pub layers: usize,
    /// Sequence number of the generated diff layer, if there was one
    pub diff_sequence_number: Option<i64>,
}

/// Pulls artifacts into, and pushes them from, working directories.
pub struct ArtifactManager {
    provider: Arc<RegistryArtifactProvider>,
}

impl ArtifactManager {
    pub fn new(provider: Arc<RegistryArtifactProvider>) -> Self {
        Self { provider }
    }

    /// Pull `reference` and unpack it under `root`.
    ///
    /// Nothing is written when the pull, extraction or cancellation check fails.
    pub async fn pull(
        &self,
        reference: &ArtifactReference,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<PullOutcome> {
        let full_ref = reference.full_reference();
        let artifact = self.provider.get_artifact(reference, cancel).await?;

        let mut sets = Vec::with_capacity(artifact.layers.len());
        for layer in &artifact.layers {
            if cancel.is_cancelled() {
                return Err(ArtifactError::Cancelled(full_ref));
            }
            sets.push(operator::extract_layer(layer)?);
        }
        let merged = operator::merge(&operator::sort_layers(sets));

        if cancel.is_cancelled() {
            return Err(ArtifactError::Cancelled(full_ref));
        }
        let fs = OverlayFileSystem::new(root);
        fs.write_layers(&artifact.layers)?;
        match artifact.layers.first() {
            Some(base) => fs.write_base_layer(base)?,
            None => fs.clear_base()?,
        }
        fs.write_merged(&merged)?;

        tracing::info!(
            reference = %full_ref,
            root = %root.display(),
            layers = artifact.layers.len(),
            files = merged.len(),
            "Unpacked artifact"
        );

        Ok(PullOutcome {
            manifest_digest: artifact.manifest_digest,
            layers: artifact.layers.len(),
            files: merged.len(),
        })
    }

    /// Pack the template tree under `root` and push it as `reference`.
    ///
    /// The pushed artifact holds the base layer (when one exists) followed by a
    /// diff layer with every local change. An unchanged tree pushes the base
    /// layer alone.
    pub async fn push(
        &self,
        reference: &ArtifactReference,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let full_ref = reference.full_reference();
        let fs = OverlayFileSystem::new(root);

        let current = fs.read_merged()?;
        let base = fs.read_base_layer()?;
        let snapshot: Option<FileSet> = if base.is_empty_sentinel() {
            None
        } else {
            Some(operator::extract_layer(&base)?)
        };

        let diff = match operator::generate_diff(&current, snapshot.as_ref()) {
            Some(diff) => Some(operator::archive_layer(&diff)?),
            None => None,
        };
        let diff_sequence_number = diff.as_ref().map(|d| d.sequence_number);

        let mut layers: Vec<Layer> = Vec::with_capacity(2);
        if !base.is_empty_sentinel() {
            layers.push(base);
        }
        match diff {
            Some(diff) => layers.push(diff),
            None => tracing::info!(reference = %full_ref, "No local changes, pushing base layer only"),
        }
        if layers.is_empty() {
            return Err(ArtifactError::Overlay(format!(
                "Nothing to push from {}: no base layer and no templates",
                root.display()
            )));
        }

        let manifest_digest = self
            .provider
            .push_artifact(reference, &layers, cancel)
            .await?;
        fs.write_layers(&layers)?;

        tracing::info!(
            reference = %full_ref,
            digest = %manifest_digest,
            layers = layers.len(),
            "Packed and pushed artifact"
        );

        Ok(PushOutcome {
            manifest_digest,
            layers: layers.len(),
            diff_sequence_number,
        })
    }
}
