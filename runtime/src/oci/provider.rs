//! Registry artifact provider.
//!
//! Pulls manifests and layer blobs through a [`RegistryTransport`], verifying
//! every blob against its digest, enforcing the artifact size ceiling, retrying
//! transient failures and honouring cancellation. Also pushes packaged layers
//! back as a new artifact.

use std::sync::Arc;

use fhir_templates_core::config::EngineConfig;
use fhir_templates_core::error::{ArtifactError, AuthFailure, Result};
use tokio_util::sync::CancellationToken;

use super::digest;
use super::manifest::{Manifest, EMPTY_CONFIG};
use super::reference::ArtifactReference;
use super::retry::{RetryFailure, RetryPolicy};
use super::transport::{RegistryTransport, TransportErrorKind};
use crate::overlay::{Layer, LayerContent, UNKNOWN_SEQUENCE};

/// A verified blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBlob {
    pub digest: String,
    pub size: u64,
    pub data: Vec<u8>,
}

impl ArtifactBlob {
    /// Wrap as a compressed layer.
    pub fn into_layer(self) -> Layer {
        Layer {
            digest: Some(self.digest),
            size: self.size,
            sequence_number: UNKNOWN_SEQUENCE,
            file_name: None,
            content: LayerContent::Raw(self.data),
        }
    }
}

/// Manifest plus every layer, in manifest order.
#[derive(Debug, Clone)]
pub struct PulledArtifact {
    pub manifest: Manifest,
    /// Digest of the manifest document
    pub manifest_digest: String,
    /// Compressed layers; index 0 is the base layer
    pub layers: Vec<Layer>,
}

/// Pulls and pushes template artifacts.
pub struct RegistryArtifactProvider {
    transport: Arc<dyn RegistryTransport>,
    retry: RetryPolicy,
    max_artifact_size: u64,
}

impl RegistryArtifactProvider {
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        retry: RetryPolicy,
        max_artifact_size: u64,
    ) -> Self {
        Self {
            transport,
            retry,
            max_artifact_size,
        }
    }

    /// Build a provider with the retry policy and size ceiling from `config`.
    pub fn from_config(transport: Arc<dyn RegistryTransport>, config: &EngineConfig) -> Self {
        Self::new(
            transport,
            RetryPolicy::from_config(&config.retry),
            config.max_artifact_size_bytes,
        )
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_artifact_size(&self) -> u64 {
        self.max_artifact_size
    }

    /// Pull and validate the manifest of `reference`.
    ///
    /// For digest-addressed references the manifest bytes are verified against
    /// the digest.
    pub async fn get_manifest(&self, reference: &ArtifactReference) -> Result<(Manifest, String)> {
        let full_ref = reference.full_reference();
        let repository = reference.repository();
        let label = reference.label().to_string();

        tracing::debug!(reference = %full_ref, "Pulling manifest");
        let data = self
            .retry
            .run("pull_manifest", || {
                self.transport.pull_manifest(&repository, &label)
            })
            .await
            .map_err(|f| classify(&full_ref, f))?;

        let manifest_digest = digest::compute(&data);
        if let Some(expected) = &reference.digest {
            if expected != &manifest_digest {
                return Err(ArtifactError::Integrity {
                    expected: expected.clone(),
                    actual: manifest_digest,
                });
            }
        }

        let manifest = Manifest::from_slice(&data, &full_ref)?;
        Ok((manifest, manifest_digest))
    }

    /// Check the manifest-declared layer sizes against the ceiling, returning
    /// the declared total.
    pub fn check_size(&self, reference: &ArtifactReference, manifest: &Manifest) -> Result<u64> {
        let declared = manifest.total_layer_size();
        if declared > self.max_artifact_size {
            return Err(ArtifactError::ImageTooLarge {
                reference: reference.full_reference(),
                size: declared,
                limit: self.max_artifact_size,
            });
        }
        Ok(declared)
    }

    /// Pull one blob and verify it against `blob_digest`.
    ///
    /// A digest mismatch is fatal and never retried.
    pub async fn get_layer(
        &self,
        reference: &ArtifactReference,
        blob_digest: &str,
    ) -> Result<ArtifactBlob> {
        let full_ref = reference.full_reference();
        let repository = reference.repository();

        tracing::debug!(reference = %full_ref, digest = %blob_digest, "Pulling layer");
        let data = self
            .retry
            .run("pull_blob", || self.transport.pull_blob(&repository, blob_digest))
            .await
            .map_err(|f| classify(&format!("{}@{}", repository, blob_digest), f))?;

        digest::verify(&data, blob_digest)?;

        Ok(ArtifactBlob {
            digest: blob_digest.to_string(),
            size: data.len() as u64,
            data,
        })
    }

    /// Pull the manifest and every layer in manifest order.
    ///
    /// The summed layer size declared by the manifest is checked against the
    /// ceiling before any blob is pulled. `cancel` is checked before the
    /// manifest pull and before each layer pull.
    pub async fn get_artifact(
        &self,
        reference: &ArtifactReference,
        cancel: &CancellationToken,
    ) -> Result<PulledArtifact> {
        let full_ref = reference.full_reference();
        check_cancelled(cancel, &full_ref)?;

        let (manifest, manifest_digest) = self.get_manifest(reference).await?;
        let declared = self.check_size(reference, &manifest)?;

        tracing::info!(
            reference = %full_ref,
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            size = declared,
            "Pulling artifact"
        );

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            check_cancelled(cancel, &full_ref)?;
            let blob = self.get_layer(reference, &descriptor.digest).await?;
            let mut layer = blob.into_layer();
            layer.file_name = descriptor.title().map(str::to_string);
            layers.push(layer);
        }

        tracing::info!(reference = %full_ref, "Artifact pulled");
        Ok(PulledArtifact {
            manifest,
            manifest_digest,
            layers,
        })
    }

    /// Push compressed `layers` as the artifact `reference`, returning the
    /// manifest digest.
    ///
    /// Blobs go first (config, then layers in order), the manifest last.
    pub async fn push_artifact(
        &self,
        reference: &ArtifactReference,
        layers: &[Layer],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let full_ref = reference.full_reference();
        if reference.is_digest_addressed() {
            return Err(ArtifactError::InvalidReference {
                reference: full_ref,
                reason: "cannot push to a digest-addressed reference".to_string(),
            });
        }
        let repository = reference.repository();
        let tag = reference.label().to_string();

        let manifest = Manifest::for_layers(layers)?;
        let manifest_bytes = manifest.to_vec()?;

        tracing::info!(reference = %full_ref, layers = layers.len(), "Pushing artifact");

        check_cancelled(cancel, &full_ref)?;
        self.push_blob(&full_ref, &repository, &manifest.config.digest, EMPTY_CONFIG)
            .await?;
        for (layer, descriptor) in layers.iter().zip(&manifest.layers) {
            check_cancelled(cancel, &full_ref)?;
            // Manifest::for_layers has already rejected non-raw layers.
            let data = layer.raw().unwrap_or_default();
            self.push_blob(&full_ref, &repository, &descriptor.digest, data)
                .await?;
        }

        check_cancelled(cancel, &full_ref)?;
        let pushed = self
            .retry
            .run("push_manifest", || {
                self.transport
                    .push_manifest(&repository, &tag, &manifest_bytes)
            })
            .await
            .map_err(|f| classify(&full_ref, f))?;

        let manifest_digest = if digest::is_well_formed(&pushed) {
            pushed
        } else {
            digest::compute(&manifest_bytes)
        };
        tracing::info!(reference = %full_ref, digest = %manifest_digest, "Artifact pushed");
        Ok(manifest_digest)
    }

    async fn push_blob(
        &self,
        full_ref: &str,
        repository: &str,
        blob_digest: &str,
        data: &[u8],
    ) -> Result<()> {
        tracing::debug!(reference = %full_ref, digest = %blob_digest, size = data.len(), "Pushing blob");
        self.retry
            .run("push_blob", || {
                self.transport.push_blob(repository, blob_digest, data)
            })
            .await
            .map_err(|f| classify(full_ref, f))
    }
}

impl std::fmt::Debug for RegistryArtifactProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryArtifactProvider")
            .field("retry", &self.retry)
            .field("max_artifact_size", &self.max_artifact_size)
            .finish_non_exhaustive()
    }
}

fn check_cancelled(cancel: &CancellationToken, reference: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ArtifactError::Cancelled(reference.to_string()));
    }
    Ok(())
}

/// Map a transport failure onto the engine error taxonomy.
fn classify(reference: &str, failure: RetryFailure) -> ArtifactError {
    let RetryFailure { error, attempts } = failure;
    let reference = reference.to_string();
    match error.kind {
        TransportErrorKind::Unauthorized => ArtifactError::RegistryAuth {
            reference,
            kind: AuthFailure::Unauthorized,
            message: error.message,
        },
        TransportErrorKind::Forbidden => ArtifactError::RegistryAuth {
            reference,
            kind: AuthFailure::Forbidden,
            message: error.message,
        },
        TransportErrorKind::NotFound => ArtifactError::ArtifactNotFound {
            reference,
            message: error.message,
        },
        TransportErrorKind::Transient => ArtifactError::TransientTransport {
            reference,
            attempts,
            message: error.message,
        },
        TransportErrorKind::Other => ArtifactError::Transport {
            reference,
            message: error.message,
        },
    }
}
