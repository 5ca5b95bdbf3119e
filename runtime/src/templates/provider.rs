//! Template collection provider.
//!
//! Resolves a reference string into a stack of parsed template layers:
//! bundled defaults come from pinned cache entries, everything else from the
//! registry through the artifact provider. Manifests are cached under the
//! reference string, layers under their digest.

use std::sync::Arc;

use fhir_templates_core::config::EngineConfig;
use fhir_templates_core::error::{ArtifactError, Result};
use tokio_util::sync::CancellationToken;

use super::parser::{TemplateParser, TextTemplateParser};
use super::TemplateLayer;
use crate::cache::{CachePolicy, Clock, Retention, SystemClock, TemplateCache};
use crate::oci::{ArtifactReference, Manifest, RegistryArtifactProvider, RegistryTransport};
use crate::overlay::Layer;

/// Values held by the shared cache.
enum Cached {
    Manifest(Manifest),
    Layer(Arc<TemplateLayer>),
}

/// Resolves template references with caching.
pub struct TemplateCollectionProvider {
    provider: Arc<RegistryArtifactProvider>,
    parser: Arc<dyn TemplateParser>,
    cache: TemplateCache<Cached>,
}

impl TemplateCollectionProvider {
    pub fn new(
        provider: Arc<RegistryArtifactProvider>,
        parser: Arc<dyn TemplateParser>,
        policy: CachePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            parser,
            cache: TemplateCache::with_clock(policy, clock),
        }
    }

    /// Build a provider from `config`: text parser, system clock, and every
    /// configured default template archive registered.
    pub fn from_config(
        transport: Arc<dyn RegistryTransport>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let provider = Arc::new(RegistryArtifactProvider::from_config(transport, config));
        let this = Self::new(
            provider,
            Arc::new(TextTemplateParser),
            CachePolicy::from_config(config),
            Arc::new(SystemClock),
        );

        for default in &config.default_templates {
            let data = std::fs::read(&default.archive).map_err(|e| {
                ArtifactError::ConfigError(format!(
                    "Failed to read default templates for {} from {}: {}",
                    default.alias,
                    default.archive.display(),
                    e
                ))
            })?;
            this.register_default(&default.alias, data)?;
        }
        Ok(this)
    }

    /// Register a bundled tar.gz template set under `alias`.
    ///
    /// The parsed layer is pinned: it never expires and is never evicted.
    pub fn register_default(&self, alias: &str, archive: Vec<u8>) -> Result<Arc<TemplateLayer>> {
        let layer = Layer::from_raw(archive).with_file_name(alias);
        let parsed = Arc::new(TemplateLayer::from_layer(&layer, self.parser.as_ref())?);
        self.cache.insert(
            default_key(alias),
            Cached::Layer(parsed.clone()),
            parsed.body_size(),
            Retention::Pinned,
        );
        tracing::info!(
            alias,
            templates = parsed.templates.len(),
            "Registered default templates"
        );
        Ok(parsed)
    }

    /// Resolve `reference` into template layers in manifest order (base first,
    /// highest priority last).
    pub async fn resolve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<TemplateLayer>>> {
        if let Some(layer) = self.cached_layer(&default_key(reference)) {
            tracing::debug!(reference, "Using default templates");
            return Ok(vec![layer]);
        }
        if ArtifactReference::is_default_alias(reference) {
            return Err(ArtifactError::ArtifactNotFound {
                reference: reference.to_string(),
                message: "default template set is not registered".to_string(),
            });
        }

        let parsed = ArtifactReference::parse(reference)?;
        let full_ref = parsed.full_reference();
        if cancel.is_cancelled() {
            return Err(ArtifactError::Cancelled(full_ref));
        }

        let manifest = self.manifest(&parsed).await?;
        self.provider.check_size(&parsed, &manifest)?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for (index, descriptor) in manifest.layers.iter().enumerate() {
            let key = layer_key(&descriptor.digest);
            if let Some(layer) = self.cached_layer(&key) {
                tracing::debug!(
                    reference = %full_ref,
                    digest = %descriptor.digest,
                    "Layer cache hit"
                );
                layers.push(layer);
                continue;
            }

            if cancel.is_cancelled() {
                return Err(ArtifactError::Cancelled(full_ref));
            }
            let blob = self.provider.get_layer(&parsed, &descriptor.digest).await?;
            let mut layer = blob.into_layer();
            layer.file_name = descriptor.title().map(str::to_string);

            if cancel.is_cancelled() {
                return Err(ArtifactError::Cancelled(full_ref));
            }
            let template_layer =
                Arc::new(TemplateLayer::from_layer(&layer, self.parser.as_ref())?);

            // The base layer is shared by every version built on it.
            let retention = if index == 0 {
                Retention::Long
            } else {
                Retention::Short
            };
            self.cache.insert(
                key,
                Cached::Layer(template_layer.clone()),
                template_layer.body_size(),
                retention,
            );
            layers.push(template_layer);
        }

        tracing::info!(reference = %full_ref, layers = layers.len(), "Resolved templates");
        Ok(layers)
    }

    /// Drop the cached manifest of `reference`. Layers stay cached by digest.
    pub fn invalidate(&self, reference: &str) -> bool {
        match ArtifactReference::parse(reference) {
            Ok(parsed) => self.cache.invalidate(&manifest_key(&parsed.full_reference())),
            Err(_) => false,
        }
    }

    /// Number of cached manifests and layers.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    async fn manifest(&self, reference: &ArtifactReference) -> Result<Manifest> {
        let full_ref = reference.full_reference();
        let key = manifest_key(&full_ref);
        if let Some(cached) = self.cache.get(&key) {
            if let Cached::Manifest(manifest) = cached.as_ref() {
                tracing::debug!(reference = %full_ref, "Manifest cache hit");
                return Ok(manifest.clone());
            }
        }

        let (manifest, manifest_digest) = self.provider.get_manifest(reference).await?;
        let retention = if reference.is_digest_addressed() {
            Retention::Long
        } else {
            Retention::Short
        };
        let size = manifest.to_vec().map(|b| b.len() as u64).unwrap_or(0);
        tracing::debug!(
            reference = %full_ref,
            digest = %manifest_digest,
            retention = ?retention,
            "Caching manifest"
        );
        self.cache
            .insert(key, Cached::Manifest(manifest.clone()), size, retention);
        Ok(manifest)
    }

    fn cached_layer(&self, key: &str) -> Option<Arc<TemplateLayer>> {
        match self.cache.get(key)?.as_ref() {
            Cached::Layer(layer) => Some(layer.clone()),
            Cached::Manifest(_) => None,
        }
    }
}

fn default_key(alias: &str) -> String {
    format!("default:{}", alias.trim().to_ascii_lowercase())
}

fn manifest_key(reference: &str) -> String {
    format!("manifest:{}", reference)
}

fn layer_key(digest: &str) -> String {
    format!("layer:{}", digest)
}
