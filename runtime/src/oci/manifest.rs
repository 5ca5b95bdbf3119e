//! Artifact manifest model.
//!
//! Mirrors the OCI image manifest (schema version 2). Layer order is
//! authoritative: index 0 is the base layer.

use std::collections::BTreeMap;

use fhir_templates_core::error::{ArtifactError, Result};
use serde::{Deserialize, Serialize};

use super::digest;
use crate::overlay::Layer;

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Annotation carrying a layer's file name.
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// Config blob pushed with every artifact.
pub const EMPTY_CONFIG: &[u8] = b"{}";

/// Content descriptor of a config or layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe `data` with the given media type.
    pub fn for_blob(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: digest::compute(data),
            size: data.len() as i64,
            annotations: None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(TITLE_ANNOTATION))
            .map(String::as_str)
    }
}

/// Artifact manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Parse and validate manifest bytes pulled for `reference`.
    pub fn from_slice(data: &[u8], reference: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(data).map_err(|e| ArtifactError::Transport {
                reference: reference.to_string(),
                message: format!("Failed to parse manifest: {}", e),
            })?;
        manifest.validate(reference)?;
        Ok(manifest)
    }

    /// Build the manifest for a pushed artifact.
    ///
    /// Every layer must still be in compressed form.
    pub fn for_layers(layers: &[Layer]) -> Result<Self> {
        let mut descriptors = Vec::with_capacity(layers.len());
        for layer in layers {
            let data = layer.raw().ok_or_else(|| {
                ArtifactError::Overlay(format!(
                    "Layer {} must be compressed before it is pushed",
                    layer.describe()
                ))
            })?;
            let mut descriptor = Descriptor::for_blob(LAYER_MEDIA_TYPE, data);
            if let Some(name) = &layer.file_name {
                descriptor.annotations =
                    Some(BTreeMap::from([(TITLE_ANNOTATION.to_string(), name.clone())]));
            }
            descriptors.push(descriptor);
        }

        Ok(Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config: Descriptor::for_blob(CONFIG_MEDIA_TYPE, EMPTY_CONFIG),
            layers: descriptors,
        })
    }

    /// Check structural invariants: at least one layer, every layer with a
    /// well-formed digest and a non-negative size.
    pub fn validate(&self, reference: &str) -> Result<()> {
        let invalid = |message: String| ArtifactError::Transport {
            reference: reference.to_string(),
            message,
        };

        if self.layers.is_empty() {
            return Err(invalid("Manifest contains no layers".to_string()));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.digest.is_empty() {
                return Err(invalid(format!("Layer {} has an empty digest", index)));
            }
            if !digest::is_well_formed(&layer.digest) {
                return Err(invalid(format!(
                    "Layer {} has a malformed digest '{}'",
                    index, layer.digest
                )));
            }
            if layer.size < 0 {
                return Err(invalid(format!(
                    "Layer {} declares a negative size {}",
                    index, layer.size
                )));
            }
        }
        Ok(())
    }

    /// Sum of the layer sizes declared by the manifest.
    pub fn total_layer_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size.max(0) as u64).sum()
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        format!(
            r#"{{
  "schemaVersion": 2,
  "mediaType": "{}",
  "config": {{ "mediaType": "{}", "digest": "{}", "size": 2 }},
  "layers": [
    {{ "mediaType": "{}", "digest": "{}", "size": 10,
       "annotations": {{ "org.opencontainers.image.title": "layer1.tar.gz" }} }},
    {{ "mediaType": "{}", "digest": "{}", "size": 20 }}
  ]
}}"#,
            MANIFEST_MEDIA_TYPE,
            CONFIG_MEDIA_TYPE,
            digest::compute(EMPTY_CONFIG),
            LAYER_MEDIA_TYPE,
            digest::compute(b"one"),
            LAYER_MEDIA_TYPE,
            digest::compute(b"two"),
        )
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_slice(sample_json().as_bytes(), "r.io/t:v1").unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[0].title(), Some("layer1.tar.gz"));
        assert_eq!(manifest.layers[1].title(), None);
        assert_eq!(manifest.total_layer_size(), 30);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Manifest::from_slice(b"not json", "r.io/t:v1"),
            Err(ArtifactError::Transport { .. })
        ));
    }

    #[test]
    fn test_validate_requires_layers() {
        let mut manifest = Manifest::from_slice(sample_json().as_bytes(), "r").unwrap();
        manifest.layers.clear();
        assert!(manifest.validate("r").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_digest() {
        let mut manifest = Manifest::from_slice(sample_json().as_bytes(), "r").unwrap();
        manifest.layers[1].digest.clear();
        assert!(manifest.validate("r").is_err());
    }

    #[test]
    fn test_validate_rejects_negative_size() {
        let mut manifest = Manifest::from_slice(sample_json().as_bytes(), "r").unwrap();
        manifest.layers[0].size = -1;
        assert!(manifest.validate("r").is_err());
    }

    #[test]
    fn test_for_layers() {
        let layers = vec![
            Layer::from_raw(b"base".to_vec()).with_file_name("layer1.tar.gz"),
            Layer::from_raw(b"diff".to_vec()),
        ];
        let manifest = Manifest::for_layers(&layers).unwrap();
        manifest.validate("r").unwrap();

        assert_eq!(manifest.media_type, MANIFEST_MEDIA_TYPE);
        assert_eq!(manifest.config.digest, digest::compute(EMPTY_CONFIG));
        assert_eq!(manifest.layers[0].digest, digest::compute(b"base"));
        assert_eq!(manifest.layers[0].size, 4);
        assert_eq!(manifest.layers[0].title(), Some("layer1.tar.gz"));
        assert_eq!(manifest.layers[1].media_type, LAYER_MEDIA_TYPE);

        let bytes = manifest.to_vec().unwrap();
        assert_eq!(Manifest::from_slice(&bytes, "r").unwrap(), manifest);
    }
}
