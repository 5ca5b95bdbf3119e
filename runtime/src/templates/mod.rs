//! Parsed template collections.
//!
//! A template artifact resolves to a stack of [`TemplateLayer`]s in manifest
//! order, base first. The renderer consumes the stack directly or through
//! [`flatten`], where later layers win.

mod parser;
mod provider;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fhir_templates_core::error::{ArtifactError, Result};

use crate::overlay::{operator, Layer, LayerContent};

pub use parser::{TemplateParser, TextTemplateParser, LIQUID_EXTENSION};
pub use provider::TemplateCollectionProvider;

/// Template name → template.
pub type TemplateMap = BTreeMap<String, Template>;

/// One template ready for the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Lookup name (relative path without the template extension)
    pub name: String,
    /// Path of the source file inside the layer
    pub path: String,
    pub body: String,
}

/// Templates contributed by one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayer {
    /// Digest of the compressed blob (absent for layers built in memory)
    pub digest: Option<String>,
    pub sequence_number: i64,
    /// Size of the compressed blob
    pub size: u64,
    pub templates: TemplateMap,
    /// Template names this layer deletes from lower layers
    pub removed: BTreeSet<String>,
}

impl TemplateLayer {
    /// Bring `layer` into template shape, extracting and parsing as needed.
    pub fn from_layer(layer: &Layer, parser: &dyn TemplateParser) -> Result<Self> {
        let name = layer.describe();
        let (sequence_number, templates, removed) = match &layer.content {
            LayerContent::Templates(templates) => {
                (layer.sequence_number, templates.clone(), BTreeSet::new())
            }
            LayerContent::Raw(_) | LayerContent::Files(_) => {
                let files = operator::extract_layer(layer)?;
                let removed = files
                    .files
                    .iter()
                    .filter(|(_, content)| content.is_none())
                    .map(|(path, _)| parser.template_name(path))
                    .collect();
                let templates = parser.parse(&files, &name)?;
                (files.sequence_number, templates, removed)
            }
        };

        Ok(Self {
            digest: layer.digest.clone(),
            sequence_number,
            size: layer.size,
            templates,
            removed,
        })
    }

    /// Bytes of template text held by this layer.
    pub fn body_size(&self) -> u64 {
        self.templates.values().map(|t| t.body.len() as u64).sum()
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// The layer in template shape, for stages that pass [`Layer`]s around.
    pub fn to_layer(&self) -> Layer {
        Layer {
            digest: self.digest.clone(),
            size: self.size,
            sequence_number: self.sequence_number,
            file_name: None,
            content: LayerContent::Templates(self.templates.clone()),
        }
    }
}

/// Merge a template stack into one map. Layers are applied in order, so later
/// layers override and delete templates of earlier ones.
pub fn flatten(layers: &[Arc<TemplateLayer>]) -> TemplateMap {
    let mut merged = TemplateMap::new();
    for layer in layers {
        for name in &layer.removed {
            merged.remove(name);
        }
        for (name, template) in &layer.templates {
            merged.insert(name.clone(), template.clone());
        }
    }
    merged
}

/// Look up `name` in a stack, highest layer first.
pub fn lookup<'a>(layers: &'a [Arc<TemplateLayer>], name: &str) -> Option<&'a Template> {
    for layer in layers.iter().rev() {
        if let Some(template) = layer.get(name) {
            return Some(template);
        }
        if layer.removed.contains(name) {
            return None;
        }
    }
    None
}

fn parse_error(layer: &str, message: impl Into<String>) -> ArtifactError {
    ArtifactError::TemplateParse {
        layer: layer.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::FileSet;

    fn layer_from(files: FileSet) -> Layer {
        operator::archive_layer(&files).unwrap()
    }

    #[test]
    fn test_from_raw_layer() {
        let files = FileSet::from_files([
            ("ADT_A01.liquid", "{{ msg }}"),
            ("Resource/_Patient.liquid", "patient"),
        ])
        .with_sequence_number(3);
        let layer = layer_from(files);

        let parsed = TemplateLayer::from_layer(&layer, &TextTemplateParser).unwrap();
        assert_eq!(parsed.sequence_number, 3);
        assert_eq!(parsed.digest, layer.digest);
        assert_eq!(parsed.get("ADT_A01").unwrap().body, "{{ msg }}");
        assert_eq!(
            parsed.get("Resource/_Patient").unwrap().path,
            "Resource/_Patient.liquid"
        );
        assert!(parsed.removed.is_empty());
        assert_eq!(parsed.body_size(), 16);
    }

    #[test]
    fn test_tombstones_become_removed_names() {
        let mut files = FileSet::from_files([("ADT_A01.liquid", "x")]).with_sequence_number(2);
        files.insert_tombstone("ORU_R01.liquid");
        let parsed = TemplateLayer::from_layer(&layer_from(files), &TextTemplateParser).unwrap();
        assert!(parsed.removed.contains("ORU_R01"));
        assert!(!parsed.templates.contains_key("ORU_R01"));
    }

    #[test]
    fn test_template_shape_passes_through() {
        let files = FileSet::from_files([("a.liquid", "a")]).with_sequence_number(1);
        let parsed = TemplateLayer::from_layer(&layer_from(files), &TextTemplateParser).unwrap();

        let layer = parsed.to_layer();
        assert_eq!(layer.content.kind(), "templates");
        let again = TemplateLayer::from_layer(&layer, &TextTemplateParser).unwrap();
        assert_eq!(again, parsed);
    }

    #[test]
    fn test_flatten_and_lookup() {
        let base = FileSet::from_files([("a.liquid", "a0"), ("b.liquid", "b0")])
            .with_sequence_number(0);
        let mut top = FileSet::from_files([("a.liquid", "a1")]).with_sequence_number(1);
        top.insert_tombstone("b.liquid");

        let stack: Vec<Arc<TemplateLayer>> = [base, top]
            .into_iter()
            .map(|f| {
                Arc::new(TemplateLayer::from_layer(&layer_from(f), &TextTemplateParser).unwrap())
            })
            .collect();

        let flat = flatten(&stack);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["a"].body, "a1");

        assert_eq!(lookup(&stack, "a").unwrap().body, "a1");
        assert!(lookup(&stack, "b").is_none());
        assert_eq!(lookup(&stack[..1], "b").unwrap().body, "b0");
    }
}
