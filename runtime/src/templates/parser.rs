//! Files → templates.

use fhir_templates_core::error::Result;

use super::{parse_error, Template, TemplateMap};
use crate::overlay::fs::IMAGE_DIR;
use crate::overlay::FileSet;

/// Extension stripped from template file names.
pub const LIQUID_EXTENSION: &str = ".liquid";

/// Turns a layer's files into templates.
///
/// Implementations plug a rendering engine's own compilation step into the
/// provider; the provider only relies on the name mapping being stable.
pub trait TemplateParser: Send + Sync {
    /// Parse every content file of `files`. `layer` names the layer in errors.
    fn parse(&self, files: &FileSet, layer: &str) -> Result<TemplateMap>;

    /// Lookup name for a file path.
    fn template_name(&self, path: &str) -> String;
}

/// Keeps template bodies as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTemplateParser;

impl TemplateParser for TextTemplateParser {
    fn parse(&self, files: &FileSet, layer: &str) -> Result<TemplateMap> {
        let mut templates = TemplateMap::new();
        for (path, content) in files.contents() {
            if path == IMAGE_DIR || path.starts_with(&format!("{}/", IMAGE_DIR)) {
                return Err(parse_error(
                    layer,
                    format!("reserved path {} found among templates", path),
                ));
            }
            let body = std::str::from_utf8(content).map_err(|e| {
                parse_error(layer, format!("{} is not valid UTF-8: {}", path, e))
            })?;

            let name = self.template_name(path);
            templates.insert(
                name.clone(),
                Template {
                    name,
                    path: path.to_string(),
                    body: body.to_string(),
                },
            );
        }
        Ok(templates)
    }

    fn template_name(&self, path: &str) -> String {
        path.strip_suffix(LIQUID_EXTENSION)
            .unwrap_or(path)
            .to_string()
    }
}
