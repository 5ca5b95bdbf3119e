//! Working-directory layout for the local packaging workflow.
//!
//! ```text
//! <root>/
//! ├── ADT_A01.liquid            (merged template tree)
//! ├── Resource/...
//! └── .image/
//!     ├── layers/*.tar.gz       (pulled or generated layer archives)
//!     └── base/*.tar.gz         (at most one base layer)
//! ```
//!
//! This module only moves bytes between the layout and in-memory layers; the
//! overlay semantics live in [`super::operator`].

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use fhir_templates_core::error::{ArtifactError, Result};

use super::layer::{FileSet, Layer};

/// Reserved directory holding layer archives.
pub const IMAGE_DIR: &str = ".image";
const LAYERS_DIR: &str = "layers";
const BASE_DIR: &str = "base";
const LAYER_EXTENSION: &str = ".tar.gz";

/// Reads and writes layers and merged files under a working directory.
#[derive(Debug, Clone)]
pub struct OverlayFileSystem {
    root: PathBuf,
}

impl OverlayFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layers_dir(&self) -> PathBuf {
        self.root.join(IMAGE_DIR).join(LAYERS_DIR)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(IMAGE_DIR).join(BASE_DIR)
    }

    /// Read the merged template tree, excluding the `.image` subtree.
    pub fn read_merged(&self) -> Result<FileSet> {
        let mut files = FileSet::new();
        if !self.root.is_dir() {
            return Ok(files);
        }
        walk_dir(&self.root, &self.root, &mut files)?;
        Ok(files)
    }

    /// Replace the merged template tree with `files`.
    ///
    /// Everything under the root except `.image` is removed first.
    pub fn write_merged(&self, files: &FileSet) -> Result<()> {
        if files.has_tombstones() {
            return Err(ArtifactError::Overlay(
                "merged output must not contain tombstones".to_string(),
            ));
        }

        self.clear_merged()?;
        for (path, content) in files.contents() {
            let target = self.root.join(path);
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            std::fs::write(&target, content)
                .map_err(|e| io_error("write", &target, e))?;
        }

        tracing::debug!(
            root = %self.root.display(),
            files = files.len(),
            "Wrote merged templates"
        );
        Ok(())
    }

    /// Remove the merged template tree, keeping `.image`.
    pub fn clear_merged(&self) -> Result<()> {
        create_dir(&self.root)?;
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| io_error("read directory", &self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error("read directory", &self.root, e))?;
            if entry.file_name() == IMAGE_DIR {
                continue;
            }
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| io_error("inspect", &path, e))?;
            if file_type.is_dir() {
                std::fs::remove_dir_all(&path).map_err(|e| io_error("remove", &path, e))?;
            } else {
                std::fs::remove_file(&path).map_err(|e| io_error("remove", &path, e))?;
            }
        }
        Ok(())
    }

    /// Read every layer archive in the layers area, ordered by file name.
    ///
    /// File names carry no ordering meaning; callers order layers by manifest
    /// position or sequence metadata.
    pub fn read_layers(&self) -> Result<Vec<Layer>> {
        read_archives(&self.layers_dir())
    }

    /// Replace the layers area with `layers`.
    ///
    /// A layer keeps its file name only when it is a plain base name not used
    /// by an earlier layer of the same call; otherwise it is written as
    /// `layer{position}.tar.gz`.
    pub fn write_layers(&self, layers: &[Layer]) -> Result<()> {
        self.clear_layers()?;
        let dir = self.layers_dir();
        let mut used = HashSet::new();
        for (index, layer) in layers.iter().enumerate() {
            let position = format!("layer{}{}", index + 1, LAYER_EXTENSION);
            let name = match layer.file_name.as_deref().filter(|n| is_plain_file_name(n)) {
                Some(name) if !used.contains(name) => name.to_string(),
                _ => position,
            };
            // A fallback may still clash with a name an earlier layer kept.
            let name = unique_name(name, &used);
            write_archive(&dir, layer, &name)?;
            used.insert(name);
        }
        Ok(())
    }

    /// Read the base layer.
    ///
    /// Returns the empty sentinel layer when the base area is missing or empty,
    /// and fails when it holds more than one file.
    pub fn read_base_layer(&self) -> Result<Layer> {
        let dir = self.base_dir();
        let mut layers = read_archives(&dir)?;
        match layers.len() {
            0 => Ok(Layer::empty()),
            1 => Ok(layers.remove(0)),
            n => Err(ArtifactError::Overlay(format!(
                "Base layer directory {} holds {} files, expected at most one",
                dir.display(),
                n
            ))),
        }
    }

    /// Replace the base area with `layer`.
    pub fn write_base_layer(&self, layer: &Layer) -> Result<()> {
        self.clear_base()?;
        let fallback = format!("base{}", LAYER_EXTENSION);
        let name = layer
            .file_name
            .as_deref()
            .filter(|n| is_plain_file_name(n))
            .unwrap_or(&fallback);
        write_archive(&self.base_dir(), layer, name)
    }

    pub fn clear_layers(&self) -> Result<()> {
        clear_dir(&self.layers_dir())
    }

    pub fn clear_base(&self) -> Result<()> {
        clear_dir(&self.base_dir())
    }
}

/// Recursively walk a directory and collect files, skipping `.image` at the root.
fn walk_dir(root: &Path, current: &Path, files: &mut FileSet) -> Result<()> {
    let entries = std::fs::read_dir(current).map_err(|e| io_error("read directory", current, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| io_error("read directory", current, e))?;
        let path = entry.path();
        if current == root && entry.file_name() == IMAGE_DIR {
            continue;
        }

        let file_type = entry
            .file_type()
            .map_err(|e| io_error("inspect", &path, e))?;
        if file_type.is_dir() {
            walk_dir(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = relative_path(root, &path)?;
            let content = std::fs::read(&path).map_err(|e| io_error("read", &path, e))?;
            files.insert_file(relative, content);
        }
    }

    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|e| {
        ArtifactError::Overlay(format!(
            "Failed to compute relative path for {}: {}",
            path.display(),
            e
        ))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn read_archives(dir: &Path) -> Result<Vec<Layer>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_error("read directory", dir, e))? {
        let entry = entry.map_err(|e| io_error("read directory", dir, e))?;
        let path = entry.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut layers = Vec::with_capacity(paths.len());
    for path in paths {
        let data = std::fs::read(&path).map_err(|e| io_error("read", &path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        layers.push(Layer::from_raw(data).with_file_name(file_name));
    }
    Ok(layers)
}

/// A single normal path component: no separators, no `.`/`..`, no root.
fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn unique_name(name: String, used: &HashSet<String>) -> String {
    if !used.contains(&name) {
        return name;
    }
    let stem = name.strip_suffix(LAYER_EXTENSION).unwrap_or(&name).to_string();
    (2..)
        .map(|n| format!("{}-{}{}", stem, n, LAYER_EXTENSION))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or(name)
}

/// Write `layer` as `dir/name`; `name` must already be a plain file name.
fn write_archive(dir: &Path, layer: &Layer, name: &str) -> Result<()> {
    let data = layer.raw().ok_or_else(|| {
        ArtifactError::Overlay(format!(
            "Layer {} must be compressed before it is written ({} content)",
            layer.describe(),
            layer.content.kind()
        ))
    })?;
    let target = dir.join(name);
    std::fs::write(&target, data).map_err(|e| io_error("write", &target, e))?;

    tracing::debug!(
        path = %target.display(),
        size = data.len(),
        "Wrote layer archive"
    );
    Ok(())
}

/// Delete `dir` recursively, then recreate it empty.
fn clear_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| io_error("remove", dir, e))?;
    }
    create_dir(dir)
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| io_error("create directory", dir, e))
}

/// Keep the I/O error kind, add the operation and path.
fn io_error(operation: &str, path: &Path, e: std::io::Error) -> ArtifactError {
    ArtifactError::IoError(std::io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", operation, path.display(), e),
    ))
}
