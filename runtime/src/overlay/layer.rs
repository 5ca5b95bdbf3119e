//! Layer data model shared by the archive codec, the overlay operator and the
//! template provider.
//!
//! A layer moves through three shapes: the compressed blob pulled from or pushed
//! to a registry, the decompressed file set, and the parsed template map handed
//! to the renderer. [`LayerContent`] names the shape so each stage can check
//! what it receives.

use std::collections::BTreeMap;

use crate::templates::TemplateMap;

/// Sequence number of a layer that carries no overlay metadata.
pub const UNKNOWN_SEQUENCE: i64 = -1;

/// Relative path → content. `None` marks a deletion (tombstone) recorded by
/// this layer.
pub type FileMap = BTreeMap<String, Option<Vec<u8>>>;

/// Decompressed content of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    /// Path → content, or `None` for a tombstone
    pub files: FileMap,
    /// Position in the layer stack (`-1` when unknown)
    pub sequence_number: i64,
    /// Path → content digest, recorded when the layer was produced by a diff
    pub file_digests: Option<BTreeMap<String, String>>,
}

impl Default for FileSet {
    fn default() -> Self {
        Self {
            files: FileMap::new(),
            sequence_number: UNKNOWN_SEQUENCE,
            file_digests: None,
        }
    }
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tombstone-free file set from `(path, content)` pairs.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| (path.into(), Some(content.into())))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_sequence_number(mut self, sequence_number: i64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn insert_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), Some(content.into()));
    }

    pub fn insert_tombstone(&mut self, path: impl Into<String>) {
        self.files.insert(path.into(), None);
    }

    /// Content at `path`; `None` for both absent paths and tombstones.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).and_then(|c| c.as_deref())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_tombstone(&self, path: &str) -> bool {
        matches!(self.files.get(path), Some(None))
    }

    pub fn has_tombstones(&self) -> bool {
        self.files.values().any(Option::is_none)
    }

    /// Iterate over paths that carry content.
    pub fn contents(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .filter_map(|(path, content)| content.as_deref().map(|c| (path.as_str(), c)))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total bytes of content, tombstones excluded.
    pub fn content_size(&self) -> u64 {
        self.contents().map(|(_, c)| c.len() as u64).sum()
    }
}

/// The shape a layer's content is in.
#[derive(Debug, Clone)]
pub enum LayerContent {
    /// Compressed tar+gzip bytes as stored in a registry or on disk
    Raw(Vec<u8>),
    /// Decompressed files
    Files(FileSet),
    /// Parsed templates ready for rendering
    Templates(TemplateMap),
}

impl LayerContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Files(_) => "files",
            Self::Templates(_) => "templates",
        }
    }
}

/// One layer of a template artifact.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Content digest of the compressed blob (absent for the empty base sentinel)
    pub digest: Option<String>,
    /// Size of the compressed blob in bytes
    pub size: u64,
    /// Position in the layer stack
    pub sequence_number: i64,
    /// File name on disk (`layer{n}.tar.gz` for generated layers)
    pub file_name: Option<String>,
    /// Content in its current shape
    pub content: LayerContent,
}

impl Layer {
    /// Wrap a compressed blob, computing its digest.
    pub fn from_raw(data: Vec<u8>) -> Self {
        Self {
            digest: Some(crate::oci::digest::compute(&data)),
            size: data.len() as u64,
            sequence_number: UNKNOWN_SEQUENCE,
            file_name: None,
            content: LayerContent::Raw(data),
        }
    }

    /// The layer used when no base layer exists.
    pub fn empty() -> Self {
        Self {
            digest: None,
            size: 0,
            sequence_number: UNKNOWN_SEQUENCE,
            file_name: None,
            content: LayerContent::Raw(Vec::new()),
        }
    }

    /// Whether this is the sentinel returned for a missing base layer.
    pub fn is_empty_sentinel(&self) -> bool {
        self.digest.is_none()
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Human-readable identity for error messages.
    pub fn describe(&self) -> String {
        match (&self.file_name, &self.digest) {
            (Some(name), _) => name.clone(),
            (None, Some(digest)) => digest.clone(),
            (None, None) => "<empty>".to_string(),
        }
    }

    /// Compressed bytes, if the layer is still in raw shape.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.content {
            LayerContent::Raw(data) => Some(data),
            _ => None,
        }
    }
}

/// File name used for a generated layer archive.
pub fn layer_file_name(sequence_number: i64) -> String {
    format!("layer{}.tar.gz", sequence_number)
}
