//! Layer overlay: file sets, the merge/diff algorithm, the working-directory
//! layout and the packaging workflow built on them.

pub mod fs;
mod layer;
mod manager;
pub mod operator;

pub use fs::OverlayFileSystem;
pub use layer::{layer_file_name, FileMap, FileSet, Layer, LayerContent, UNKNOWN_SEQUENCE};
pub use manager::{ArtifactManager, PullOutcome, PushOutcome};
pub use operator::{OverlayMetadata, METADATA_PATH};
