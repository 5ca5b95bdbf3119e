//! FHIR Templates Runtime - template artifact distribution engine.
//!
//! Pulls template sets stored as layered OCI artifacts, verifies and caches
//! them, and hands parsed template stacks to the rendering pipeline. Also
//! packages local template trees back into incremental layers.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod oci;
pub mod overlay;
pub mod templates;

// Re-export common types
pub use cache::{CachePolicy, Clock, ManualClock, Retention, SystemClock, TemplateCache};
pub use oci::{ArtifactBlob, ArtifactReference, Manifest, PulledArtifact, RegistryArtifactProvider};
pub use oci::{MemoryTransport, OciRegistryTransport, OrasTransport, RegistryAuth};
pub use oci::{RegistryTransport, RetryPolicy, TransportError, TransportErrorKind};
pub use overlay::{ArtifactManager, FileSet, Layer, LayerContent, OverlayFileSystem};
pub use templates::{
    flatten, Template, TemplateCollectionProvider, TemplateLayer, TemplateMap, TemplateParser,
    TextTemplateParser,
};

/// FHIR Templates Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
