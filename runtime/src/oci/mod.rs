//! OCI artifact support for template distribution.
//!
//! Template sets are stored in registries as OCI image artifacts whose layers
//! are tar+gzip archives. This module covers:
//!
//! - Reference parsing and validation
//! - Content digests
//! - Layer archive encoding with whiteout deletions
//! - Manifests, registry transports and retries
//! - The artifact provider that ties them together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │ RegistryArtifactProvider │  integrity, size ceiling, cancellation
//! └────────────┬─────────────┘
//!              │ RetryPolicy
//! ┌────────────▼─────────────┐
//! │    RegistryTransport     │
//! ├──────────┬───────┬───────┤
//! │ OciRegistryTransport     │  oci-distribution client
//! │ OrasTransport            │  `oras` subprocess
//! │ MemoryTransport          │  process memory
//! └──────────────────────────┘
//! ```

pub mod archive;
pub mod digest;
mod manifest;
mod memory;
mod oras;
mod provider;
mod reference;
mod registry;
mod retry;
mod transport;

pub use manifest::{
    Descriptor, Manifest, CONFIG_MEDIA_TYPE, EMPTY_CONFIG, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
    TITLE_ANNOTATION,
};
pub use memory::MemoryTransport;
#[cfg(test)]
pub(crate) use memory::CancelOnBlobPull;
pub use oras::OrasTransport;
pub use provider::{ArtifactBlob, PulledArtifact, RegistryArtifactProvider};
pub use reference::{ArtifactReference, DEFAULT_TEMPLATE_ALIASES};
pub use registry::{OciRegistryTransport, RegistryAuth};
pub use retry::{RetryFailure, RetryPolicy, RetryPredicate};
pub use transport::{RegistryTransport, TransportError, TransportErrorKind, TransportResult};
