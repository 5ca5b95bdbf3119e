//! FHIR Templates Core - Foundational Types
//!
//! Errors, configuration and logging bootstrap shared by the template
//! artifact engine.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{DefaultTemplateConfig, EngineConfig, OrasConfig, RetryConfig};
pub use error::{ArtifactError, AuthFailure, Result};
pub use log::{init_tracing, init_tracing_from_config, LogFormat};

/// FHIR Templates version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
