use thiserror::Error;

/// Which authorization failure a registry reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// 401-equivalent: missing or rejected credentials
    Unauthorized,
    /// 403-equivalent: credentials accepted but access denied
    Forbidden,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Template artifact engine error types
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Malformed artifact reference string
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Registry rejected the credentials or denied access
    #[error("Registry {kind}: {reference} - {message}")]
    RegistryAuth {
        reference: String,
        kind: AuthFailure,
        message: String,
    },

    /// Manifest or blob does not exist in the registry
    #[error("Artifact not found: {reference} - {message}")]
    ArtifactNotFound { reference: String, message: String },

    /// Content digest does not match the expected digest
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Manifest-declared size exceeds the configured ceiling
    #[error("Artifact too large: {reference} declares {size} bytes (limit {limit})")]
    ImageTooLarge {
        reference: String,
        size: u64,
        limit: u64,
    },

    /// Layer archive could not be decoded or encoded
    #[error("Archive error in layer {layer}: {message}")]
    Archive { layer: String, message: String },

    /// Overlay metadata document is malformed
    #[error("Metadata error in layer {layer}: {message}")]
    Metadata { layer: String, message: String },

    /// Network-level failure that persisted after all retry attempts
    #[error("Transport failed after {attempts} attempts: {reference} - {message}")]
    TransientTransport {
        reference: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable registry transport failure
    #[error("Transport error: {reference} - {message}")]
    Transport { reference: String, message: String },

    /// Working-directory layout violation
    #[error("Overlay error: {0}")]
    Overlay(String),

    /// Layer content could not be parsed into templates
    #[error("Template parse error in layer {layer}: {message}")]
    TemplateParse { layer: String, message: String },

    /// Operation aborted through its cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ArtifactError {
    /// Whether a retry policy may attempt the failed operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtifactError::TransientTransport { .. })
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ArtifactError {
    fn from(err: serde_yaml::Error) -> Self {
        ArtifactError::SerializationError(err.to_string())
    }
}

/// Result type alias for template artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reference_display() {
        let error = ArtifactError::InvalidReference {
            reference: "/name".to_string(),
            reason: "registry is empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid reference '/name': registry is empty"
        );
    }

    #[test]
    fn test_registry_auth_display() {
        let error = ArtifactError::RegistryAuth {
            reference: "example.azurecr.io/templates:v1".to_string(),
            kind: AuthFailure::Forbidden,
            message: "denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry forbidden: example.azurecr.io/templates:v1 - denied"
        );
    }

    #[test]
    fn test_integrity_display() {
        let error = ArtifactError::Integrity {
            expected: "sha256:aaa".to_string(),
            actual: "sha256:bbb".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Integrity check failed: expected sha256:aaa, got sha256:bbb"
        );
    }

    #[test]
    fn test_image_too_large_display() {
        let error = ArtifactError::ImageTooLarge {
            reference: "r.io/t:v1".to_string(),
            size: 200,
            limit: 100,
        };
        assert_eq!(
            error.to_string(),
            "Artifact too large: r.io/t:v1 declares 200 bytes (limit 100)"
        );
    }

    #[test]
    fn test_transient_transport_display() {
        let error = ArtifactError::TransientTransport {
            reference: "r.io/t:v1".to_string(),
            attempts: 3,
            message: "connection reset".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transport failed after 3 attempts: r.io/t:v1 - connection reset"
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        let transient = ArtifactError::TransientTransport {
            reference: "r".to_string(),
            attempts: 1,
            message: "timeout".to_string(),
        };
        assert!(transient.is_retryable());

        let not_found = ArtifactError::ArtifactNotFound {
            reference: "r".to_string(),
            message: "missing".to_string(),
        };
        assert!(!not_found.is_retryable());

        let integrity = ArtifactError::Integrity {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert!(!integrity.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ArtifactError = io_error.into();
        assert!(matches!(error, ArtifactError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: ArtifactError = result.unwrap_err().into();
        assert!(matches!(error, ArtifactError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: ArtifactError = result.unwrap_err().into();
        assert!(matches!(error, ArtifactError::SerializationError(_)));
    }

    #[test]
    fn test_auth_failure_display() {
        assert_eq!(AuthFailure::Unauthorized.to_string(), "unauthorized");
        assert_eq!(AuthFailure::Forbidden.to_string(), "forbidden");
    }
}
