use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ArtifactError, Result};
use crate::log::LogFormat;

/// Engine configuration
///
/// Passed explicitly into the provider and cache constructors at startup.
/// Nothing in the engine reads process-wide environment state for these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retention for entries keyed by mutable references, in seconds
    pub short_cache_ttl_secs: u64,

    /// Retention for entries keyed by digests, in seconds (None = never expire)
    pub long_cache_ttl_secs: Option<u64>,

    /// Upper bound on the summed size of cached entries
    pub cache_size_limit_bytes: u64,

    /// Upper bound on the manifest-declared size of a pulled artifact
    pub max_artifact_size_bytes: u64,

    /// Registry retry behaviour
    pub retry: RetryConfig,

    /// Subprocess transport settings
    pub oras: OrasConfig,

    /// Bundled template sets served without touching a registry
    pub default_templates: Vec<DefaultTemplateConfig>,

    /// Log output format for embedding binaries
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_cache_ttl_secs: 30 * 60,
            long_cache_ttl_secs: Some(24 * 60 * 60),
            cache_size_limit_bytes: 256 * 1024 * 1024,
            max_artifact_size_bytes: 100 * 1024 * 1024,
            retry: RetryConfig::default(),
            oras: OrasConfig::default(),
            default_templates: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML configuration document and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ArtifactError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&data)
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.short_cache_ttl_secs == 0 {
            return Err(ArtifactError::ConfigError(
                "short_cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(long) = self.long_cache_ttl_secs {
            if long < self.short_cache_ttl_secs {
                return Err(ArtifactError::ConfigError(format!(
                    "long_cache_ttl_secs ({}) must not be shorter than short_cache_ttl_secs ({})",
                    long, self.short_cache_ttl_secs
                )));
            }
        }
        if self.cache_size_limit_bytes == 0 {
            return Err(ArtifactError::ConfigError(
                "cache_size_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_artifact_size_bytes == 0 {
            return Err(ArtifactError::ConfigError(
                "max_artifact_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ArtifactError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        for template in &self.default_templates {
            if template.alias.trim().is_empty() {
                return Err(ArtifactError::ConfigError(
                    "default template alias must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn short_ttl(&self) -> Duration {
        Duration::from_secs(self.short_cache_ttl_secs)
    }

    pub fn long_ttl(&self) -> Option<Duration> {
        self.long_cache_ttl_secs.map(Duration::from_secs)
    }
}

/// Retry configuration for registry transport calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Subprocess transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrasConfig {
    /// Executable to invoke
    pub binary: PathBuf,

    /// Scratch directory for files handed to and received from the tool
    pub work_dir: PathBuf,

    /// Pass `--plain-http` to the tool (local registries)
    pub plain_http: bool,
}

impl Default for OrasConfig {
    fn default() -> Self {
        let work_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fhir-templates")
            .join("oras");
        Self {
            binary: PathBuf::from("oras"),
            work_dir,
            plain_http: false,
        }
    }
}

/// A bundled template set registered under a short alias
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultTemplateConfig {
    /// Short name, matched case-insensitively (e.g. "microsofthealth/hl7v2templates:default")
    pub alias: String,

    /// Path to the tar.gz archive holding the templates
    pub archive: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.short_ttl(), Duration::from_secs(1800));
        assert_eq!(config.long_ttl(), Some(Duration::from_secs(86400)));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_from_yaml_partial_document() {
        let yaml = r#"
short_cache_ttl_secs: 60
long_cache_ttl_secs: null
retry:
  max_attempts: 5
default_templates:
  - alias: microsofthealth/hl7v2templates:default
    archive: /opt/templates/Hl7v2DefaultTemplates.tar.gz
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.short_cache_ttl_secs, 60);
        assert_eq!(config.long_ttl(), None);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_ms, 500);
        assert_eq!(config.default_templates.len(), 1);
        assert_eq!(config.max_artifact_size_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ArtifactError::ConfigError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_long_shorter_than_short() {
        let mut config = EngineConfig::default();
        config.short_cache_ttl_secs = 600;
        config.long_cache_ttl_secs = Some(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_alias() {
        let mut config = EngineConfig::default();
        config.default_templates.push(DefaultTemplateConfig {
            alias: "  ".to_string(),
            archive: PathBuf::from("x.tar.gz"),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = EngineConfig::from_file(&tmp.path().join("missing.yaml"));
        assert!(matches!(result, Err(ArtifactError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("engine.yaml");
        std::fs::write(&path, "cache_size_limit_bytes: 1024\nlog_format: json\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_size_limit_bytes, 1024);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
