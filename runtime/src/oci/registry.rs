//! Native OCI registry transport.
//!
//! Uses the `oci-distribution` crate to talk to OCI-compatible registries
//! (Azure Container Registry, GHCR, Docker Hub, etc.).

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::digest;
use super::manifest::MANIFEST_MEDIA_TYPE;
use super::transport::{RegistryTransport, TransportError, TransportErrorKind, TransportResult};

/// Docker v2 manifests are accepted on pull as well; the provider validates the
/// shared fields.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    MANIFEST_MEDIA_TYPE,
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// Authentication credentials for a registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Registry transport backed by the `oci-distribution` client.
pub struct OciRegistryTransport {
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistryTransport {
    /// Create a transport speaking HTTPS with the given authentication.
    pub fn new(auth: RegistryAuth) -> Self {
        Self::with_protocol(auth, ClientProtocol::Https)
    }

    /// Create a transport speaking plain HTTP, for local test registries.
    pub fn plain_http(auth: RegistryAuth) -> Self {
        Self::with_protocol(auth, ClientProtocol::Http)
    }

    fn with_protocol(auth: RegistryAuth, protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    async fn authenticate(
        &self,
        reference: &Reference,
        operation: RegistryOperation,
    ) -> TransportResult<()> {
        self.client
            .auth(reference, &self.auth.to_oci_auth(), operation)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl RegistryTransport for OciRegistryTransport {
    async fn pull_manifest(&self, repository: &str, label: &str) -> TransportResult<Vec<u8>> {
        let reference = to_oci_reference(repository, label)?;
        let (data, _digest) = self
            .client
            .pull_manifest_raw(
                &reference,
                &self.auth.to_oci_auth(),
                ACCEPTED_MANIFEST_TYPES,
            )
            .await
            .map_err(classify)?;
        Ok(data.to_vec())
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> TransportResult<Vec<u8>> {
        let reference = to_oci_reference(repository, digest)?;
        self.authenticate(&reference, RegistryOperation::Pull).await?;

        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&reference, &descriptor, &mut data)
            .await
            .map_err(classify)?;
        Ok(data)
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> TransportResult<()> {
        let reference = to_oci_reference(repository, digest)?;
        self.authenticate(&reference, RegistryOperation::Push).await?;

        self.client
            .push_blob(&reference, data, digest)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn push_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &[u8],
    ) -> TransportResult<String> {
        let reference = to_oci_reference(repository, tag)?;
        self.authenticate(&reference, RegistryOperation::Push).await?;

        let image_manifest: OciImageManifest = serde_json::from_slice(manifest)
            .map_err(|e| TransportError::other(format!("Invalid manifest document: {}", e)))?;
        let url = self
            .client
            .push_manifest(&reference, &OciManifest::Image(image_manifest))
            .await
            .map_err(classify)?;
        tracing::debug!(url = %url, "Manifest pushed");

        // The client re-serializes the manifest, so ask the registry for the
        // digest it stored.
        self.client
            .fetch_manifest_digest(&reference, &self.auth.to_oci_auth())
            .await
            .map_err(classify)
    }
}

/// Build an `oci-distribution` reference from `registry/name` and a tag or
/// digest label.
fn to_oci_reference(repository: &str, label: &str) -> TransportResult<Reference> {
    let (registry, name) = repository.split_once('/').ok_or_else(|| {
        TransportError::other(format!("Repository '{}' has no registry part", repository))
    })?;

    if digest::is_well_formed(label) {
        Ok(Reference::with_digest(
            registry.to_string(),
            name.to_string(),
            label.to_string(),
        ))
    } else {
        Ok(Reference::with_tag(
            registry.to_string(),
            name.to_string(),
            label.to_string(),
        ))
    }
}

fn classify(error: OciDistributionError) -> TransportError {
    match &error {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => {
            TransportError::new(TransportErrorKind::Unauthorized, error.to_string())
        }
        OciDistributionError::ImageManifestNotFoundError(_) => {
            TransportError::not_found(error.to_string())
        }
        OciDistributionError::ServerError { code, .. } => {
            TransportError::from_status(*code, error.to_string())
        }
        OciDistributionError::RequestError(_) => TransportError::transient(error.to_string()),
        _ => TransportError::from_message(error.to_string()),
    }
}
