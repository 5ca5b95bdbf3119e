//! In-memory registry.
//!
//! Stores manifests and blobs per repository in process memory. Used by
//! embedders that package artifacts without a network registry, and by tests
//! to script transport failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::digest;
use super::transport::{RegistryTransport, TransportError, TransportResult};

#[derive(Default)]
struct Repository {
    /// Tag or digest → manifest bytes
    manifests: HashMap<String, Vec<u8>>,
    /// Digest → blob bytes
    blobs: HashMap<String, Vec<u8>>,
}

/// Registry transport backed by process memory.
#[derive(Default)]
pub struct MemoryTransport {
    repositories: RwLock<HashMap<String, Repository>>,
    failures: Mutex<VecDeque<TransportError>>,
    manifest_pulls: AtomicUsize,
    blob_pulls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob under `digest` without checking that the digest matches.
    pub fn insert_blob(&self, repository: &str, digest: &str, data: impl Into<Vec<u8>>) {
        self.repositories
            .write()
            .entry(repository.to_string())
            .or_default()
            .blobs
            .insert(digest.to_string(), data.into());
    }

    /// Store a manifest under `tag` and under its own digest. Returns the digest.
    pub fn insert_manifest(&self, repository: &str, tag: &str, manifest: &[u8]) -> String {
        let manifest_digest = digest::compute(manifest);
        let mut repositories = self.repositories.write();
        let repo = repositories.entry(repository.to_string()).or_default();
        repo.manifests.insert(tag.to_string(), manifest.to_vec());
        repo.manifests
            .insert(manifest_digest.clone(), manifest.to_vec());
        manifest_digest
    }

    /// Make the next transport call fail with `error`. Queued failures are
    /// consumed one per call, in order.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    pub fn manifest_pulls(&self) -> usize {
        self.manifest_pulls.load(Ordering::SeqCst)
    }

    pub fn blob_pulls(&self) -> usize {
        self.blob_pulls.load(Ordering::SeqCst)
    }

    pub fn has_blob(&self, repository: &str, digest: &str) -> bool {
        self.repositories
            .read()
            .get(repository)
            .is_some_and(|r| r.blobs.contains_key(digest))
    }

    fn take_failure(&self) -> TransportResult<()> {
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryTransport for MemoryTransport {
    async fn pull_manifest(&self, repository: &str, label: &str) -> TransportResult<Vec<u8>> {
        self.manifest_pulls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        self.repositories
            .read()
            .get(repository)
            .and_then(|r| r.manifests.get(label))
            .cloned()
            .ok_or_else(|| {
                TransportError::not_found(format!("manifest {}:{} unknown", repository, label))
            })
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> TransportResult<Vec<u8>> {
        self.blob_pulls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        self.repositories
            .read()
            .get(repository)
            .and_then(|r| r.blobs.get(digest))
            .cloned()
            .ok_or_else(|| {
                TransportError::not_found(format!("blob {}@{} unknown", repository, digest))
            })
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> TransportResult<()> {
        self.take_failure()?;
        self.insert_blob(repository, digest, data);
        Ok(())
    }

    async fn push_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &[u8],
    ) -> TransportResult<String> {
        self.take_failure()?;
        Ok(self.insert_manifest(repository, tag, manifest))
    }
}

/// Test double that cancels a token while a blob is being pulled.
#[cfg(test)]
pub(crate) struct CancelOnBlobPull {
    pub inner: std::sync::Arc<MemoryTransport>,
    pub cancel: tokio_util::sync::CancellationToken,
}

#[cfg(test)]
#[async_trait]
impl RegistryTransport for CancelOnBlobPull {
    async fn pull_manifest(&self, repository: &str, label: &str) -> TransportResult<Vec<u8>> {
        self.inner.pull_manifest(repository, label).await
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> TransportResult<Vec<u8>> {
        self.cancel.cancel();
        self.inner.pull_blob(repository, digest).await
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> TransportResult<()> {
        self.inner.push_blob(repository, digest, data).await
    }

    async fn push_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &[u8],
    ) -> TransportResult<String> {
        self.inner.push_manifest(repository, tag, manifest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::transport::TransportErrorKind;

    #[tokio::test]
    async fn test_manifest_addressable_by_tag_and_digest() {
        let transport = MemoryTransport::new();
        let manifest_digest = transport.insert_manifest("r.io/t", "v1", b"{}");

        assert_eq!(transport.pull_manifest("r.io/t", "v1").await.unwrap(), b"{}");
        assert_eq!(
            transport
                .pull_manifest("r.io/t", &manifest_digest)
                .await
                .unwrap(),
            b"{}"
        );
        assert_eq!(transport.manifest_pulls(), 2);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let transport = MemoryTransport::new();
        let err = transport.pull_blob("r.io/t", "sha256:00").await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failures_consumed_in_order() {
        let transport = MemoryTransport::new();
        transport.insert_blob("r.io/t", "sha256:ab", b"x".to_vec());
        transport.fail_next(TransportError::transient("reset"));

        assert!(transport.pull_blob("r.io/t", "sha256:ab").await.is_err());
        assert_eq!(transport.pull_blob("r.io/t", "sha256:ab").await.unwrap(), b"x");
        assert_eq!(transport.blob_pulls(), 2);
    }
}
