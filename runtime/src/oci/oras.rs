//! Subprocess registry transport.
//!
//! Drives the `oras` command-line tool. Manifest and blob bytes travel over
//! stdout; pushed content is staged in the configured work directory. Digests
//! are recovered from the tool's output and failures are classified from its
//! stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fhir_templates_core::config::OrasConfig;
use tokio::process::Command;

use super::digest;
use super::transport::{RegistryTransport, TransportError, TransportResult};

/// Registry transport that shells out to `oras`.
#[derive(Debug, Clone)]
pub struct OrasTransport {
    binary: PathBuf,
    work_dir: PathBuf,
    plain_http: bool,
}

impl OrasTransport {
    pub fn new(config: &OrasConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            work_dir: config.work_dir.clone(),
            plain_http: config.plain_http,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run the tool with `args`, returning stdout.
    async fn run(&self, args: &[&str]) -> TransportResult<Vec<u8>> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        if self.plain_http {
            command.arg("--plain-http");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary.display(), args = ?args, "Running oras");
        let output = command.output().await.map_err(|e| {
            TransportError::other(format!(
                "Failed to run {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("oras exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(TransportError::from_message(message));
        }
        Ok(output.stdout)
    }

    /// Write `data` to a staging file in the work directory.
    async fn stage(&self, name: &str, data: &[u8]) -> TransportResult<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| {
                TransportError::other(format!(
                    "Failed to create work directory {}: {}",
                    self.work_dir.display(),
                    e
                ))
            })?;
        let path = self.work_dir.join(name);
        tokio::fs::write(&path, data).await.map_err(|e| {
            TransportError::other(format!("Failed to stage {}: {}", path.display(), e))
        })?;
        Ok(path)
    }
}

#[async_trait]
impl RegistryTransport for OrasTransport {
    async fn pull_manifest(&self, repository: &str, label: &str) -> TransportResult<Vec<u8>> {
        let target = target(repository, label);
        self.run(&["manifest", "fetch", &target]).await
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> TransportResult<Vec<u8>> {
        let target = target(repository, digest);
        self.run(&["blob", "fetch", "--output", "-", &target]).await
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> TransportResult<()> {
        let path = self
            .stage(&format!("{}.blob", digest::hex_part(digest)), data)
            .await?;
        let target = target(repository, digest);
        let file = path.to_string_lossy();
        let result = self.run(&["blob", "push", &target, &file]).await;
        let _ = tokio::fs::remove_file(&path).await;
        result.map(|_| ())
    }

    async fn push_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &[u8],
    ) -> TransportResult<String> {
        let local_digest = digest::compute(manifest);
        let path = self
            .stage(
                &format!("{}.manifest.json", digest::hex_part(&local_digest)),
                manifest,
            )
            .await?;
        let target = target(repository, tag);
        let file = path.to_string_lossy();
        let result = self.run(&["manifest", "push", &target, &file]).await;
        let _ = tokio::fs::remove_file(&path).await;

        let stdout = result?;
        Ok(pushed_digest(&String::from_utf8_lossy(&stdout)).unwrap_or(local_digest))
    }
}

/// `repo@digest` for digests, `repo:tag` otherwise.
fn target(repository: &str, label: &str) -> String {
    if digest::is_well_formed(label) {
        format!("{}@{}", repository, label)
    } else {
        format!("{}:{}", repository, label)
    }
}

/// Manifest digest reported by `oras manifest push`. The tool prints it last.
fn pushed_digest(output: &str) -> Option<String> {
    digest::extract_all(output).pop()
}
