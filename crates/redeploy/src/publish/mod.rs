//! Registry publishing: export a local image and copy it to its registry.

pub mod client;
pub mod credentials;
pub mod error;
pub mod layout;
pub mod reference;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use client::RegistryClient;
pub use credentials::{CredentialStore, RegistryCredentials};
pub use error::PublishError;
pub use layout::{Descriptor, OciLayout};
pub use reference::ImageReference;

use crate::engine::ContainerEngine;
use crate::runlog::RunLog;
use error::Result;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Copies the local `image` to its registry under the same tag.
    ///
    /// `scratch_dir` is where temporary export files may be written.
    async fn publish(&self, image: &str, scratch_dir: &Path, log: &RunLog) -> Result<()>;
}

/// Publishes through an OCI distribution registry, skipping content the
/// registry already has.
pub struct RegistryPublisher {
    engine: Arc<dyn ContainerEngine>,
    http: reqwest::Client,
    credentials: CredentialStore,
    plain_http: Vec<String>,
    timeout: Duration,
}

impl RegistryPublisher {
    pub fn new(engine: Arc<dyn ContainerEngine>, credentials: CredentialStore) -> Self {
        Self {
            engine,
            http: reqwest::Client::new(),
            credentials,
            plain_http: Vec::new(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Registries spoken to over plain http.
    pub fn with_plain_http(mut self, registries: Vec<String>) -> Self {
        self.plain_http = registries;
        self
    }

    /// Upper bound of one whole publish.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn copy(&self, image: &str, scratch_dir: &Path, log: &RunLog) -> Result<()> {
        let reference = ImageReference::parse(image)?;

        std::fs::create_dir_all(scratch_dir).map_err(|source| PublishError::Io {
            path: scratch_dir.to_path_buf(),
            source,
        })?;
        // Removed on drop, whatever the outcome
        let tmp = tempfile::Builder::new()
            .prefix("image-")
            .tempdir_in(scratch_dir)
            .map_err(|source| PublishError::Io {
                path: scratch_dir.to_path_buf(),
                source,
            })?;

        let tarball = tmp.path().join("image.tar");
        log.line(format!("- exporting {}", image));
        self.engine.save(image, &tarball, log).await?;

        let dest = tmp.path().join("layout");
        let layout = tokio::task::spawn_blocking(move || OciLayout::unpack(&tarball, &dest))
            .await
            .map_err(|e| PublishError::Layout(format!("unpack task failed: {}", e)))??;

        let root = layout.select(&reference)?;

        let credentials = self.credentials.resolve(&reference.registry).await?;
        let client = RegistryClient::new(
            self.http.clone(),
            reference.api_host(),
            self.is_plain_http(&reference.registry),
            &reference.repository,
            credentials,
        );

        log.line(format!("- pushing {}", reference));
        let session = PushSession {
            client: &client,
            layout: &layout,
            log,
        };
        session.push_root(&root, &reference.tag).await
    }

    fn is_plain_http(&self, registry: &str) -> bool {
        self.plain_http.iter().any(|r| r == registry)
    }
}

#[async_trait]
impl Publisher for RegistryPublisher {
    async fn publish(&self, image: &str, scratch_dir: &Path, log: &RunLog) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.copy(image, scratch_dir, log)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.timeout.as_secs())),
        }
    }
}

struct PushSession<'a> {
    client: &'a RegistryClient,
    layout: &'a OciLayout,
    log: &'a RunLog,
}

impl PushSession<'_> {
    /// Pushes the root manifest after everything it references.
    async fn push_root(&self, desc: &Descriptor, tag: &str) -> Result<()> {
        let content = self.read_manifest(desc).await?;

        if desc.is_index() {
            for child in layout::children(desc, &content)? {
                if child.is_index() {
                    return Err(PublishError::Layout(format!(
                        "nested index {} is not supported",
                        child.digest
                    )));
                }
                if child.is_manifest() {
                    self.push_image_manifest(&child).await?;
                } else {
                    self.push_blob(&child).await?;
                }
            }
        } else {
            self.push_manifest_blobs(desc, &content).await?;
        }

        self.log.line(format!("  - pushing {} ({})", desc.digest, tag));
        self.client
            .put_manifest(tag, &desc.media_type, content)
            .await
    }

    /// Pushes an image manifest of an index by digest.
    async fn push_image_manifest(&self, desc: &Descriptor) -> Result<()> {
        if self.client.manifest_exists(desc).await? {
            self.log.line(format!("  - skipped {}", desc.digest));
            return Ok(());
        }

        if !self.layout.has_blob(&desc.digest) {
            return Err(PublishError::Layout(format!(
                "manifest {} is neither exported nor in the registry",
                desc.digest
            )));
        }

        let content = self.read_manifest(desc).await?;
        self.push_manifest_blobs(desc, &content).await?;

        self.log.line(format!("  - pushing {}", desc.digest));
        self.client
            .put_manifest(&desc.digest, &desc.media_type, content)
            .await
    }

    async fn push_manifest_blobs(&self, desc: &Descriptor, content: &[u8]) -> Result<()> {
        for child in layout::children(desc, content)? {
            self.push_blob(&child).await?;
        }
        Ok(())
    }

    async fn read_manifest(&self, desc: &Descriptor) -> Result<Bytes> {
        self.layout.read_blob(&desc.digest).await
    }

    async fn push_blob(&self, desc: &Descriptor) -> Result<()> {
        if self.client.blob_exists(&desc.digest).await? {
            self.log.line(format!("  - skipped {}", desc.digest));
            return Ok(());
        }

        let path = self.layout.blob_path(&desc.digest)?;
        self.log.line(format!(
            "  - pushing {} ({} bytes)",
            desc.digest, desc.size
        ));
        self.client.upload_blob(&desc.digest, &path).await
    }
}
