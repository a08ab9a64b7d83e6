//! Container engine seam: image builds, exports, retention and deploy scripts.

mod docker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use docker::DockerCli;

use crate::runlog::RunLog;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unexpected output from {command}: {message}")]
    UnexpectedOutput { command: String, message: String },

    #[error("Invalid path '{path}': {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// An image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build context directory.
    pub context: PathBuf,
    /// Full reference of the produced image.
    pub image: String,
    /// `KEY=VALUE` build arguments, passed through in order.
    pub build_args: Vec<String>,
    /// ssh-agent socket forwarded to the build, if any.
    pub ssh_agent: Option<String>,
}

/// A deploy script run in a disposable container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Directory mounted as the container's working directory.
    pub workdir: PathBuf,
    pub image: String,
    pub script: String,
    pub env: Vec<(String, String)>,
}

/// A locally tagged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    /// `repository:tag`.
    pub reference: String,
    pub id: String,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether an image with exactly this reference exists locally.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    async fn build(&self, request: &BuildRequest, log: &RunLog) -> Result<()>;

    /// Exports an image as a tar archive (OCI image layout).
    async fn save(&self, reference: &str, path: &Path, log: &RunLog) -> Result<()>;

    /// Tagged local images of one repository.
    async fn list_images(&self, repository: &str) -> Result<Vec<LocalImage>>;

    async fn remove_image(&self, reference: &str) -> Result<()>;

    async fn run_script(&self, request: &ScriptRequest, log: &RunLog) -> Result<()>;
}

/// Images to remove so that only the `keep` most recently created remain,
/// oldest first.
pub fn select_expired(mut images: Vec<LocalImage>, keep: usize) -> Vec<LocalImage> {
    if images.len() <= keep {
        return Vec::new();
    }

    images.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.reference.cmp(&b.reference))
    });
    let expired = images.len() - keep;
    images.truncate(expired);
    images
}
