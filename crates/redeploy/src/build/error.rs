use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::gitsync::GitError;
use crate::publish::PublishError;
use crate::yamlpatch::YamlPatchError;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to create build log: {0}")]
    Log(#[source] std::io::Error),

    #[error("Failed to fetch {repo} (branch {branch}): {source}")]
    Sync {
        repo: String,
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Build of {source_repo} has overlay {overlay} but branch {branch} names no overlay branch")]
    MissingOverlayBranch {
        source_repo: String,
        overlay: String,
        branch: String,
    },

    #[error("Failed to copy overlay file {path}: {source}")]
    Overlay {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resolve image tag: {0}")]
    Tag(#[source] GitError),

    #[error("Image build failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Deploy script failed: {0}")]
    Script(#[source] EngineError),

    #[error("Failed to update {file}: {source}")]
    YamlSet {
        file: String,
        #[source]
        source: YamlPatchError,
    },

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("Failed to commit deploy changes: {0}")]
    Commit(#[source] GitError),

    #[error("Failed to push deploy branch: {0}")]
    Push(#[source] GitError),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;
