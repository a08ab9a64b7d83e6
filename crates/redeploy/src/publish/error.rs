//! Registry publishing errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid image reference '{0}'")]
    InvalidReference(String),

    #[error("Failed to export image: {0}")]
    Export(#[from] EngineError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid image layout: {0}")]
    Layout(String),

    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status} for {method} {url}: {message}")]
    Registry {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error("Registry authentication failed: {0}")]
    Auth(String),

    #[error("Failed to read registry credentials: {0}")]
    Credentials(String),

    #[error("Publish timed out after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, PublishError>;
