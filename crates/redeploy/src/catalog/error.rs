//! Catalog loading errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::gitsync::GitError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {source}")]
    ParseYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to render template '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },

    #[error("Path '{0}' escapes the repository")]
    UnsafePath(String),

    #[error("App entry must name exactly one of 'file' or 'template'")]
    InvalidDescriptor,

    #[error("Invalid app '{name}': {message}")]
    InvalidApp { name: String, message: String },

    #[error("Failed to sync catalog repository: {0}")]
    Git(#[from] GitError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
