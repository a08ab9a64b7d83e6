use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration errors, fatal to the whole process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Catalog repository is mandatory (--apps-repo)")]
    MissingCatalogRepo,

    #[error("Failed to create work directory '{path}': {source}")]
    CreateWorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid setting '{name}': {reason}")]
    Invalid { name: String, reason: String },
}
