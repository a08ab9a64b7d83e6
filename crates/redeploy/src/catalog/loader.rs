//! Loads the catalog from its git repository.

use std::path::PathBuf;

use super::error::Result;
use super::schema::RepoRef;
use super::Catalog;
use crate::config::Settings;
use crate::gitsync::GitSync;
use crate::runlog::RunLog;

/// Syncs the catalog repository and reads the catalog file from it.
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    source: RepoRef,
    url: String,
    file: String,
    dir: PathBuf,
    git: GitSync,
}

impl CatalogLoader {
    pub fn new(settings: &Settings, git: GitSync) -> Self {
        Self {
            source: RepoRef::new(&settings.catalog.repo, &settings.catalog.branch),
            url: settings.repo_url(&settings.catalog.repo),
            file: settings.catalog.file.clone(),
            dir: settings.catalog_dir(),
            git,
        }
    }

    /// Repository and branch the catalog is read from.
    pub fn source(&self) -> &RepoRef {
        &self.source
    }

    /// Fetches the catalog branch and loads a fresh catalog from it.
    pub async fn load(&self) -> Result<Catalog> {
        let log = RunLog::process();

        self.git
            .fetch_branch(&self.url, &self.source.branch, &self.dir, &log)
            .await?;
        let commit = self.git.head_commit(&self.dir).await?;

        let catalog = Catalog::load_dir(&self.dir, &self.file)?;
        tracing::info!(
            "loaded {} apps (commit {}: {})",
            catalog.len(),
            commit.short_hash(),
            commit.subject
        );

        Ok(catalog.with_commit(commit))
    }
}
