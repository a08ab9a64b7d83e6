//! Trigger matching and serialized dispatch.
//!
//! A single lock covers catalog reloads and the whole dispatch-and-build
//! sequence, so at most one trigger builds at a time and every dispatch
//! works on one consistent catalog snapshot.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::build::{Executor, RunOutcome};
use crate::catalog::{App, BranchInfo, Build, Catalog, CatalogError, CatalogLoader};

/// One build to run: the matched definitions, copied out of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildMatch {
    pub app: App,
    pub build: Build,
    pub branch: BranchInfo,
}

/// Every (app, build, branch) triggered by a push of `branch` to `repo`.
///
/// A build matches through its source repository first; only when the
/// repository is not its source is the overlay considered.
pub fn match_trigger(catalog: &Catalog, repo: &str, branch: &str) -> Vec<BuildMatch> {
    let mut matches = Vec::new();

    for app in catalog.apps() {
        for build in &app.builds {
            let branches: Vec<&BranchInfo> = if build.source == repo {
                build
                    .branches
                    .iter()
                    .filter(|b| b.source == branch)
                    .inspect(|_| {
                        tracing::info!(
                            "- matched build {} repo {}, branch {}",
                            app.name,
                            build.source,
                            branch
                        )
                    })
                    .collect()
            } else if build.overlay() == Some(repo) {
                build
                    .branches
                    .iter()
                    .filter(|b| b.overlay() == Some(branch))
                    .inspect(|_| {
                        tracing::info!(
                            "- matched build {} repo {} via overlay ({}), branch {}",
                            app.name,
                            build.source,
                            repo,
                            branch
                        )
                    })
                    .collect()
            } else {
                Vec::new()
            };

            matches.extend(branches.into_iter().map(|b| BuildMatch {
                app: app.clone(),
                build: build.clone(),
                branch: b.clone(),
            }));
        }
    }

    matches
}

/// Owns the current catalog and runs the builds each trigger selects.
pub struct Dispatcher {
    current: Mutex<Arc<Catalog>>,
    loader: CatalogLoader,
    executor: Executor,
}

impl Dispatcher {
    /// Starts with an empty catalog; call [`Dispatcher::reload`] to fill it.
    pub fn new(loader: CatalogLoader, executor: Executor) -> Self {
        Self {
            current: Mutex::new(Arc::new(Catalog::default())),
            loader,
            executor,
        }
    }

    /// Snapshot of the current catalog.
    pub async fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&*self.current.lock().await)
    }

    /// Replaces the catalog with a freshly loaded one. On failure the previous
    /// catalog stays active. Returns the number of apps loaded.
    pub async fn reload(&self) -> Result<usize, CatalogError> {
        let mut current = self.current.lock().await;
        self.reload_locked(&mut current).await
    }

    async fn reload_locked(&self, current: &mut Arc<Catalog>) -> Result<usize, CatalogError> {
        let catalog = self.loader.load().await?;
        let count = catalog.len();
        *current = Arc::new(catalog);
        Ok(count)
    }

    /// Runs every build matching a push of `branch` to `repo`, one after the
    /// other. A push to the catalog's own branch reloads it first.
    pub async fn trigger(&self, repo: &str, branch: &str) -> Vec<RunOutcome> {
        let mut current = self.current.lock().await;

        if self.loader.source().matches(repo, branch) {
            tracing::info!("catalog branch updated, reloading");
            if let Err(e) = self.reload_locked(&mut current).await {
                tracing::error!("failed to reload catalog, keeping the previous one: {}", e);
            }
        }

        let snapshot = Arc::clone(&*current);
        let matches = match_trigger(&snapshot, repo, branch);

        let mut outcomes = Vec::with_capacity(matches.len());
        for target in &matches {
            outcomes.push(self.executor.run(target).await);
        }
        outcomes
    }

    /// Resolves a clone URL to a catalog repository id and triggers it.
    /// Returns `false` if the URL matches no allowed prefix.
    pub async fn trigger_from_url(&self, url: &str, branch: &str) -> bool {
        tracing::info!("trigger from URL: {}", url);

        let repo = match self.executor.settings().cut_allowed_prefix(url) {
            Some(repo) => repo.strip_suffix(".git").unwrap_or(repo).to_string(),
            None => {
                tracing::info!("trigger ignored: prefix not allowed");
                return false;
            }
        };

        tracing::info!("trigger: {} branch {}", repo, branch);
        self.trigger(&repo, branch).await;
        true
    }
}
