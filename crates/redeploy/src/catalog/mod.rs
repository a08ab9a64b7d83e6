//! The catalog: which apps to build from which branches, and how to deploy them.
//!
//! A catalog is loaded wholesale and replaced atomically; it is never
//! mutated in place.

pub mod error;
pub mod loader;
pub mod schema;

use std::path::{Component, Path, PathBuf};

use tera::{Context, Tera};

pub use error::CatalogError;
pub use loader::CatalogLoader;
pub use schema::{App, AppDesc, BranchInfo, Build, CatalogFile, DeployUpdate, RepoRef, YamlSet};

use crate::config::is_reserved_app_name;
use crate::gitsync::CommitSummary;
use error::Result;

/// Ordered set of apps.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    apps: Vec<App>,
    commit: Option<CommitSummary>,
}

impl Catalog {
    pub fn new(apps: Vec<App>) -> Self {
        Self { apps, commit: None }
    }

    /// Records the catalog repository commit the apps were read from.
    pub fn with_commit(mut self, commit: CommitSummary) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn commit(&self) -> Option<&CommitSummary> {
        self.commit.as_ref()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Loads `file` from `dir`, resolving every app entry against `dir`.
    ///
    /// Failing entries are logged and dropped; only an unreadable or
    /// malformed catalog file is an error.
    pub fn load_dir(dir: &Path, file: &str) -> Result<Self> {
        let content = read_in(dir, file)?;
        let catalog: CatalogFile =
            serde_yaml::from_str(&content).map_err(|source| CatalogError::ParseYaml {
                path: file.to_string(),
                source,
            })?;

        let mut apps = Vec::with_capacity(catalog.apps.len());
        for (idx, desc) in catalog.apps.iter().enumerate() {
            match load_app(dir, desc) {
                Ok(app) => apps.push(app),
                Err(e) => tracing::warn!("failed to load apps[{}]: {}", idx, e),
            }
        }

        Ok(Self::new(apps))
    }
}

/// Joins a repository-relative path onto `root`, refusing absolute paths and
/// `..` components.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let safe = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if !safe {
        return Err(CatalogError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(path))
}

fn read_in(dir: &Path, relative: &str) -> Result<String> {
    let path = safe_join(dir, relative)?;
    std::fs::read_to_string(&path).map_err(|source| CatalogError::ReadFile { path, source })
}

fn load_app(dir: &Path, desc: &AppDesc) -> Result<App> {
    let (name, content) = match (desc.file.as_deref(), desc.template.as_deref()) {
        (Some(file), None) => (file, read_in(dir, file)?),
        (None, Some(template)) => (template, render_template(dir, template, desc)?),
        _ => return Err(CatalogError::InvalidDescriptor),
    };

    let app: App = serde_yaml::from_str(&content).map_err(|source| CatalogError::ParseYaml {
        path: name.to_string(),
        source,
    })?;

    validate_app(&app)?;
    Ok(app)
}

fn render_template(dir: &Path, template: &str, desc: &AppDesc) -> Result<String> {
    let source = read_in(dir, template)?;
    let template_err = |source| CatalogError::Template {
        name: template.to_string(),
        source,
    };

    let context = Context::from_serialize(&desc.data).map_err(template_err)?;
    Tera::one_off(&source, &context, false).map_err(template_err)
}

fn validate_app(app: &App) -> Result<()> {
    let invalid = |message: &str| CatalogError::InvalidApp {
        name: app.name.clone(),
        message: message.to_string(),
    };

    if app.name.is_empty() {
        return Err(invalid("missing name"));
    }
    if Path::new(&app.name).components().count() != 1 || app.name.starts_with('.') {
        return Err(invalid("name must be a single path component"));
    }
    if is_reserved_app_name(&app.name) {
        return Err(invalid("name is reserved for service state"));
    }
    if app.deploy.is_empty() {
        return Err(invalid("missing deploy repository"));
    }

    for build in &app.builds {
        if build.source.is_empty() {
            return Err(invalid("build without source"));
        }
        safe_join(Path::new(""), &build.source)?;

        for branch in &build.branches {
            if build.overlay().is_some() && branch.overlay().is_none() {
                return Err(invalid(&format!(
                    "branch {} of {} needs an overlay branch",
                    branch.source, build.source
                )));
            }
        }

        for update in &build.deploy_updates {
            if let Some(set) = &update.yaml_set {
                safe_join(Path::new(""), &set.file)?;
            }
        }
    }

    Ok(())
}
