//! Service settings.
//!
//! Everything here is immutable once the service is started; the only
//! mutable shared state is the catalog held by the dispatcher.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Build;
use crate::error::ConfigError;

/// How the source part of an image tag is derived from a branch tip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagMode {
    /// Abbreviated commit hash (or an exact annotated tag, see `exact_tag`).
    #[default]
    Commit,
    /// `git describe` style: `<tag>-<depth>-g<hash>`.
    Describe,
}

/// Identity used for deploy commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAuthor {
    #[serde(default = "default_author_name")]
    pub name: String,
    #[serde(default = "default_author_email")]
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: default_author_name(),
            email: default_author_email(),
        }
    }
}

fn default_author_name() -> String {
    "builder".to_string()
}

fn default_author_email() -> String {
    "builder@localhost".to_string()
}

/// Location of the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    /// Repository id, resolved through `Settings::repo_url`.
    #[serde(default)]
    pub repo: String,

    /// Branch holding the catalog.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Path of the catalog file inside the repository.
    #[serde(default = "default_catalog_file")]
    pub file: String,
}

impl Default for CatalogSource {
    fn default() -> Self {
        Self {
            repo: String::new(),
            branch: default_branch(),
            file: default_catalog_file(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_catalog_file() -> String {
    "apps.yaml".to_string()
}

/// Global service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Root of all mirrors, worktrees and build logs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Prefix turning a catalog repository id into a clone URL
    /// (e.g. `git@git.example.org:` or `https://git.example.org/`).
    #[serde(default)]
    pub git_prefix: String,

    /// Additional URL prefixes accepted on inbound triggers.
    #[serde(default)]
    pub git_allowed_prefixes: Vec<String>,

    /// Prefix of produced image names (usually `registry/namespace/`).
    #[serde(default)]
    pub image_prefix: String,

    /// `KEY=VALUE` build arguments given to every build, before the catalog's.
    #[serde(default)]
    pub docker_args: Vec<String>,

    #[serde(default)]
    pub tag_mode: TagMode,

    /// Prefer an annotated tag sitting exactly on the branch tip.
    #[serde(default)]
    pub exact_tag: bool,

    /// Public base URL of this service, used in notification links.
    #[serde(default)]
    pub builder_url: String,

    /// Image used to run deploy update scripts.
    #[serde(default = "default_script_image")]
    pub script_image: String,

    /// Number of local images kept per image repository.
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Upper bound of a whole registry publish, in seconds.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Registries spoken to over plain http.
    #[serde(default)]
    pub plain_http_registries: Vec<String>,

    #[serde(default)]
    pub commit_author: CommitAuthor,

    #[serde(default)]
    pub catalog: CatalogSource,
}

/// Work directory entries owned by the service itself.
const CATALOG_DIR: &str = "catalog";
const LOGS_DIR: &str = "logs";

/// Whether an app name would share its directory with the catalog worktree,
/// its mirror or the run logs.
pub fn is_reserved_app_name(name: &str) -> bool {
    let base = name.strip_suffix(".git").unwrap_or(name);
    base == CATALOG_DIR || base == LOGS_DIR
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_script_image() -> String {
    "alpine:3.18".to_string()
}

fn default_retention() -> usize {
    5
}

fn default_publish_timeout() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            git_prefix: String::new(),
            git_allowed_prefixes: Vec::new(),
            image_prefix: String::new(),
            docker_args: Vec::new(),
            tag_mode: TagMode::default(),
            exact_tag: false,
            builder_url: String::new(),
            script_image: default_script_image(),
            retention: default_retention(),
            publish_timeout_secs: default_publish_timeout(),
            plain_http_registries: Vec::new(),
            commit_author: CommitAuthor::default(),
            catalog: CatalogSource::default(),
        }
    }
}

impl Settings {
    /// Checks the settings that are fatal to the whole process when wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.repo.is_empty() {
            return Err(ConfigError::MissingCatalogRepo);
        }
        if self.retention == 0 {
            return Err(ConfigError::Invalid {
                name: "retention".to_string(),
                reason: "at least one image must be kept".to_string(),
            });
        }
        Ok(())
    }

    /// Creates the work directory.
    pub fn ensure_work_dir(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.work_dir).map_err(|source| ConfigError::CreateWorkDir {
            path: self.work_dir.clone(),
            source,
        })
    }

    /// Clone URL of a catalog repository id.
    pub fn repo_url(&self, repo: &str) -> String {
        format!("{}{}", self.git_prefix, repo)
    }

    /// Strips the configured prefix (then each allowed prefix) from a URL.
    /// Returns `None` if the URL matches none of them.
    pub fn cut_allowed_prefix<'a>(&self, url: &'a str) -> Option<&'a str> {
        if let Some(rest) = url.strip_prefix(self.git_prefix.as_str()) {
            return Some(rest);
        }
        self.git_allowed_prefixes
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix.as_str()))
    }

    /// Image name (without tag) produced by a build.
    pub fn image_name(&self, build: &Build) -> String {
        format!("{}{}", self.image_prefix, build.image_name())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join(LOGS_DIR)
    }

    /// Log file of a build run.
    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", run_id))
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.work_dir.join(CATALOG_DIR)
    }

    /// State of one app. Reserved names are refused when the catalog is loaded.
    pub fn app_dir(&self, app: &str) -> PathBuf {
        self.work_dir.join(app)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    /// Link to a build log, as shown in notifications.
    pub fn log_url(&self, run_id: &str) -> String {
        format!(
            "{}/build-logs/{}",
            self.builder_url.trim_end_matches('/'),
            run_id
        )
    }
}
