//! Catalog document types.
//!
//! All documents are decoded strictly: unknown fields are rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    #[serde(default, alias = "Apps")]
    pub apps: Vec<AppDesc>,
}

/// Where an app document comes from: a plain file, or a template rendered
/// with `data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppDesc {
    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub data: BTreeMap<String, serde_yaml::Value>,
}

/// Repository path + branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub repo: String,
    pub branch: String,
}

impl RepoRef {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    pub fn matches(&self, repo: &str, branch: &str) -> bool {
        self.repo == repo && self.branch == branch
    }
}

/// A deployable application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct App {
    pub name: String,

    /// Repository id holding the deployment manifests.
    pub deploy: String,

    #[serde(default)]
    pub builds: Vec<Build>,

    /// Extra `--build-arg` values for every build of this app.
    #[serde(default)]
    pub docker_args: Vec<String>,
}

/// One image built from a source repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Build {
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,

    /// Image name override (defaults to `source`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<String>,

    #[serde(default)]
    pub branches: Vec<BranchInfo>,

    #[serde(default)]
    pub deploy_updates: Vec<DeployUpdate>,

    #[serde(default)]
    pub docker_args: Vec<String>,
}

impl Build {
    /// Image name without registry prefix or tag.
    pub fn image_name(&self) -> &str {
        self.docker
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.source)
    }

    /// Overlay repository, if one is configured.
    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref().filter(|o| !o.is_empty())
    }
}

/// A triggerable (source branch, overlay branch, deploy branch) tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchInfo {
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,

    pub deploy: String,

    #[serde(default)]
    pub docker_tag_suffix: String,

    #[serde(default)]
    pub docker_args: Vec<String>,
}

impl BranchInfo {
    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref().filter(|o| !o.is_empty())
    }
}

/// One deploy repository mutation. When both are set, `script` runs first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_set: Option<YamlSet>,
}

impl DeployUpdate {
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Set `path` (slash-delimited) in the YAML `file` to `value`.
///
/// `${IMAGE_TAG}` in `value` is replaced by the resolved image tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlSet {
    pub file: String,
    pub path: String,
    pub value: String,
}
