//! Deploy repository mutation, commit and push.

use std::path::Path;

use crate::catalog::{safe_join, DeployUpdate};
use crate::engine::{ContainerEngine, ScriptRequest};
use crate::gitsync::GitSync;
use crate::runlog::RunLog;

use super::error::{BuildError, Result};

/// Environment variable holding the new tag inside deploy scripts.
pub const IMAGE_TAG_ENV: &str = "IMAGE_TAG";

/// Runs each update in order: its script first, then its yaml_set.
pub async fn apply_updates(
    engine: &dyn ContainerEngine,
    script_image: &str,
    dir: &Path,
    updates: &[DeployUpdate],
    image_tag: &str,
    log: &RunLog,
) -> Result<()> {
    log.line("- updating deployment repository");

    for (idx, update) in updates.iter().enumerate() {
        log.line(format!("  - step {}", idx + 1));

        if let Some(script) = update.script() {
            let request = ScriptRequest {
                workdir: dir.to_path_buf(),
                image: script_image.to_string(),
                script: script.to_string(),
                env: vec![(IMAGE_TAG_ENV.to_string(), image_tag.to_string())],
            };
            engine
                .run_script(&request, log)
                .await
                .map_err(BuildError::Script)?;
        }

        if let Some(set) = &update.yaml_set {
            let file = safe_join(dir, &set.file)?;
            log.line(format!(
                "    - yaml set {}:{} to {:?} ({:?})",
                set.file,
                set.path,
                set.resolved_value(image_tag),
                set.value
            ));
            set.apply_to(&file, image_tag)
                .map_err(|source| BuildError::YamlSet {
                    file: set.file.clone(),
                    source,
                })?;
        }
    }

    Ok(())
}

/// Commits and pushes pending changes of the deploy worktree.
/// Returns the new commit, or `None` when nothing changed.
pub async fn commit_and_push(
    git: &GitSync,
    dir: &Path,
    branch: &str,
    message: &str,
    log: &RunLog,
) -> Result<Option<String>> {
    let status = git.status(dir).await.map_err(BuildError::Commit)?;
    if status.is_empty() {
        log.line("  `-> no changes made");
        return Ok(None);
    }

    log.line(format!("  {} changes:", status.len()));
    for file in &status {
        log.line(format!("  - {} {}", file.status, file.path));
    }

    let commit = git
        .commit_all(dir, message)
        .await
        .map_err(BuildError::Commit)?;
    log.line(format!("- deploy commit: {}", commit));

    git.push(dir, branch, log).await.map_err(BuildError::Push)?;
    Ok(Some(commit))
}

/// Deploy commit message.
pub fn commit_message(app: &str, source: &str, image_tag: &str) -> String {
    format!(
        "auto-commit: app {}: {}: image tag {}",
        app, source, image_tag
    )
}
