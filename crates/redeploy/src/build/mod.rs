//! One build-and-deploy run per dispatched match.

pub mod deploy;
pub mod error;
pub mod overlay;
pub mod retention;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info_span, Instrument};
use uuid::Uuid;

pub use error::BuildError;

use crate::catalog::{safe_join, App, BranchInfo, Build};
use crate::config::Settings;
use crate::dispatch::BuildMatch;
use crate::engine::{BuildRequest, ContainerEngine};
use crate::gitsync::GitSync;
use crate::notify::Notifier;
use crate::publish::Publisher;
use crate::runlog::RunLog;
use crate::tagging::{ImageTags, TagResolver};
use error::Result;

/// State of one run: the matched definitions, its id and its log.
#[derive(Debug)]
pub struct BuildRun {
    pub id: String,
    pub app: App,
    pub build: Build,
    pub branch: BranchInfo,
    pub log: RunLog,
}

impl BuildRun {
    /// Allocates a time-ordered id and opens the run's log file.
    pub fn start(settings: &Settings, target: &BuildMatch) -> (String, Result<Self>) {
        let id = Uuid::now_v7().to_string();
        let run = RunLog::create(&settings.logs_dir(), &id)
            .map(|log| Self {
                id: id.clone(),
                app: target.app.clone(),
                build: target.build.clone(),
                branch: target.branch.clone(),
                log,
            })
            .map_err(BuildError::Log);
        (id, run)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Full image reference, tag included.
    pub image: String,
    pub tags: ImageTags,
    /// `false` when the image already existed locally.
    pub built: bool,
    /// Deploy commit, `None` when the deploy repository was left unchanged.
    pub deploy_commit: Option<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub result: Result<RunReport>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs builds against one container engine, registry and notifier.
pub struct Executor {
    settings: Arc<Settings>,
    git: GitSync,
    engine: Arc<dyn ContainerEngine>,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
    ssh_agent: Option<String>,
}

impl Executor {
    pub fn new(
        settings: Arc<Settings>,
        git: GitSync,
        engine: Arc<dyn ContainerEngine>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ssh_agent = std::env::var("SSH_AUTH_SOCK")
            .ok()
            .filter(|sock| !sock.is_empty());

        Self {
            settings,
            git,
            engine,
            publisher,
            notifier,
            ssh_agent,
        }
    }

    /// ssh-agent socket forwarded to image builds.
    pub fn with_ssh_agent(mut self, ssh_agent: Option<String>) -> Self {
        self.ssh_agent = ssh_agent;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs one match to completion or first error, then notifies exactly once.
    pub async fn run(&self, target: &BuildMatch) -> RunOutcome {
        let (run_id, run) = BuildRun::start(&self.settings, target);

        let prefix = format!(
            "[{}]({}) running {}/{} (branch {})",
            run_id,
            self.settings.log_url(&run_id),
            target.app.name,
            target.build.source,
            target.branch.source
        );

        let result = match run {
            Ok(run) => {
                let span = info_span!(
                    "build_run",
                    run = %run.id,
                    app = %run.app.name,
                    source = %run.build.source,
                    branch = %run.branch.source,
                );
                let result = self.execute(&run).instrument(span).await;
                if let Err(e) = &result {
                    run.log.line(format!("- failed: {}", e));
                }
                result
            }
            Err(e) => {
                tracing::error!(run = %run_id, "{}", e);
                Err(e)
            }
        };

        let message = match &result {
            Ok(_) => format!("{} successful", prefix),
            Err(e) => format!("{} failed: {}", prefix, e),
        };
        self.notifier.notify(&message).await;

        RunOutcome { run_id, result }
    }

    async fn execute(&self, run: &BuildRun) -> Result<RunReport> {
        let settings = &self.settings;
        let (app, build, branch, log) = (&run.app, &run.build, &run.branch, &run.log);

        let app_dir = settings.app_dir(&app.name);
        let base_dir = safe_join(&app_dir.join("builds"), &build.source)?;
        let src_dir = base_dir.join("src");

        // Step 1: Sync source
        self.fetch(&build.source, &branch.source, &src_dir, log).await?;

        // Step 2: Sync overlay and merge it onto the source tree
        let overlay = match build.overlay() {
            Some(overlay_repo) => {
                let overlay_branch = branch.overlay().ok_or_else(|| {
                    BuildError::MissingOverlayBranch {
                        source_repo: build.source.clone(),
                        overlay: overlay_repo.to_string(),
                        branch: branch.source.clone(),
                    }
                })?;
                let overlay_dir = base_dir.join("overlay");
                self.fetch(overlay_repo, overlay_branch, &overlay_dir, log).await?;
                self.merge_overlay(&overlay_dir, &src_dir, log).await?;
                Some((overlay_dir, overlay_branch))
            }
            None => None,
        };

        // Step 3: Resolve tags
        let resolver = TagResolver::new(self.git.clone(), settings.tag_mode);
        let tags = resolver
            .resolve(
                (src_dir.as_path(), branch.source.as_str()),
                overlay.as_ref().map(|(dir, b)| (dir.as_path(), *b)),
                &branch.docker_tag_suffix,
            )
            .await
            .map_err(BuildError::Tag)?;

        let repository = settings.image_name(build);
        let image = format!("{}:{}", repository, tags.image);

        // Step 4: Build, unless the exact image already exists
        let built = if self.engine.image_exists(&image).await? {
            log.line(format!("image {} already exists, not rebuilding.", image));
            false
        } else {
            let request = BuildRequest {
                context: src_dir.clone(),
                image: image.clone(),
                build_args: build_args(&tags, &settings.docker_args, app, build, branch),
                ssh_agent: self.ssh_agent.clone(),
            };
            self.engine.build(&request, log).await?;
            true
        };

        // Step 5: Publish
        self.publisher.publish(&image, &app_dir, log).await?;

        // Step 6: Retention
        retention::prune_images(self.engine.as_ref(), &repository, settings.retention, log).await;

        // Step 7: Update the deployment
        let deploy_dir = app_dir.join("deploy");
        self.fetch(&app.deploy, &branch.deploy, &deploy_dir, log).await?;
        deploy::apply_updates(
            self.engine.as_ref(),
            &settings.script_image,
            &deploy_dir,
            &build.deploy_updates,
            &tags.image,
            log,
        )
        .await?;

        // Step 8: Commit and push
        let message = deploy::commit_message(&app.name, &build.source, &tags.image);
        let deploy_commit =
            deploy::commit_and_push(&self.git, &deploy_dir, &branch.deploy, &message, log).await?;

        Ok(RunReport {
            image,
            tags,
            built,
            deploy_commit,
        })
    }

    async fn fetch(&self, repo: &str, branch: &str, dir: &Path, log: &RunLog) -> Result<()> {
        let url = self.settings.repo_url(repo);
        self.git
            .fetch_branch(&url, branch, dir, log)
            .await
            .map_err(|source| BuildError::Sync {
                repo: repo.to_string(),
                branch: branch.to_string(),
                source,
            })
    }

    async fn merge_overlay(&self, overlay_dir: &Path, src_dir: &Path, log: &RunLog) -> Result<()> {
        log.line(format!("- copying overlay from {}", overlay_dir.display()));

        let (from, to): (PathBuf, PathBuf) = (overlay_dir.into(), src_dir.into());
        let copied = tokio::task::spawn_blocking(move || overlay::copy_tree(&from, &to))
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;

        for file in copied {
            log.line(format!(
                "  - overlay copy: {} (mode: {:04o})",
                file.path.display(),
                file.mode
            ));
        }
        Ok(())
    }
}

/// `KEY=VALUE` build arguments: the tags, then global, app, build and branch
/// extras in that order, unmodified.
pub fn build_args(
    tags: &ImageTags,
    global: &[String],
    app: &App,
    build: &Build,
    branch: &BranchInfo,
) -> Vec<String> {
    let mut args = vec![
        format!("GIT_TAG={}", tags.source),
        format!("IMAGE_TAG={}", tags.image),
    ];
    if let Some(overlay) = &tags.overlay {
        args.push(format!("OVERLAY_TAG={}", overlay));
    }

    args.extend(global.iter().cloned());
    args.extend(app.docker_args.iter().cloned());
    args.extend(build.docker_args.iter().cloned());
    args.extend(branch.docker_args.iter().cloned());
    args
}
