//! Isolated environment with upstream repositories served over `file://`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use redeploy::{
    CatalogLoader, CatalogSource, ContainerEngine, Dispatcher, Executor, GitSync, Notifier,
    Publisher, Settings,
};

use super::fakes::{FakeEngine, FakePublisher, RecordingNotifier};

/// Runs git in `dir` with a fixed identity and returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.org")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.org")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub struct TestHarness {
    temp_dir: TempDir,
    /// Upstream repositories, one per repository id.
    pub remotes: PathBuf,
    pub work_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remotes = temp_dir.path().join("remotes");
        let work_dir = temp_dir.path().join("work");
        std::fs::create_dir_all(&remotes).expect("Failed to create remotes dir");
        std::fs::create_dir_all(&work_dir).expect("Failed to create work dir");

        Self {
            temp_dir,
            remotes,
            work_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Prefix turning repository ids into upstream URLs.
    pub fn git_prefix(&self) -> String {
        format!("file://{}/", self.remotes.display())
    }

    pub fn url(&self, repo: &str) -> String {
        format!("{}{}", self.git_prefix(), repo)
    }

    pub fn repo_path(&self, repo: &str) -> PathBuf {
        self.remotes.join(repo)
    }

    /// Creates an upstream repository on `main` with one commit holding `files`.
    /// Pushes to its checked-out branch update the worktree.
    pub fn create_repo(&self, repo: &str, files: &[(&str, &str)]) -> PathBuf {
        let path = self.repo_path(repo);
        std::fs::create_dir_all(&path).expect("Failed to create repo dir");
        git(&path, &["init", "--quiet", "-b", "main"]);
        git(&path, &["config", "receive.denyCurrentBranch", "updateInstead"]);
        self.commit(repo, files, "initial");
        path
    }

    /// Writes `files` and commits them on the current branch; returns the hash.
    pub fn commit(&self, repo: &str, files: &[(&str, &str)], message: &str) -> String {
        let path = self.repo_path(repo);
        for (name, content) in files {
            let file = path.join(name);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create parent dir");
            }
            std::fs::write(&file, content).expect("Failed to write file");
        }
        git(&path, &["add", "--all"]);
        git(&path, &["commit", "--quiet", "--allow-empty", "-m", message]);
        self.head(repo)
    }

    pub fn checkout_new_branch(&self, repo: &str, branch: &str) {
        git(&self.repo_path(repo), &["checkout", "--quiet", "-b", branch]);
    }

    pub fn annotated_tag(&self, repo: &str, name: &str) {
        git(&self.repo_path(repo), &["tag", "-a", name, "-m", name]);
    }

    pub fn head(&self, repo: &str) -> String {
        git(&self.repo_path(repo), &["rev-parse", "HEAD"])
    }

    pub fn short_head(&self, repo: &str) -> String {
        self.head(repo)[..7].to_string()
    }

    pub fn last_subject(&self, repo: &str) -> String {
        git(&self.repo_path(repo), &["log", "-1", "--format=%s"])
    }

    pub fn read(&self, repo: &str, file: &str) -> String {
        std::fs::read_to_string(self.repo_path(repo).join(file)).expect("Failed to read file")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            work_dir: self.work_dir.clone(),
            git_prefix: self.git_prefix(),
            image_prefix: "registry.local/".to_string(),
            catalog: CatalogSource {
                repo: "ops/catalog".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn git_sync(&self, settings: &Settings) -> GitSync {
        GitSync::default()
            .with_exact_tag(settings.exact_tag)
            .with_author(settings.commit_author.clone())
    }

    pub fn executor(
        &self,
        settings: Settings,
        engine: &Arc<FakeEngine>,
        publisher: &Arc<FakePublisher>,
        notifier: &Arc<RecordingNotifier>,
    ) -> Executor {
        let git = self.git_sync(&settings);
        let engine: Arc<dyn ContainerEngine> = engine.clone();
        let publisher: Arc<dyn Publisher> = publisher.clone();
        let notifier: Arc<dyn Notifier> = notifier.clone();
        Executor::new(Arc::new(settings), git, engine, publisher, notifier).with_ssh_agent(None)
    }

    pub fn dispatcher(
        &self,
        settings: Settings,
        engine: &Arc<FakeEngine>,
        publisher: &Arc<FakePublisher>,
        notifier: &Arc<RecordingNotifier>,
    ) -> Dispatcher {
        let loader = CatalogLoader::new(&settings, self.git_sync(&settings));
        let executor = self.executor(settings, engine, publisher, notifier);
        Dispatcher::new(loader, executor)
    }
}
