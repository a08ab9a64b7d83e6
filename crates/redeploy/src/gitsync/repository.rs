//! Mirror + worktree synchronisation.
//!
//! Each tracked directory `<dir>` is backed by a bare mirror `<dir>.git`;
//! every worktree command runs with `--git-dir=<dir>.git --work-tree=<dir>`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::auth::{build_auth_env, AuthEnv, GitCredentials};
use super::error::{classify_git_error, GitError, Result};
use super::parse::{
    describe_from, exact_annotated_tag, parse_status_porcelain, parse_tag_refs, short_hash,
    subject_line, tags_by_commit, FileStatus, TAG_REF_FORMAT,
};
use crate::config::CommitAuthor;
use crate::process::{run_captured, run_logged, CommandOutput};
use crate::runlog::RunLog;

/// Bare mirror path backing a worktree directory.
pub fn mirror_path(dir: &Path) -> PathBuf {
    let mut path = dir.as_os_str().to_owned();
    path.push(".git");
    PathBuf::from(path)
}

/// Progress of a `fetch_branch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    NeedsClone,
    NeedsFetch,
    NeedsReclone,
}

/// Commit a worktree was last reset to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub hash: String,
    pub subject: String,
}

impl CommitSummary {
    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }
}

/// Git operations shared by every run.
#[derive(Debug, Clone, Default)]
pub struct GitSync {
    credentials: GitCredentials,
    exact_tag: bool,
    author: CommitAuthor,
}

impl GitSync {
    pub fn new(credentials: GitCredentials) -> Self {
        Self {
            credentials,
            ..Default::default()
        }
    }

    /// Prefer annotated tags sitting exactly on the branch tip in [`GitSync::tag`].
    pub fn with_exact_tag(mut self, exact_tag: bool) -> Self {
        self.exact_tag = exact_tag;
        self
    }

    /// Identity used by [`GitSync::commit_all`].
    pub fn with_author(mut self, author: CommitAuthor) -> Self {
        self.author = author;
        self
    }

    /// Brings `<dir>` to the tip of `origin/<branch>` of `url`, creating or
    /// recreating the mirror as needed.
    pub async fn fetch_branch(&self, url: &str, branch: &str, dir: &Path, log: &RunLog) -> Result<()> {
        let mirror = mirror_path(dir);
        let mut state = if mirror.exists() {
            SyncState::NeedsFetch
        } else {
            SyncState::NeedsClone
        };
        let mut fresh = false;
        let mut recloned = false;

        loop {
            match state {
                SyncState::NeedsClone => {
                    log.line(format!("- cloning {} into {}", url, mirror.display()));
                    self.init_mirror(url, &mirror).await?;
                    fresh = true;
                    state = SyncState::NeedsFetch;
                }
                SyncState::NeedsFetch => {
                    let found = self.origin_url(&mirror).await?;
                    if found.as_deref() != Some(url) {
                        if recloned {
                            return Err(GitError::RemoteUrlDrift {
                                mirror,
                                expected: url.to_string(),
                                found,
                            });
                        }
                        log.line(format!(
                            "- origin of {} is {:?}, expected {}: recloning",
                            mirror.display(),
                            found,
                            url
                        ));
                        state = SyncState::NeedsReclone;
                        continue;
                    }

                    log.line(format!("- fetching {}", url));
                    match self.fetch(&mirror, log).await {
                        Ok(()) => break,
                        Err(e) if fresh => {
                            // A mirror that never fetched is useless
                            if let Err(cleanup) = remove_dir_if_exists(&mirror) {
                                tracing::warn!("failed to remove unusable mirror: {}", cleanup);
                            }
                            return Err(GitError::Clone {
                                url: url.to_string(),
                                source: Box::new(e),
                            });
                        }
                        Err(e) => {
                            return Err(GitError::Fetch {
                                url: url.to_string(),
                                source: Box::new(e),
                            })
                        }
                    }
                }
                SyncState::NeedsReclone => {
                    remove_dir_if_exists(&mirror)?;
                    remove_dir_if_exists(dir)?;
                    recloned = true;
                    state = SyncState::NeedsClone;
                }
            }
        }

        self.clean_branch(branch, dir, log).await
    }

    /// Force-checks-out `origin/<branch>` into `dir` as local branch `branch`,
    /// then removes every untracked file.
    pub async fn clean_branch(&self, branch: &str, dir: &Path, log: &RunLog) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| GitError::CreateDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let commit = self.branch_commit(dir, branch).await?;
        log.line(format!("- branch {} is on commit {}", branch, commit));

        self.worktree_git(dir, &["checkout", "--force", "-B", branch, &commit])
            .await?;
        self.worktree_git(dir, &["reset", "--hard", &commit]).await?;
        self.worktree_git(dir, &["clean", "-ffdx"]).await?;

        Ok(())
    }

    /// Abbreviated tip of `origin/<branch>`, or the name of an annotated tag
    /// on that exact commit when exact-tag mode is on.
    pub async fn tag(&self, dir: &Path, branch: &str) -> Result<String> {
        let commit = self.branch_commit(dir, branch).await?;

        if self.exact_tag {
            let refs = parse_tag_refs(&self.list_tags(dir).await?);
            if let Some(tag) = exact_annotated_tag(&refs, &commit) {
                return Ok(tag);
            }
        }

        Ok(short_hash(&commit).to_string())
    }

    /// `<tag>`, `<tag>-<depth>-g<hash>` or `<hash>` for the tip of `origin/<branch>`.
    pub async fn describe(&self, dir: &Path, branch: &str) -> Result<String> {
        let commit = self.branch_commit(dir, branch).await?;
        let tags = tags_by_commit(&parse_tag_refs(&self.list_tags(dir).await?));

        if tags.is_empty() {
            return Ok(short_hash(&commit).to_string());
        }

        let history = self
            .mirror_git(dir, &["rev-list", "--date-order", &commit])
            .await?;

        Ok(describe_from(&commit, history.lines().map(str::trim), &tags))
    }

    /// Commit currently checked out in `dir`.
    pub async fn head_commit(&self, dir: &Path) -> Result<CommitSummary> {
        let out = self
            .mirror_git(dir, &["log", "-1", "--format=%H%n%B", "HEAD"])
            .await?;
        let (hash, message) = out.split_once('\n').unwrap_or((out.as_str(), ""));

        Ok(CommitSummary {
            hash: hash.trim().to_string(),
            subject: subject_line(message).to_string(),
        })
    }

    /// Pending changes of the worktree versus HEAD.
    pub async fn status(&self, dir: &Path) -> Result<Vec<FileStatus>> {
        let out = self
            .worktree_git(dir, &["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(parse_status_porcelain(&out))
    }

    /// Stages every change and commits it; returns the new commit hash.
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<String> {
        self.worktree_git(dir, &["add", "--all"]).await?;

        let mut cmd = self.command(dir, true);
        cmd.args(["commit", "--quiet", "-m", message])
            .env("GIT_AUTHOR_NAME", &self.author.name)
            .env("GIT_AUTHOR_EMAIL", &self.author.email)
            .env("GIT_COMMITTER_NAME", &self.author.name)
            .env("GIT_COMMITTER_EMAIL", &self.author.email);
        expect_success(run_captured(&mut cmd).await.map_err(GitError::Spawn)?)?;

        let hash = self.mirror_git(dir, &["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    /// Pushes local `branch` to the same-named branch on `origin`.
    pub async fn push(&self, dir: &Path, branch: &str, log: &RunLog) -> Result<()> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        log.line(format!("- git push origin {}", refspec));

        let auth = self.auth_env()?;
        let mut cmd = self.command(dir, false);
        cmd.args(["push", "origin", &refspec]);
        apply_auth(&mut cmd, &auth);

        let output = run_logged(&mut cmd, log, "  ")
            .await
            .map_err(GitError::Spawn)?;
        drop(auth);

        expect_success(output).map(|_| ()).map_err(|e| GitError::Push {
            branch: branch.to_string(),
            source: Box::new(e),
        })
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    async fn init_mirror(&self, url: &str, mirror: &Path) -> Result<()> {
        if let Some(parent) = mirror.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GitError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut cmd = Command::new("git");
        cmd.arg("init")
            .arg("--quiet")
            .arg("--bare")
            .arg(mirror);
        expect_success(run_captured(&mut cmd).await.map_err(GitError::Spawn)?)?;

        let mut cmd = Command::new("git");
        cmd.arg(git_dir_arg(mirror))
            .args(["remote", "add", "origin", url]);
        expect_success(run_captured(&mut cmd).await.map_err(GitError::Spawn)?)?;

        Ok(())
    }

    async fn origin_url(&self, mirror: &Path) -> Result<Option<String>> {
        let mut cmd = Command::new("git");
        cmd.arg(git_dir_arg(mirror))
            .args(["config", "--get", "remote.origin.url"]);
        let output = run_captured(&mut cmd).await.map_err(GitError::Spawn)?;

        // Exit code 1 means the key is not set
        match output.status.code() {
            Some(0) => Ok(Some(output.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(classify_git_error(&output.error_text())),
        }
    }

    async fn fetch(&self, mirror: &Path, log: &RunLog) -> Result<()> {
        let auth = self.auth_env()?;

        let mut cmd = Command::new("git");
        cmd.arg(git_dir_arg(mirror))
            .args(["fetch", "--tags", "--force", "--prune", "origin"]);
        apply_auth(&mut cmd, &auth);

        let output = run_logged(&mut cmd, log, "  ")
            .await
            .map_err(GitError::Spawn)?;
        drop(auth);

        expect_success(output).map(|_| ())
    }

    async fn branch_commit(&self, dir: &Path, branch: &str) -> Result<String> {
        let spec = format!("refs/remotes/origin/{}^{{commit}}", branch);
        let mut cmd = self.command(dir, false);
        cmd.args(["rev-parse", "--verify", "--quiet", &spec]);
        let output = run_captured(&mut cmd).await.map_err(GitError::Spawn)?;

        if !output.success() {
            return Err(GitError::UnknownBranch {
                branch: branch.to_string(),
                mirror: mirror_path(dir),
            });
        }

        Ok(output.stdout.trim().to_string())
    }

    async fn list_tags(&self, dir: &Path) -> Result<String> {
        let format = format!("--format={}", TAG_REF_FORMAT);
        self.mirror_git(dir, &["for-each-ref", &format, "refs/tags"])
            .await
    }

    /// Runs a git command against the mirror of `dir` only.
    async fn mirror_git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = self.command(dir, false);
        cmd.args(args);
        expect_success(run_captured(&mut cmd).await.map_err(GitError::Spawn)?)
    }

    /// Runs a git command against the mirror and worktree of `dir`.
    async fn worktree_git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = self.command(dir, true);
        cmd.args(args);
        expect_success(run_captured(&mut cmd).await.map_err(GitError::Spawn)?)
    }

    fn command(&self, dir: &Path, with_worktree: bool) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg(git_dir_arg(&mirror_path(dir)));
        if with_worktree {
            let mut arg = OsString::from("--work-tree=");
            arg.push(dir.as_os_str());
            cmd.arg(arg).current_dir(dir);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    /// Gets authentication environment for git commands.
    fn auth_env(&self) -> Result<AuthEnv> {
        build_auth_env(&self.credentials)
    }
}

fn git_dir_arg(mirror: &Path) -> OsString {
    let mut arg = OsString::from("--git-dir=");
    arg.push(mirror.as_os_str());
    arg
}

fn apply_auth(cmd: &mut Command, auth: &AuthEnv) {
    for (key, value) in &auth.env_vars {
        cmd.env(key, value);
    }
}

fn expect_success(output: CommandOutput) -> Result<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(classify_git_error(&output.error_text()))
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(GitError::RemoveDirectory {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.org")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.org")
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?}: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn upstream(root: &Path) -> (PathBuf, String) {
        let path = root.join("upstream");
        std::fs::create_dir_all(&path).unwrap();
        git(&path, &["init", "--quiet", "-b", "main"]);
        std::fs::write(path.join("README"), "hello\n").unwrap();
        git(&path, &["add", "."]);
        git(&path, &["commit", "--quiet", "-m", "initial"]);
        let url = format!("file://{}", path.display());
        (path, url)
    }

    #[test]
    fn test_mirror_path() {
        assert_eq!(
            mirror_path(Path::new("/work/app/deploy")),
            PathBuf::from("/work/app/deploy.git")
        );
    }

    #[tokio::test]
    async fn test_fetch_branch_clones_and_checks_out() {
        let root = TempDir::new().unwrap();
        let (_upstream, url) = upstream(root.path());
        let dir = root.path().join("work/src");
        let sync = GitSync::default();
        let log = RunLog::process();

        sync.fetch_branch(&url, "main", &dir, &log).await.unwrap();

        assert!(mirror_path(&dir).is_dir());
        assert_eq!(std::fs::read_to_string(dir.join("README")).unwrap(), "hello\n");
        assert!(sync.status(&dir).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_branch_removes_untracked_and_local_edits() {
        let root = TempDir::new().unwrap();
        let (_upstream, url) = upstream(root.path());
        let dir = root.path().join("src");
        let sync = GitSync::default();
        let log = RunLog::process();

        sync.fetch_branch(&url, "main", &dir, &log).await.unwrap();
        std::fs::write(dir.join("README"), "edited\n").unwrap();
        std::fs::write(dir.join("stray.txt"), "x").unwrap();

        sync.clean_branch("main", &dir, &log).await.unwrap();

        assert_eq!(std::fs::read_to_string(dir.join("README")).unwrap(), "hello\n");
        assert!(!dir.join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_branch() {
        let root = TempDir::new().unwrap();
        let (_upstream, url) = upstream(root.path());
        let dir = root.path().join("src");
        let sync = GitSync::default();

        let err = sync
            .fetch_branch(&url, "nope", &dir, &RunLog::process())
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::UnknownBranch { ref branch, .. } if branch == "nope"));
    }

    #[tokio::test]
    async fn test_failed_first_fetch_removes_mirror() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("src");
        let url = format!("file://{}", root.path().join("missing").display());

        let err = GitSync::default()
            .fetch_branch(&url, "main", &dir, &RunLog::process())
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Clone { .. }));
        assert!(!mirror_path(&dir).exists());
    }

    #[tokio::test]
    async fn test_tag_is_short_hash() {
        let root = TempDir::new().unwrap();
        let (upstream, url) = upstream(root.path());
        let dir = root.path().join("src");
        let sync = GitSync::default();

        sync.fetch_branch(&url, "main", &dir, &RunLog::process())
            .await
            .unwrap();

        let head = git(&upstream, &["rev-parse", "HEAD"]);
        let tag = sync.tag(&dir, "main").await.unwrap();
        assert_eq!(tag, &head[..7]);
        assert_eq!(sync.tag(&dir, "main").await.unwrap(), tag);
    }

    #[tokio::test]
    async fn test_exact_tag_prefers_annotated_tag() {
        let root = TempDir::new().unwrap();
        let (upstream, url) = upstream(root.path());
        git(&upstream, &["tag", "lightweight"]);
        let dir = root.path().join("src");
        let sync = GitSync::default().with_exact_tag(true);
        let log = RunLog::process();

        sync.fetch_branch(&url, "main", &dir, &log).await.unwrap();
        let head = git(&upstream, &["rev-parse", "HEAD"]);
        assert_eq!(sync.tag(&dir, "main").await.unwrap(), &head[..7]);

        git(&upstream, &["tag", "-a", "v1.2.0", "-m", "release"]);
        sync.fetch_branch(&url, "main", &dir, &log).await.unwrap();
        assert_eq!(sync.tag(&dir, "main").await.unwrap(), "v1.2.0");
    }

    #[tokio::test]
    async fn test_commit_all_uses_author() {
        let root = TempDir::new().unwrap();
        let (_upstream, url) = upstream(root.path());
        let dir = root.path().join("deploy");
        let sync = GitSync::default().with_author(CommitAuthor {
            name: "bot".to_string(),
            email: "bot@example.org".to_string(),
        });

        sync.fetch_branch(&url, "main", &dir, &RunLog::process())
            .await
            .unwrap();
        std::fs::write(dir.join("values.yaml"), "tag: v2\n").unwrap();

        let status = sync.status(&dir).await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].path, "values.yaml");

        let hash = sync.commit_all(&dir, "auto-commit: test").await.unwrap();
        let summary = sync.head_commit(&dir).await.unwrap();
        assert_eq!(summary.hash, hash);
        assert_eq!(summary.subject, "auto-commit: test");

        let author = git(
            &mirror_path(&dir),
            &["log", "-1", "--format=%an <%ae>", "HEAD"],
        );
        assert_eq!(author, "bot <bot@example.org>");
        assert!(sync.status(&dir).await.unwrap().is_empty());
    }
}
