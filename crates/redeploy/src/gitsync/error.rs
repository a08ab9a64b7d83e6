//! Git synchronisation error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while mirroring, resetting or pushing repositories.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to create '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("Failed to push branch {branch}: {source}")]
    Push {
        branch: String,
        #[source]
        source: Box<GitError>,
    },

    #[error("Branch '{branch}' not found in {}", .mirror.display())]
    UnknownBranch { branch: String, mirror: PathBuf },

    #[error("Remote origin of {} is still {found:?} after reclone, expected {expected:?}", .mirror.display())]
    RemoteUrlDrift {
        mirror: PathBuf,
        expected: String,
        found: Option<String>,
    },

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),
}

pub type Result<T> = std::result::Result<T, GitError>;

impl GitError {
    /// Returns true for transport-level failures (network or authentication).
    pub fn is_transport(&self) -> bool {
        match self {
            GitError::GitNetworkError(_) | GitError::GitAuthFailed(_) => true,
            GitError::Clone { source, .. }
            | GitError::Fetch { source, .. }
            | GitError::Push { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
        || lower.contains("could not read from remote repository")
    {
        return GitError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return GitError::GitAuthFailed(stderr.trim().to_string());
    }

    GitError::GitOperation(stderr.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error("fatal: unable to access 'https://x/': Could not resolve host: x");
        assert!(matches!(err, GitError::GitNetworkError(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_git_error("remote: HTTP Basic: Access denied\nfatal: Authentication failed for 'https://x/'");
        assert!(matches!(err, GitError::GitAuthFailed(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_git_error("fatal: bad object HEAD\n");
        match err {
            GitError::GitOperation(msg) => assert_eq!(msg, "fatal: bad object HEAD"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_transport() {
        let err = GitError::Fetch {
            url: "https://x/repo".to_string(),
            source: Box::new(GitError::GitNetworkError("down".to_string())),
        };
        assert!(err.is_transport());
        assert!(err.to_string().contains("Failed to fetch https://x/repo"));
    }
}
