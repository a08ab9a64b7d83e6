//! Git authentication handling.
//!
//! Credentials are resolved once at startup and turned into environment
//! variables for each transport command (clone/fetch/push).

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use super::error::{GitError, Result};

/// Escapes a value for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Credentials used for every git transport operation.
#[derive(Debug, Clone, Default)]
pub enum GitCredentials {
    #[default]
    None,
    /// Access token, answered to every credential prompt.
    Token(SecretString),
    /// Username and password.
    Basic {
        username: String,
        password: SecretString,
    },
    /// SSH with keys held by the running ssh-agent.
    SshAgent { username: String },
}

impl GitCredentials {
    /// Resolves credentials from `GIT_TOKEN`, or `GIT_USER` + `GIT_PASSWORD`,
    /// or `GIT_SSH_USER` + `SSH_AUTH_SOCK`, in that order.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(token) = var("GIT_TOKEN") {
            log::info!("setting git auth from $GIT_TOKEN");
            return GitCredentials::Token(SecretString::from(token));
        }

        if let (Some(username), Some(password)) = (var("GIT_USER"), var("GIT_PASSWORD")) {
            log::info!("setting git auth from $GIT_USER and $GIT_PASSWORD");
            return GitCredentials::Basic {
                username,
                password: SecretString::from(password),
            };
        }

        if let (Some(username), Some(_)) = (var("GIT_SSH_USER"), var("SSH_AUTH_SOCK")) {
            log::info!("setting git auth from $GIT_SSH_USER and $SSH_AUTH_SOCK");
            return GitCredentials::SshAgent { username };
        }

        GitCredentials::None
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GitCredentials::None)
    }
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so secrets are not left on disk,
/// even when the git command fails.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for one git command.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

fn askpass_script(credentials: &GitCredentials) -> Option<String> {
    match credentials {
        GitCredentials::Token(token) => Some(format!(
            "#!/bin/sh\necho '{}'\n",
            shell_escape(token.expose_secret())
        )),
        GitCredentials::Basic { username, password } => Some(format!(
            "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
            shell_escape(username),
            shell_escape(password.expose_secret())
        )),
        _ => None,
    }
}

/// Builds the auth environment for a transport command.
pub fn build_auth_env(credentials: &GitCredentials) -> Result<AuthEnv> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    if let GitCredentials::SshAgent { username } = credentials {
        env.push((
            "GIT_SSH_COMMAND".to_string(),
            format!(
                "ssh -o StrictHostKeyChecking=accept-new -l '{}'",
                shell_escape(username)
            ),
        ));
        return Ok(AuthEnv::plain(env));
    }

    let Some(script) = askpass_script(credentials) else {
        return Ok(AuthEnv::plain(env));
    };

    let askpass_path =
        std::env::temp_dir().join(format!(".git-askpass-{}.sh", uuid::Uuid::new_v4()));

    // Restrictive permissions from the start
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)
            .map_err(|e| GitError::GitAuthFailed(format!("askpass script: {}", e)))?;
        std::io::Write::write_all(&mut file, script.as_bytes())
            .map_err(|e| GitError::GitAuthFailed(format!("askpass script: {}", e)))?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &script)
            .map_err(|e| GitError::GitAuthFailed(format!("askpass script: {}", e)))?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitError::GitAuthFailed("Temp directory path contains non-UTF8 characters".to_string())
        })?
        .to_string();

    env.push(("GIT_ASKPASS".to_string(), askpass));

    Ok(AuthEnv {
        env_vars: env,
        _cleanup: cleanup,
    })
}
