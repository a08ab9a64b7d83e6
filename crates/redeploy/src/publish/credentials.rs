//! Registry credentials from the container engine's client config.
//!
//! Lookup order per registry: `credHelpers[registry]`, then `credsStore`,
//! then `auths[registry]`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine as _;
use secrecy::SecretString;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::error::{PublishError, Result};

/// Username + password (or token) for one registry.
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperReply {
    username: String,
    secret: String,
}

/// Parsed client config.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    config: DockerConfig,
}

impl CredentialStore {
    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        match std::env::var_os("DOCKER_CONFIG") {
            Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir).join("config.json")),
            _ => dirs::home_dir().map(|h| h.join(".docker").join("config.json")),
        }
    }

    /// Loads the default config; a missing file yields an empty store.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(PublishError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config = serde_json::from_str(content)
            .map_err(|e| PublishError::Credentials(format!("invalid config.json: {}", e)))?;
        Ok(Self { config })
    }

    /// Credentials for `registry`, if any are configured.
    pub async fn resolve(&self, registry: &str) -> Result<Option<RegistryCredentials>> {
        let keys = server_keys(registry);

        if let Some(helper) = keys
            .iter()
            .find_map(|k| self.config.cred_helpers.get(k.as_str()))
        {
            return run_helper(helper, &keys[0]).await;
        }

        if let Some(store) = self.config.creds_store.as_deref().filter(|s| !s.is_empty()) {
            if let Some(creds) = run_helper(store, &keys[0]).await? {
                return Ok(Some(creds));
            }
        }

        match keys.iter().find_map(|k| self.config.auths.get(k.as_str())) {
            Some(entry) => decode_entry(entry),
            None => Ok(None),
        }
    }
}

/// Keys a registry may be stored under, the canonical one first.
fn server_keys(registry: &str) -> Vec<String> {
    if matches!(
        registry,
        "docker.io" | "index.docker.io" | "registry-1.docker.io"
    ) {
        return vec![
            "https://index.docker.io/v1/".to_string(),
            "index.docker.io".to_string(),
            "docker.io".to_string(),
            "registry-1.docker.io".to_string(),
        ];
    }

    vec![
        registry.to_string(),
        format!("https://{}", registry),
        format!("http://{}", registry),
    ]
}

fn decode_entry(entry: &AuthEntry) -> Result<Option<RegistryCredentials>> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth.trim())
            .map_err(|e| PublishError::Credentials(format!("invalid auth entry: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| PublishError::Credentials("auth entry is not UTF-8".to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| PublishError::Credentials("auth entry lacks ':'".to_string()))?;

        return Ok(Some(RegistryCredentials {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
        }));
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(RegistryCredentials {
            username: username.clone(),
            password: SecretString::from(password.clone()),
        })),
        _ => Ok(None),
    }
}

/// Asks `docker-credential-<helper>` for the credentials of `server`.
async fn run_helper(helper: &str, server: &str) -> Result<Option<RegistryCredentials>> {
    let program = format!("docker-credential-{}", helper);
    let helper_err = |message: String| PublishError::Credentials(format!("{}: {}", program, message));

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| helper_err(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server.as_bytes())
            .await
            .map_err(|e| helper_err(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| helper_err(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if stdout.to_lowercase().contains("credentials not found") {
            return Ok(None);
        }
        return Err(helper_err(stdout.trim().to_string()));
    }

    let reply: HelperReply =
        serde_json::from_str(&stdout).map_err(|e| helper_err(format!("invalid reply: {}", e)))?;

    Ok(Some(RegistryCredentials {
        username: reply.username,
        password: SecretString::from(reply.secret),
    }))
}
