use std::path::PathBuf;
use std::sync::Arc;

use redeploy::Dispatcher;
use secrecy::{ExposeSecret, SecretString};

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub logs_dir: PathBuf,
    webhook_secret: Option<SecretString>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, logs_dir: PathBuf) -> Self {
        Self {
            dispatcher,
            logs_dir,
            webhook_secret: None,
        }
    }

    /// Requires webhook payloads to carry `secret`. An empty secret disables the check.
    pub fn with_webhook_secret(mut self, secret: Option<SecretString>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.expose_secret().is_empty());
        self
    }

    pub fn accepts_secret(&self, provided: &str) -> bool {
        match &self.webhook_secret {
            Some(secret) => secret.expose_secret() == provided,
            None => true,
        }
    }
}
