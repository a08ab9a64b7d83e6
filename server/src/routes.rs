use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

/// Push event, as sent by Gitea/GitHub style hooks.
#[derive(Debug, Deserialize)]
pub struct PushEvent {
    #[serde(default)]
    pub secret: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub repository: PushRepository,
}

#[derive(Debug, Default, Deserialize)]
pub struct PushRepository {
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub ssh_url: String,
}

impl PushEvent {
    /// Branch name when the ref is `refs/heads/<branch>`.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .strip_prefix("refs/heads/")
            .filter(|b| !b.is_empty())
    }

    /// Candidate URLs, in the order they are tried.
    pub fn urls(&self) -> Vec<String> {
        [&self.repository.clone_url, &self.repository.ssh_url]
            .into_iter()
            .filter(|u| !u.is_empty())
            .cloned()
            .collect()
    }
}

/// POST /webhook - accept a push event and trigger matching builds in the background.
pub async fn webhook(State(app): State<AppState>, body: Bytes) -> Response {
    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if !app.accepts_secret(&event.secret) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(branch) = event.branch().map(str::to_string) else {
        tracing::info!("webhook ignored: ref is not a branch: {}", event.git_ref);
        return StatusCode::OK.into_response();
    };

    let urls = event.urls();
    let dispatcher = app.dispatcher.clone();
    tokio::spawn(async move {
        for url in urls {
            if dispatcher.trigger_from_url(&url, &branch).await {
                break;
            }
        }
    });

    StatusCode::OK.into_response()
}

/// GET /build-logs/{id} - plain text log of one run.
pub async fn build_log(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(run_id) = Uuid::parse_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = app.logs_dir.join(format!("{}.log", run_id.hyphenated()));
    match tokio::fs::read(&path).await {
        Ok(content) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
