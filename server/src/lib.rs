pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use redeploy::publish::CredentialStore;
use redeploy::{
    CatalogLoader, ContainerEngine, Dispatcher, DockerCli, Executor, GitCredentials, GitSync,
    LogNotifier, Notifier, Publisher, RegistryPublisher, Settings, SlackNotifier,
};

pub use state::AppState;

/// Build the axum Router with the webhook and build-log routes.
/// Used by `serve()` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(routes::webhook))
        .route("/build-logs/{id}", get(routes::build_log))
        .with_state(state)
}

/// Wire the docker-backed executor, registry publisher and notifier around
/// `settings`.
pub fn build_dispatcher(settings: Settings, slack_hook: Option<String>) -> anyhow::Result<Dispatcher> {
    let credentials = GitCredentials::from_env();
    if credentials.is_none() {
        tracing::warn!(
            "no git authentication defined (env GIT_TOKEN, GIT_USER and GIT_PASSWORD, or GIT_SSH_USER)"
        );
    }

    let git = GitSync::new(credentials)
        .with_exact_tag(settings.exact_tag)
        .with_author(settings.commit_author.clone());

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerCli::new());
    let publisher: Arc<dyn Publisher> = Arc::new(
        RegistryPublisher::new(engine.clone(), CredentialStore::load()?)
            .with_plain_http(settings.plain_http_registries.clone())
            .with_timeout(settings.publish_timeout()),
    );
    let notifier: Arc<dyn Notifier> = match slack_hook.filter(|h| !h.is_empty()) {
        Some(hook) => Arc::new(SlackNotifier::new(hook)),
        None => Arc::new(LogNotifier),
    };

    let loader = CatalogLoader::new(&settings, git.clone());
    let executor = Executor::new(Arc::new(settings), git, engine, publisher, notifier);
    Ok(Dispatcher::new(loader, executor))
}

/// Serve webhook and build-log requests on a bound listener until the
/// process stops.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use redeploy::CatalogSource;
    use secrecy::SecretString;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(dir: &TempDir, secret: Option<&str>) -> AppState {
        let settings = Settings {
            work_dir: dir.path().to_path_buf(),
            git_prefix: "https://git.example.org/".to_string(),
            catalog: CatalogSource {
                repo: "ops/apps".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let logs_dir = settings.logs_dir();
        let dispatcher = build_dispatcher(settings, None).unwrap();

        AppState::new(Arc::new(dispatcher), logs_dir)
            .with_webhook_secret(secret.map(|s| SecretString::from(s.to_string())))
    }

    fn post_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_webhook_rejects_wrong_secret() {
        let dir = TempDir::new().unwrap();
        let resp = build_router(test_state(&dir, Some("s3cret")))
            .oneshot(post_webhook(r#"{"secret": "nope", "ref": "refs/heads/main"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let resp = build_router(test_state(&dir, None))
            .oneshot(post_webhook("{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_ignores_tag_refs() {
        let dir = TempDir::new().unwrap();
        let resp = build_router(test_state(&dir, Some("s3cret")))
            .oneshot(post_webhook(r#"{"secret": "s3cret", "ref": "refs/tags/v1.0.0"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_accepts_branch_push() {
        let dir = TempDir::new().unwrap();
        let resp = build_router(test_state(&dir, None))
            .oneshot(post_webhook(
                r#"{"ref": "refs/heads/main", "repository": {"clone_url": "https://elsewhere.example.com/a/b.git"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_build_log_served_as_text() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, None);
        let id = uuid::Uuid::now_v7().to_string();
        std::fs::create_dir_all(&state.logs_dir).unwrap();
        std::fs::write(state.logs_dir.join(format!("{}.log", id)), "2024/05/01 12:00:00 - done\n").unwrap();

        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/build-logs/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"2024/05/01 12:00:00 - done\n");
    }

    #[tokio::test]
    async fn test_build_log_unknown_or_malformed_id() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, None);

        for uri in [
            format!("/build-logs/{}", uuid::Uuid::now_v7()),
            "/build-logs/..%2F..%2Fetc%2Fpasswd".to_string(),
            "/build-logs/not-an-id".to_string(),
        ] {
            let resp = build_router(state.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }
}
