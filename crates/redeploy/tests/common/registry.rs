//! In-process OCI distribution registry speaking plain http.
//!
//! Every `/v2/` request needs the bearer token handed out by `/token`;
//! unauthenticated requests get a `WWW-Authenticate` challenge.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};

const TOKEN: &str = "fake-registry-token";

#[derive(Default)]
struct RegistryState {
    realm: String,
    delay: Option<Duration>,
    blobs: Mutex<HashMap<String, usize>>,
    manifests: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<String>>,
    token_auth: Mutex<Vec<Option<String>>>,
    uploads: AtomicUsize,
}

pub struct FakeRegistry {
    addr: SocketAddr,
    state: Arc<RegistryState>,
}

impl FakeRegistry {
    /// Serves a registry already holding `existing_blobs`.
    pub async fn start(existing_blobs: &[&str]) -> Self {
        Self::start_with_delay(existing_blobs, None).await
    }

    /// Like [`FakeRegistry::start`], answering every request after `delay`.
    pub async fn start_with_delay(existing_blobs: &[&str], delay: Option<Duration>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(RegistryState {
            realm: format!("http://{}/token", addr),
            delay,
            blobs: Mutex::new(
                existing_blobs
                    .iter()
                    .map(|digest| (digest.to_string(), 0))
                    .collect(),
            ),
            ..Default::default()
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// `host:port`, usable as the registry part of an image reference.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Uploads and manifest writes, in arrival order.
    pub fn events(&self) -> Vec<String> {
        self.state.events.lock().unwrap().clone()
    }

    /// Size received for an uploaded blob.
    pub fn blob_size(&self, digest: &str) -> Option<usize> {
        self.state.blobs.lock().unwrap().get(digest).copied()
    }

    pub fn manifest_type(&self, reference: &str) -> Option<String> {
        self.state.manifests.lock().unwrap().get(reference).cloned()
    }

    /// `Authorization` header of every token request.
    pub fn token_requests(&self) -> Vec<Option<String>> {
        self.state.token_auth.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<Arc<RegistryState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if uri.path() == "/token" {
        state.token_auth.lock().unwrap().push(authorization);
        return Json(serde_json::json!({ "token": TOKEN })).into_response();
    }

    if authorization.as_deref() != Some(format!("Bearer {}", TOKEN).as_str()) {
        let challenge = format!(
            r#"Bearer realm="{}",service="fake-registry""#,
            state.realm
        );
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)]).into_response();
    }

    let Some(rest) = uri.path().strip_prefix("/v2/") else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if let Some((repository, _)) = rest.split_once("/blobs/uploads/") {
        return match method {
            Method::POST => {
                let id = state.uploads.fetch_add(1, Ordering::SeqCst);
                let location = format!("/v2/{}/blobs/uploads/upload-{}", repository, id);
                (StatusCode::ACCEPTED, [(LOCATION, location)]).into_response()
            }
            Method::PUT => {
                let digest = uri
                    .query()
                    .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("digest=")));
                let Some(digest) = digest else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                state.events.lock().unwrap().push(format!("blob {}", digest));
                state
                    .blobs
                    .lock()
                    .unwrap()
                    .insert(digest.to_string(), body.len());
                StatusCode::CREATED.into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((_, digest)) = rest.split_once("/blobs/") {
        let known = state.blobs.lock().unwrap().contains_key(digest);
        return if known {
            StatusCode::OK.into_response()
        } else {
            StatusCode::NOT_FOUND.into_response()
        };
    }

    if let Some((_, reference)) = rest.split_once("/manifests/") {
        return match method {
            Method::HEAD => {
                let known = state.manifests.lock().unwrap().contains_key(reference);
                if known {
                    StatusCode::OK.into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }
            Method::PUT => {
                let media_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                state
                    .events
                    .lock()
                    .unwrap()
                    .push(format!("manifest {}", reference));
                state
                    .manifests
                    .lock()
                    .unwrap()
                    .insert(reference.to_string(), media_type);
                StatusCode::CREATED.into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}
