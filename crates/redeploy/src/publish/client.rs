//! Minimal OCI distribution (v2) client for pushing one repository.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::credentials::RegistryCredentials;
use super::error::{PublishError, Result};
use super::layout::Descriptor;

/// Maximum length of registry error bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// Parses `Bearer realm="...",service="...",scope="..."` style headers.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }

        params.insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    Some(Challenge {
        scheme: scheme.to_lowercase(),
        params,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
enum AuthState {
    Anonymous,
    Basic,
    Bearer(String),
}

/// Client bound to one registry repository.
pub struct RegistryClient {
    http: Client,
    base: String,
    repository: String,
    credentials: Option<RegistryCredentials>,
    auth: Mutex<AuthState>,
}

impl RegistryClient {
    pub fn new(
        http: Client,
        host: &str,
        plain_http: bool,
        repository: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Self {
        let scheme = if plain_http { "http" } else { "https" };
        Self {
            http,
            base: format!("{}://{}", scheme, host),
            repository: repository.to_string(),
            credentials,
            auth: Mutex::new(AuthState::Anonymous),
        }
    }

    pub async fn blob_exists(&self, digest: &str) -> Result<bool> {
        let url = format!("{}/v2/{}/blobs/{}", self.base, self.repository, digest);
        let response = self.send(Method::HEAD, &url, Ok).await?;
        exists(response, Method::HEAD, &url).await
    }

    pub async fn manifest_exists(&self, desc: &Descriptor) -> Result<bool> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base, self.repository, desc.digest
        );
        let media_type = desc.media_type.clone();
        let response = self
            .send(Method::HEAD, &url, move |req| Ok(req.header(ACCEPT, media_type.as_str())))
            .await?;
        exists(response, Method::HEAD, &url).await
    }

    /// Monolithic upload of the file at `path`: `POST` an upload session,
    /// then `PUT ?digest=` with the file streamed as body.
    pub async fn upload_blob(&self, digest: &str, path: &Path) -> Result<()> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.base, self.repository);
        let response = self.send(Method::POST, &url, Ok).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(registry_error(response, Method::POST, &url).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PublishError::Registry {
                method: Method::POST.to_string(),
                url: url.clone(),
                status: StatusCode::ACCEPTED.as_u16(),
                message: "upload session without Location".to_string(),
            })?;

        let mut upload_url = if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}{}", self.base, location)
        };
        upload_url.push(if upload_url.contains('?') { '&' } else { '?' });
        upload_url.push_str("digest=");
        upload_url.push_str(digest);

        let response = self
            .send(Method::PUT, &upload_url, |req| {
                let (body, length) = file_body(path)?;
                Ok(req
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(CONTENT_LENGTH, length)
                    .body(body))
            })
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(registry_error(response, Method::PUT, &upload_url).await);
        }
        Ok(())
    }

    /// Stores a manifest under `reference` (a digest or a tag).
    pub async fn put_manifest(&self, reference: &str, media_type: &str, content: Bytes) -> Result<()> {
        let url = format!("{}/v2/{}/manifests/{}", self.base, self.repository, reference);
        let media_type = media_type.to_string();
        let response = self
            .send(Method::PUT, &url, move |req| {
                Ok(req
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(content.clone()))
            })
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(registry_error(response, Method::PUT, &url).await);
        }
        Ok(())
    }

    /// Sends a request, answering at most one authentication challenge.
    async fn send<F>(&self, method: Method, url: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder>,
    {
        let request = build(self.http.request(method.clone(), url))?;
        let response = self.authorize(request).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| PublishError::Auth(format!("{} {} refused without challenge", method, url)))?;
        self.authenticate(&challenge).await?;

        let request = build(self.http.request(method, url))?;
        Ok(self.authorize(request).send().await?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let state = match self.auth.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match (state, &self.credentials) {
            (AuthState::Bearer(token), _) => request.bearer_auth(token),
            (AuthState::Basic, Some(creds)) => {
                request.basic_auth(&creds.username, Some(creds.password.expose_secret()))
            }
            _ => request,
        }
    }

    async fn authenticate(&self, challenge: &Challenge) -> Result<()> {
        let state = match challenge.scheme.as_str() {
            "basic" => {
                if self.credentials.is_none() {
                    return Err(PublishError::Auth(format!(
                        "{} requires credentials",
                        self.base
                    )));
                }
                AuthState::Basic
            }
            "bearer" => AuthState::Bearer(self.fetch_token(challenge).await?),
            other => {
                return Err(PublishError::Auth(format!(
                    "unsupported challenge scheme {}",
                    other
                )))
            }
        };

        match self.auth.lock() {
            Ok(mut auth) => *auth = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        Ok(())
    }

    async fn fetch_token(&self, challenge: &Challenge) -> Result<String> {
        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| PublishError::Auth("bearer challenge without realm".to_string()))?;

        let mut query = vec![(
            "scope",
            format!("repository:{}:pull,push", self.repository),
        )];
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.clone()));
        }

        let mut request = self.http.get(realm).query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Auth(format!(
                "token request to {} failed with {}: {}",
                realm,
                status,
                truncate(&body)
            )));
        }

        let token: TokenResponse = response.json().await?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PublishError::Auth(format!("{} returned no token", realm)))
    }
}

/// Streaming body over the file at `path`, with its length.
fn file_body(path: &Path) -> Result<(Body, u64)> {
    let io_err = |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_err)?;
    let length = file.metadata().map_err(io_err)?.len();
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Ok((Body::wrap_stream(stream), length))
}

async fn exists(response: Response, method: Method, url: &str) -> Result<bool> {
    match response.status() {
        s if s.is_success() => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        _ => Err(registry_error(response, method, url).await),
    }
}

async fn registry_error(response: Response, method: Method, url: &str) -> PublishError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PublishError::Registry {
        method: method.to_string(),
        url: url.to_string(),
        status,
        message: truncate(&body),
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}
