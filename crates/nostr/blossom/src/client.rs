//! HTTP transfer against Blossom servers.

use bytes::Bytes;
use reqwest::{Method, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthAction, AuthorizationRequest, SignedAuthorization};
use crate::error::{AttemptFailure, BlobError, FailureReason, Result};
use crate::hash::{BlobHash, is_sha256_hex};

const MAX_ERROR_BODY: usize = 256;

/// One method/path combination a server may accept. `{hash}` in the path is
/// replaced with the blob hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    fn resolve(&self, hash: Option<&str>) -> String {
        match hash {
            Some(hash) => self.path.replace("{hash}", hash),
            None => self.path.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Debug, Clone)]
pub struct BlobClientConfig {
    pub request_timeout: Duration,
    /// Tried in order until one succeeds.
    pub upload_endpoints: Vec<Endpoint>,
    pub mirror_endpoints: Vec<Endpoint>,
    pub delete_endpoints: Vec<Endpoint>,
    /// Lifetime given to authorizations built for this client.
    pub auth_expiry: Duration,
}

impl Default for BlobClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            upload_endpoints: vec![
                Endpoint::new(Method::PUT, "/upload"),
                Endpoint::new(Method::POST, "/upload"),
                Endpoint::new(Method::PUT, "/media"),
            ],
            mirror_endpoints: vec![
                Endpoint::new(Method::PUT, "/mirror"),
                Endpoint::new(Method::POST, "/mirror"),
            ],
            delete_endpoints: vec![
                Endpoint::new(Method::DELETE, "/{hash}"),
                Endpoint::new(Method::DELETE, "/upload/{hash}"),
            ],
            auth_expiry: Duration::from_secs(300),
        }
    }
}

/// Where the reported content hash came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSource {
    /// The response carried a `sha256` field.
    ServerDeclared,
    /// Best-effort: a 64-hex path segment of the returned URL.
    UrlHeuristic,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub server: String,
    pub endpoint: Endpoint,
    pub url: String,
    pub server_hash: Option<String>,
    pub hash_source: HashSource,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
}

/// Result of pushing one blob to several servers.
#[derive(Debug, Clone)]
pub struct MultiServerReport {
    /// The server that accepted the upload.
    pub primary: UploadOutcome,
    pub mirrored: Vec<UploadOutcome>,
    /// Servers that took neither the upload nor the mirror, with the reason.
    pub failed: Vec<(String, String)>,
}

impl MultiServerReport {
    pub fn urls(&self) -> Vec<&str> {
        std::iter::once(self.primary.url.as_str())
            .chain(self.mirrored.iter().map(|outcome| outcome.url.as_str()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ServerDescriptor {
    url: Option<String>,
    sha256: Option<String>,
    size: Option<u64>,
    #[serde(rename = "type")]
    mime_type: Option<String>,
}

enum Payload<'a> {
    Blob { body: &'a Bytes, mime_type: &'a str },
    Json(serde_json::Value),
    Empty,
}

pub struct BlobClient {
    http: reqwest::Client,
    config: BlobClientConfig,
}

impl BlobClient {
    pub fn new(config: BlobClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| BlobError::HttpClient(error.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BlobClientConfig {
        &self.config
    }

    /// Skeleton for uploading `blob`, expiring `auth_expiry` after `now`.
    pub fn upload_authorization(
        &self,
        blob: &BlobHash,
        mime_type: Option<&str>,
        now: u64,
    ) -> AuthorizationRequest {
        let request = AuthorizationRequest::new(
            AuthAction::Upload,
            blob.hex.clone(),
            now,
            self.config.auth_expiry.as_secs(),
        )
        .size(blob.length);
        match mime_type {
            Some(mime_type) => request.mime_type(mime_type),
            None => request,
        }
    }

    pub fn delete_authorization(&self, hash: &str, now: u64) -> AuthorizationRequest {
        AuthorizationRequest::new(
            AuthAction::Delete,
            hash,
            now,
            self.config.auth_expiry.as_secs(),
        )
    }

    /// Upload `body` to `server`, trying each upload endpoint in order.
    pub async fn upload(
        &self,
        body: Bytes,
        auth: &SignedAuthorization,
        server: &str,
        mime_type: Option<&str>,
    ) -> Result<UploadOutcome> {
        let payload = Payload::Blob {
            body: &body,
            mime_type: mime_type.unwrap_or("application/octet-stream"),
        };
        let mut attempts = Vec::new();
        let outcome = self
            .first_success(
                server,
                &self.config.upload_endpoints,
                None,
                auth,
                &payload,
                &mut attempts,
            )
            .await?;
        outcome.ok_or(BlobError::AllAttemptsFailed {
            operation: "upload",
            attempts,
        })
    }

    /// Ask `server` to fetch `source_url` itself.
    pub async fn mirror(
        &self,
        source_url: &str,
        auth: &SignedAuthorization,
        server: &str,
    ) -> Result<UploadOutcome> {
        let payload = Payload::Json(json!({ "url": source_url }));
        let mut attempts = Vec::new();
        let outcome = self
            .first_success(
                server,
                &self.config.mirror_endpoints,
                None,
                auth,
                &payload,
                &mut attempts,
            )
            .await?;
        outcome.ok_or(BlobError::AllAttemptsFailed {
            operation: "mirror",
            attempts,
        })
    }

    pub async fn delete(&self, hash: &str, auth: &SignedAuthorization, server: &str) -> Result<()> {
        let base = normalize_server(server)?;
        let header = auth.header_value()?;
        let mut attempts = Vec::new();
        for endpoint in &self.config.delete_endpoints {
            let url = format!("{}{}", base, endpoint.resolve(Some(hash)));
            match self.send(endpoint, &url, &header, &Payload::Empty).await {
                Ok(_) => {
                    info!("deleted {} via {} on {}", hash, endpoint, base);
                    return Ok(());
                }
                Err(reason) => {
                    warn!("{} {} failed: {}", endpoint.method, url, reason);
                    attempts.push(AttemptFailure {
                        server: base.clone(),
                        endpoint: endpoint.clone(),
                        reason,
                    });
                }
            }
        }
        Err(BlobError::AllAttemptsFailed {
            operation: "delete",
            attempts,
        })
    }

    /// Upload to the first server that accepts the blob, then mirror it to the rest.
    pub async fn upload_to_servers<S: AsRef<str>>(
        &self,
        body: Bytes,
        auth: &SignedAuthorization,
        servers: &[S],
        mime_type: Option<&str>,
    ) -> Result<MultiServerReport> {
        if servers.is_empty() {
            return Err(BlobError::NoServers);
        }
        let payload = Payload::Blob {
            body: &body,
            mime_type: mime_type.unwrap_or("application/octet-stream"),
        };

        let mut attempts = Vec::new();
        let mut failed = Vec::new();
        let mut primary = None;
        let mut remaining = Vec::new();
        for server in servers {
            let server = server.as_ref();
            if primary.is_some() {
                remaining.push(server);
                continue;
            }
            let before = attempts.len();
            match self
                .first_success(
                    server,
                    &self.config.upload_endpoints,
                    None,
                    auth,
                    &payload,
                    &mut attempts,
                )
                .await
            {
                Ok(Some(outcome)) => primary = Some(outcome),
                Ok(None) => failed.push((server.to_string(), render(&attempts[before..]))),
                Err(error) => failed.push((server.to_string(), error.to_string())),
            }
        }

        let Some(primary) = primary else {
            return Err(BlobError::AllAttemptsFailed {
                operation: "upload",
                attempts,
            });
        };

        let mut mirrored = Vec::new();
        for server in remaining {
            match self.mirror(&primary.url, auth, server).await {
                Ok(outcome) => mirrored.push(outcome),
                Err(error) => {
                    debug!("mirror of {} to {} failed: {}", primary.url, server, error);
                    failed.push((server.to_string(), error.to_string()));
                }
            }
        }

        Ok(MultiServerReport {
            primary,
            mirrored,
            failed,
        })
    }

    /// Walk `endpoints` against one server, recording each failure in `attempts`.
    async fn first_success(
        &self,
        server: &str,
        endpoints: &[Endpoint],
        hash: Option<&str>,
        auth: &SignedAuthorization,
        payload: &Payload<'_>,
        attempts: &mut Vec<AttemptFailure>,
    ) -> Result<Option<UploadOutcome>> {
        let base = normalize_server(server)?;
        let header = auth.header_value()?;

        for endpoint in endpoints {
            let url = format!("{}{}", base, endpoint.resolve(hash));
            let result = match self.send(endpoint, &url, &header, payload).await {
                Ok(body) => parse_descriptor(&body),
                Err(reason) => Err(reason),
            };
            match result {
                Ok(descriptor) => {
                    let outcome = into_outcome(&base, endpoint, descriptor);
                    info!(
                        "{} accepted via {} ({:?} hash)",
                        base, endpoint, outcome.hash_source
                    );
                    return Ok(Some(outcome));
                }
                Err(reason) => {
                    warn!("{} {} failed: {}", endpoint.method, url, reason);
                    attempts.push(AttemptFailure {
                        server: base.clone(),
                        endpoint: endpoint.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(None)
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        url: &str,
        authorization: &str,
        payload: &Payload<'_>,
    ) -> std::result::Result<Bytes, FailureReason> {
        let mut request = self
            .http
            .request(endpoint.method.clone(), url)
            .header(header::AUTHORIZATION, authorization);
        request = match payload {
            Payload::Blob { body, mime_type } => request
                .header(header::CONTENT_TYPE, *mime_type)
                .body((*body).clone()),
            Payload::Json(value) => request.json(value),
            Payload::Empty => request,
        };

        let response = request
            .send()
            .await
            .map_err(|error| FailureReason::Transport(error.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| FailureReason::Transport(error.to_string()))?;
        if !status.is_success() {
            return Err(FailureReason::Status {
                status: status.as_u16(),
                body: error_body(status, &body),
            });
        }
        Ok(body)
    }
}

fn parse_descriptor(body: &[u8]) -> std::result::Result<ServerDescriptor, FailureReason> {
    let descriptor: ServerDescriptor = serde_json::from_slice(body)
        .map_err(|error| FailureReason::InvalidResponse(error.to_string()))?;
    match descriptor.url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(descriptor),
        _ => Err(FailureReason::InvalidResponse(
            "response has no url".to_string(),
        )),
    }
}

fn into_outcome(server: &str, endpoint: &Endpoint, descriptor: ServerDescriptor) -> UploadOutcome {
    let url = descriptor.url.unwrap_or_default();
    let declared = descriptor
        .sha256
        .filter(|hash| is_sha256_hex(hash))
        .map(|hash| hash.to_ascii_lowercase());
    let (server_hash, hash_source) = match declared {
        Some(hash) => (Some(hash), HashSource::ServerDeclared),
        None => match hash_from_url(&url) {
            Some(hash) => (Some(hash), HashSource::UrlHeuristic),
            None => (None, HashSource::Unknown),
        },
    };
    UploadOutcome {
        server: server.to_string(),
        endpoint: endpoint.clone(),
        url,
        server_hash,
        hash_source,
        size: descriptor.size,
        mime_type: descriptor.mime_type,
    }
}

/// Best-effort hash recovery: the last 64-hex path segment of `url`, ignoring
/// a file extension. Never preferred over a declared hash.
pub fn hash_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter_map(|segment| {
            let stem = segment.split('.').next().unwrap_or(segment);
            is_sha256_hex(stem).then(|| stem.to_ascii_lowercase())
        })
        .next_back()
}

pub(crate) fn normalize_server(server: &str) -> Result<String> {
    let trimmed = server.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|_| BlobError::InvalidServer(server.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(BlobError::InvalidServer(server.to_string()));
    }
    Ok(trimmed.to_string())
}

fn error_body(status: StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return status.canonical_reason().unwrap_or_default().to_string();
    }
    text.chars().take(MAX_ERROR_BODY).collect()
}

fn render(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
