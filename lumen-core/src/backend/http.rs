//! Hosted storage API adapter.
//!
//! Signing goes through `POST {base}/object/sign/{bucket}/{path}`; the
//! response carries a `signedURL` relative to `base`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumen_contracts::{
    BackendError, BackendResult,
    clock::Clock,
    media::{BlobFetcher, SignedUrl, UrlResolver},
};
use lumen_model::{ByteSize, CacheKey, TransformOptions};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Storage API root, e.g. `https://project.example.co/storage/v1`.
    pub base_url: Url,
    pub bucket: String,
    #[serde(default = "HttpBackendConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpBackendConfig {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn new(base_url: Url, bucket: impl Into<String>) -> Self {
        Self {
            base_url,
            bucket: bucket.into(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<&'a TransformOptions>,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

/// Signs and downloads objects from one bucket of the hosted storage API.
#[derive(Clone)]
pub struct HttpStorageBackend {
    client: Client,
    config: Arc<HttpBackendConfig>,
    clock: Arc<dyn Clock>,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpStorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStorageBackend")
            .field("base_url", &self.config.base_url.as_str())
            .field("bucket", &self.config.bucket)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

impl HttpStorageBackend {
    pub fn new(
        config: HttpBackendConfig,
        clock: Arc<dyn Clock>,
    ) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::Transport(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: Arc::new(config),
            clock,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    pub fn has_token(&self) -> bool {
        self.token.read().is_some()
    }

    fn base(&self) -> &str {
        self.config.base_url.as_str().trim_end_matches('/')
    }

    fn sign_url(&self, key: &CacheKey) -> BackendResult<Url> {
        let raw = format!(
            "{}/object/sign/{}/{}",
            self.base(),
            self.config.bucket,
            key.path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| BackendError::Other(format!("bad sign URL {raw}: {e}")))
    }

    fn absolute(&self, signed: &str) -> BackendResult<Url> {
        let raw = if signed.starts_with("http://") || signed.starts_with("https://") {
            signed.to_string()
        } else {
            format!("{}/{}", self.base(), signed.trim_start_matches('/'))
        };
        Url::parse(&raw)
            .map_err(|e| BackendError::Decode(format!("bad signed URL {raw}: {e}")))
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(err.to_string())
    }
}

async fn status_error(path: &str, response: reqwest::Response) -> BackendError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Unauthenticated
        }
        StatusCode::NOT_FOUND => BackendError::NotFound(path.to_string()),
        _ => {
            let message = response.text().await.unwrap_or_default();
            BackendError::Http {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl UrlResolver for HttpStorageBackend {
    async fn resolve(
        &self,
        key: &CacheKey,
        expires_in: Duration,
    ) -> BackendResult<SignedUrl> {
        let Some(token) = self.token.read().clone() else {
            return Err(BackendError::Unauthenticated);
        };

        let endpoint = self.sign_url(key)?;
        let body = SignRequest {
            expires_in: expires_in.as_secs().max(1),
            transform: (!key.transforms.is_empty()).then_some(&key.transforms),
        };
        trace!(key = %key, "signing storage object");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(&key.path, response).await);
        }

        let size_hint = response
            .headers()
            .get("x-object-size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(ByteSize::from_bytes);
        let payload: SignResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let lifetime = chrono::Duration::from_std(expires_in)
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(SignedUrl {
            url: self.absolute(&payload.signed_url)?,
            expires_at: self.clock.now() + lifetime,
            size_hint,
        })
    }
}

#[async_trait]
impl BlobFetcher for HttpStorageBackend {
    async fn fetch(&self, url: &Url, max_bytes: u64) -> BackendResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(url.path(), response).await);
        }
        if let Some(len) = response.content_length()
            && len > max_bytes
        {
            return Err(BackendError::Storage(format!(
                "object of {len} bytes exceeds cap {max_bytes}"
            )));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                debug!(url = %url, max_bytes, "aborting fetch over byte cap");
                return Err(BackendError::Storage(format!(
                    "object exceeds cap {max_bytes}"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{ManualClock, fixed_now};

    async fn backend(server: &MockServer) -> HttpStorageBackend {
        let base = Url::parse(&format!("{}/storage/v1", server.uri())).unwrap();
        let clock = Arc::new(ManualClock::new(fixed_now()));
        HttpStorageBackend::new(HttpBackendConfig::new(base, "media"), clock).unwrap()
    }

    #[tokio::test]
    async fn signs_with_transform_and_resolves_relative_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/media/feed/a.jpg"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "expiresIn": 3600,
                "transform": { "width": 100 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedURL": "/object/sign/media/feed/a.jpg?token=abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        backend.set_token(Some("secret".into()));
        let key = CacheKey::new("feed/a.jpg", TransformOptions::width(100));
        let signed = backend
            .resolve(&key, Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(
            signed.url.as_str(),
            format!("{}/storage/v1/object/sign/media/feed/a.jpg?token=abc", server.uri())
        );
        assert_eq!(signed.expires_at, fixed_now() + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated_without_a_request() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;
        let err = backend
            .resolve(&CacheKey::original("a.jpg"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Unauthenticated);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn status_codes_map_to_backend_errors() {
        let server = MockServer::start().await;
        for (object, status) in [("gone.jpg", 404), ("denied.jpg", 403), ("boom.jpg", 500)] {
            Mock::given(method("POST"))
                .and(path(format!("/storage/v1/object/sign/media/{object}")))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;
        }
        let backend = backend(&server).await;
        backend.set_token(Some("t".into()));
        let ttl = Duration::from_secs(60);

        let err = backend.resolve(&CacheKey::original("gone.jpg"), ttl).await.unwrap_err();
        assert_eq!(err, BackendError::NotFound("gone.jpg".into()));
        let err = backend.resolve(&CacheKey::original("denied.jpg"), ttl).await.unwrap_err();
        assert_eq!(err, BackendError::Unauthenticated);
        let err = backend.resolve(&CacheKey::original("boom.jpg"), ttl).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Http {
                status: 500,
                message: "nope".into()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn fetch_enforces_byte_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blob"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 64]))
            .mount(&server)
            .await;
        let backend = backend(&server).await;
        let url = Url::parse(&format!("{}/blob", server.uri())).unwrap();

        assert_eq!(backend.fetch(&url, 64).await.unwrap().len(), 64);
        let err = backend.fetch(&url, 16).await.unwrap_err();
        assert!(matches!(err, BackendError::Storage(_)));
    }
}
