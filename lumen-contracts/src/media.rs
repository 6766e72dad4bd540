use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_model::{ByteSize, CacheKey, LocalHandle, MediaKind};
use url::Url;

use crate::error::BackendResult;

/// A time-limited URL handed out by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: Url,
    pub expires_at: DateTime<Utc>,
    /// Object size when the backend reports it.
    pub size_hint: Option<ByteSize>,
}

/// Resolves a storage path plus transforms into a signed URL.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(
        &self,
        key: &CacheKey,
        expires_in: Duration,
    ) -> BackendResult<SignedUrl>;
}

/// Downloads the bytes behind a resolved URL.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Implementations must fail once more than `max_bytes` would be read.
    async fn fetch(&self, url: &Url, max_bytes: u64) -> BackendResult<Vec<u8>>;
}

/// Keeps fetched bytes somewhere local and hands back a handle to them.
#[async_trait]
pub trait BlobMaterializer: Send + Sync {
    async fn store(
        &self,
        key: &CacheKey,
        bytes: Vec<u8>,
    ) -> BackendResult<LocalHandle>;

    async fn release(&self, handle: &LocalHandle) -> BackendResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInfo {
    pub kind: MediaKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
}

/// Validates and warms bytes before they are considered usable.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    async fn decode(
        &self,
        kind: MediaKind,
        bytes: &[u8],
    ) -> BackendResult<DecodedInfo>;
}
