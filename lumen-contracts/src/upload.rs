use async_trait::async_trait;
use lumen_model::MediaRecord;

use crate::error::BackendResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub chunk_count: u32,
}

/// Server-side handle for an in-progress multi-part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: String,
    pub storage_path: String,
}

/// Object storage that accepts chunked uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn begin_upload(
        &self,
        request: &UploadRequest,
    ) -> BackendResult<UploadSession>;

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u32,
        bytes: &[u8],
    ) -> BackendResult<()>;

    /// Returns the final storage path of the assembled object.
    async fn complete_upload(
        &self,
        session: &UploadSession,
    ) -> BackendResult<String>;

    async fn abort_upload(&self, session: &UploadSession) -> BackendResult<()>;
}

/// Media metadata table.
#[async_trait]
pub trait MediaRecords: Send + Sync {
    async fn find_by_hash(&self, hash: &str) -> BackendResult<Vec<MediaRecord>>;

    async fn find_by_name_and_size(
        &self,
        filename: &str,
        size_bytes: u64,
    ) -> BackendResult<Vec<MediaRecord>>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> BackendResult<Vec<MediaRecord>>;

    async fn insert(&self, record: MediaRecord) -> BackendResult<MediaRecord>;
}
