//! Chunked uploads with a duplicate gate and progress reporting.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use lumen_contracts::{
    BackendError,
    clock::Clock,
    upload::{MediaRecords, ObjectStore, UploadRequest, UploadSession},
};
use lumen_model::{ByteSize, MediaItem, MediaRecord, ProcessingStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::duplicates::{DuplicateDetector, DuplicateMatch, FileFingerprint, MatchReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Refuse any match, fuzzy name matches included.
    Reject,
    /// Refuse identical content or identical name and size only.
    #[default]
    RejectExact,
    /// Upload anyway and report the matches on the receipt.
    Allow,
}

impl DuplicatePolicy {
    fn blocks(self, reason: MatchReason) -> bool {
        match self {
            DuplicatePolicy::Reject => true,
            DuplicatePolicy::RejectExact => {
                matches!(reason, MatchReason::Hash | MatchReason::NameAndSize)
            }
            DuplicatePolicy::Allow => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size: ByteSize,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: ByteSize::from_mib(5),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl UploadConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("refusing to upload an empty file")]
    Empty,

    #[error("chunk size must be positive")]
    InvalidChunkSize,

    #[error("file has {chunks} chunks, more than a session accepts")]
    TooManyChunks { chunks: u64 },

    #[error("duplicate of {} existing upload(s)", .0.len())]
    Duplicate(Vec<DuplicateMatch>),

    #[error("{stage} failed: {source}")]
    Backend {
        stage: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("chunk {index} failed after {attempts} attempts: {source}")]
    Chunk {
        index: u32,
        attempts: u32,
        #[source]
        source: BackendError,
    },
}

/// Fixed-size split of a payload; only the last chunk may be short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: u64,
    count: u32,
}

impl ChunkPlan {
    pub fn new(total: u64, chunk_size: ByteSize) -> Result<Self, UploadError> {
        let chunk_size = chunk_size.as_bytes();
        if total == 0 {
            return Err(UploadError::Empty);
        }
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }
        let chunks = total.div_ceil(chunk_size);
        let count = u32::try_from(chunks)
            .map_err(|_| UploadError::TooManyChunks { chunks })?;
        Ok(Self {
            total,
            chunk_size,
            count,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Byte range of chunk `index`; empty past the end.
    pub fn range(&self, index: u32) -> Range<usize> {
        let start = u64::from(index)
            .saturating_mul(self.chunk_size)
            .min(self.total);
        let end = start.saturating_add(self.chunk_size).min(self.total);
        start as usize..end as usize
    }

    pub fn ranges(&self) -> impl Iterator<Item = (u32, Range<usize>)> + '_ {
        (0..self.count).map(|index| (index, self.range(index)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    #[default]
    Checking,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UploadProgress {
    pub filename: String,
    pub stage: UploadStage,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub chunks_done: u32,
    pub chunk_count: u32,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_sent as f64 / self.total_bytes as f64
        }
    }
}

/// A file waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl UploadFile {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub record: MediaRecord,
    /// Ready to hand to the preloader; `None` for unclassifiable files.
    pub item: Option<MediaItem>,
    /// Matches that were allowed through by policy.
    pub duplicates: Vec<DuplicateMatch>,
}

/// Background upload started by [`ChunkedUploader::spawn`].
#[derive(Debug)]
pub struct UploadHandle {
    pub progress: watch::Receiver<UploadProgress>,
    pub task: JoinHandle<Result<UploadReceipt, UploadError>>,
}

#[derive(Clone)]
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn MediaRecords>,
    detector: Arc<DuplicateDetector>,
    clock: Arc<dyn Clock>,
    config: Arc<UploadConfig>,
}

impl std::fmt::Debug for ChunkedUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedUploader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChunkedUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn MediaRecords>,
        detector: Arc<DuplicateDetector>,
        clock: Arc<dyn Clock>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            records,
            detector,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Run the upload on the current runtime, reporting progress on a watch
    /// channel.
    pub fn spawn(&self, file: UploadFile) -> UploadHandle {
        let (tx, rx) = watch::channel(UploadProgress {
            filename: file.filename.clone(),
            total_bytes: file.bytes.len() as u64,
            ..UploadProgress::default()
        });
        let uploader = self.clone();
        let task = tokio::spawn(async move { uploader.upload_with_progress(file, &tx).await });
        UploadHandle { progress: rx, task }
    }

    pub async fn upload(&self, file: UploadFile) -> Result<UploadReceipt, UploadError> {
        let (tx, _rx) = watch::channel(UploadProgress::default());
        self.upload_with_progress(file, &tx).await
    }

    pub async fn upload_with_progress(
        &self,
        file: UploadFile,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<UploadReceipt, UploadError> {
        let plan = ChunkPlan::new(file.bytes.len() as u64, self.config.chunk_size)?;
        progress.send_replace(UploadProgress {
            filename: file.filename.clone(),
            stage: UploadStage::Checking,
            bytes_sent: 0,
            total_bytes: plan.total(),
            chunks_done: 0,
            chunk_count: plan.count(),
        });

        let result = self.run(&file, plan, progress).await;
        progress.send_modify(|p| {
            p.stage = if result.is_ok() {
                UploadStage::Done
            } else {
                UploadStage::Failed
            };
        });
        result
    }

    async fn run(
        &self,
        file: &UploadFile,
        plan: ChunkPlan,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<UploadReceipt, UploadError> {
        let fingerprint = FileFingerprint::from_bytes(&file.filename, &file.bytes);
        let matches = self
            .detector
            .check_remote(&fingerprint, self.records.as_ref())
            .await
            .map_err(|source| UploadError::Backend {
                stage: "duplicate check",
                source,
            })?;
        let policy = self.config.duplicate_policy;
        if matches.iter().any(|m| policy.blocks(m.reason)) {
            info!(
                filename = %file.filename,
                matches = matches.len(),
                "upload rejected as duplicate"
            );
            return Err(UploadError::Duplicate(matches));
        }

        let request = UploadRequest {
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: plan.total(),
            content_hash: fingerprint.content_hash.clone(),
            chunk_count: plan.count(),
        };
        let session = self
            .store
            .begin_upload(&request)
            .await
            .map_err(|source| UploadError::Backend {
                stage: "begin upload",
                source,
            })?;
        progress.send_modify(|p| p.stage = UploadStage::Uploading);

        if let Err(err) = self.send_chunks(file, plan, &session, progress).await {
            self.abort(&session).await;
            return Err(err);
        }

        progress.send_modify(|p| p.stage = UploadStage::Finalizing);
        let storage_path = match self.store.complete_upload(&session).await {
            Ok(path) => path,
            Err(source) => {
                self.abort(&session).await;
                return Err(UploadError::Backend {
                    stage: "complete upload",
                    source,
                });
            }
        };

        let record = MediaRecord {
            id: Uuid::now_v7(),
            filename: file.filename.clone(),
            size_bytes: plan.total(),
            mime_type: file.mime_type.clone(),
            content_hash: fingerprint.content_hash,
            status: ProcessingStatus::Pending,
            storage_path,
            thumbnail_path: None,
            processed_path: None,
            created_at: self.clock.now(),
        };
        let record = self
            .records
            .insert(record)
            .await
            .map_err(|source| UploadError::Backend {
                stage: "record insert",
                source,
            })?;

        info!(
            filename = %record.filename,
            size = %ByteSize::from_bytes(record.size_bytes),
            chunks = plan.count(),
            path = %record.storage_path,
            "upload complete"
        );
        Ok(UploadReceipt {
            item: record.to_media_item(),
            record,
            duplicates: matches,
        })
    }

    async fn send_chunks(
        &self,
        file: &UploadFile,
        plan: ChunkPlan,
        session: &UploadSession,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<(), UploadError> {
        for (index, range) in plan.ranges() {
            let chunk = &file.bytes[range];
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.store.upload_chunk(session, index, chunk).await {
                    Ok(()) => break,
                    Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                        let delay = self.config.backoff(attempt);
                        debug!(
                            index,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying chunk"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(source) => {
                        warn!(index, attempt, error = %source, "chunk upload failed");
                        return Err(UploadError::Chunk {
                            index,
                            attempts: attempt,
                            source,
                        });
                    }
                }
            }
            let sent = chunk.len() as u64;
            progress.send_modify(|p| {
                p.bytes_sent += sent;
                p.chunks_done += 1;
            });
        }
        Ok(())
    }

    async fn abort(&self, session: &UploadSession) {
        if let Err(err) = self.store.abort_upload(session).await {
            debug!(session = %session.id, error = %err, "abort upload failed");
        }
    }
}
