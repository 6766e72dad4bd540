use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cacache::Integrity;
use lumen_contracts::{BackendError, BackendResult, media::BlobMaterializer};
use lumen_model::{CacheKey, LocalHandle};

/// Blob store over `cacache`, addressed by the cache key.
///
/// The returned handle carries the content integrity so reads are verified
/// and a stale index entry can never hand back different bytes.
#[derive(Clone)]
pub struct CacacheMaterializer {
    root: PathBuf,
}

impl fmt::Debug for CacacheMaterializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacacheMaterializer").field(&self.root).finish()
    }
}

fn map_cacache(op: &'static str, err: cacache::Error) -> BackendError {
    match err {
        cacache::Error::EntryNotFound(_, key) => {
            BackendError::NotFound(format!("cache entry not found: {key}"))
        }
        cacache::Error::IntegrityError(err) => BackendError::Storage(format!(
            "cache entry failed integrity check ({err})"
        )),
        cacache::Error::SizeMismatch(wanted, actual) => BackendError::Storage(
            format!("cache entry size mismatch: wanted={wanted}, actual={actual}"),
        ),
        cacache::Error::IoError(_, msg) => {
            BackendError::Storage(format!("cacache {op} I/O error: {msg}"))
        }
        cacache::Error::SerdeError(_, msg) => {
            BackendError::Storage(format!("cacache {op} serde error: {msg}"))
        }
    }
}

impl CacacheMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read back the bytes behind a disk handle, verifying integrity.
    pub async fn read(&self, handle: &LocalHandle) -> BackendResult<Vec<u8>> {
        match handle {
            LocalHandle::Memory(bytes) => Ok(bytes.to_vec()),
            LocalHandle::Disk { integrity, .. } => {
                let sri = parse_integrity(integrity)?;
                cacache::read_hash(&self.root, &sri)
                    .await
                    .map_err(|e| map_cacache("read_hash", e))
            }
        }
    }
}

fn parse_integrity(raw: &str) -> BackendResult<Integrity> {
    raw.parse::<Integrity>()
        .map_err(|e| BackendError::Storage(format!("invalid integrity {raw}: {e}")))
}

#[async_trait]
impl BlobMaterializer for CacacheMaterializer {
    async fn store(
        &self,
        key: &CacheKey,
        bytes: Vec<u8>,
    ) -> BackendResult<LocalHandle> {
        let index_key = key.to_string();
        let integrity = cacache::write(&self.root, &index_key, &bytes)
            .await
            .map_err(|e| map_cacache("write", e))?;
        Ok(LocalHandle::Disk {
            key: index_key,
            integrity: integrity.to_string(),
            byte_len: bytes.len() as u64,
        })
    }

    async fn release(&self, handle: &LocalHandle) -> BackendResult<()> {
        let LocalHandle::Disk { key, integrity, .. } = handle else {
            return Ok(());
        };
        cacache::remove(&self.root, key)
            .await
            .map_err(|e| map_cacache("remove", e))?;
        let sri = parse_integrity(integrity)?;
        cacache::remove_hash(&self.root, &sri)
            .await
            .map_err(|e| map_cacache("remove_hash", e))
    }
}

/// Keeps materialized bytes in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryMaterializer;

#[async_trait]
impl BlobMaterializer for MemoryMaterializer {
    async fn store(
        &self,
        _key: &CacheKey,
        bytes: Vec<u8>,
    ) -> BackendResult<LocalHandle> {
        Ok(LocalHandle::Memory(Arc::from(bytes)))
    }

    async fn release(&self, _handle: &LocalHandle) -> BackendResult<()> {
        Ok(())
    }
}
