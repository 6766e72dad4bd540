use async_trait::async_trait;

use crate::error::BackendResult;

/// Opaque persistence slot for serialized cache snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> BackendResult<Option<Vec<u8>>>;

    async fn save(&self, bytes: &[u8]) -> BackendResult<()>;
}
