//! Cache snapshots: a JSON dump of the most valuable unexpired entries so a
//! restart does not begin from a cold cache. The behaviour tracker rings ride
//! along in the same document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lumen_contracts::{BackendError, BackendResult, snapshot::SnapshotStore};
use lumen_model::{CacheEntry, LocalHandle, NetworkClass};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::behavior::TrackerSnapshot;
use crate::error::{CacheError, Result};
use crate::eviction::EvictionPolicy;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Used by [`FileSnapshotStore`] when the service builds its own store.
    pub path: Option<PathBuf>,
    /// Highest-scoring entries kept per snapshot.
    pub max_entries: usize,
    /// Entries created longer ago than this are dropped on restore.
    pub max_age_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_entries: 500,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

impl SnapshotConfig {
    pub fn max_age(&self) -> Duration {
        Duration::seconds(i64::try_from(self.max_age_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<CacheEntry>,
    /// Absent in snapshots written before tracker history was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerSnapshot>,
}

impl CacheSnapshot {
    /// Keep at most `max_entries` unexpired entries, best score first.
    /// In-memory handles are stripped since they cannot outlive the process.
    pub fn capture(
        entries: impl IntoIterator<Item = CacheEntry>,
        now: DateTime<Utc>,
        skew: Duration,
        policy: &EvictionPolicy,
        network: NetworkClass,
        max_entries: usize,
    ) -> Self {
        let mut scored: Vec<(f64, CacheEntry)> = entries
            .into_iter()
            .filter(|entry| !entry.is_expired(now, skew))
            .map(|mut entry| {
                if matches!(entry.local, Some(LocalHandle::Memory(_))) {
                    entry.local = None;
                }
                (policy.score(&entry, now, network), entry)
            })
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score.total_cmp(a_score).then_with(|| a.key.cmp(&b.key))
        });
        scored.truncate(max_entries);

        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            entries: scored.into_iter().map(|(_, entry)| entry).collect(),
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: TrackerSnapshot) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Detach the tracker rings. Unknown versions yield nothing.
    pub fn take_tracker(&mut self) -> Option<TrackerSnapshot> {
        if self.version != SNAPSHOT_VERSION {
            return None;
        }
        self.tracker.take()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Entries still worth restoring at `now`. Unknown versions restore
    /// nothing.
    pub fn into_restorable(
        self,
        now: DateTime<Utc>,
        skew: Duration,
        max_age: Duration,
    ) -> Vec<CacheEntry> {
        if self.version != SNAPSHOT_VERSION {
            warn!(
                version = self.version,
                expected = SNAPSHOT_VERSION,
                "ignoring cache snapshot with unknown version"
            );
            return Vec::new();
        }

        let total = self.entries.len();
        let kept: Vec<CacheEntry> = self
            .entries
            .into_iter()
            .filter(|entry| {
                !entry.is_expired(now, skew)
                    && now.signed_duration_since(entry.created_at) <= max_age
            })
            .collect();

        debug!(
            total,
            kept = kept.len(),
            "filtered cache snapshot for restore"
        );
        kept
    }
}

pub async fn load_snapshot(
    store: &dyn SnapshotStore,
) -> Result<Option<CacheSnapshot>> {
    match store.load().await.map_err(CacheError::from)? {
        Some(bytes) => CacheSnapshot::from_json(&bytes).map(Some),
        None => Ok(None),
    }
}

pub async fn save_snapshot(
    store: &dyn SnapshotStore,
    snapshot: &CacheSnapshot,
) -> Result<()> {
    let bytes = snapshot.to_json()?;
    store.save(&bytes).await.map_err(CacheError::from)
}

/// Snapshot store backed by a single JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_err(&self, action: &str, err: std::io::Error) -> BackendError {
        BackendError::Storage(format!(
            "failed to {action} snapshot {:?}: {err}",
            self.path
        ))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> BackendResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.storage_err("read", err)),
        }
    }

    async fn save(&self, bytes: &[u8]) -> BackendResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.storage_err("create directory for", err))?;
        }

        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("snapshot");
        let tmp = self
            .path
            .with_file_name(format!("{file_name}.tmp-{}", Uuid::new_v4().simple()));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| self.storage_err("create temp file for", err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| self.storage_err("write", err))?;
        file.flush()
            .await
            .map_err(|err| self.storage_err("flush", err))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.storage_err("move", err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use lumen_model::{ByteSize, CacheKey, MediaKind};
    use url::Url;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 18, 30, 0).unwrap()
    }

    fn entry(path: &str, accesses: u32, expires_in: Duration) -> CacheEntry {
        let mut entry = CacheEntry::new(
            CacheKey::original(path),
            Url::parse(&format!("https://cdn.test/{path}")).unwrap(),
            MediaKind::Image,
            now() + expires_in,
            ByteSize::from_kib(200),
            now(),
        );
        entry.access_count = accesses;
        entry
    }

    #[test]
    fn capture_keeps_best_unexpired_entries_without_memory_handles() {
        let mut warm = entry("warm.jpg", 9, Duration::hours(1));
        warm.local = Some(LocalHandle::Memory(Arc::from(vec![1u8, 2, 3])));
        let snapshot = CacheSnapshot::capture(
            vec![
                entry("cold.jpg", 0, Duration::hours(1)),
                warm,
                entry("stale.jpg", 50, -Duration::minutes(5)),
            ],
            now(),
            Duration::seconds(30),
            &EvictionPolicy::default(),
            NetworkClass::Fast,
            1,
        );

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].key.path, "warm.jpg");
        assert!(snapshot.entries[0].local.is_none());
    }

    #[test]
    fn restore_drops_expired_old_and_unknown_versions() {
        let mut old = entry("old.jpg", 1, Duration::days(3));
        old.created_at = now() - Duration::days(2);
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now(),
            entries: vec![entry("fresh.jpg", 1, Duration::hours(1)), old],
            tracker: None,
        };

        let later = now() + Duration::minutes(10);
        let kept = snapshot.clone().into_restorable(
            later,
            Duration::seconds(30),
            Duration::days(1),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].key.path, "fresh.jpg");

        let future = CacheSnapshot {
            version: SNAPSHOT_VERSION + 1,
            ..snapshot
        };
        assert!(
            future
                .into_restorable(later, Duration::zero(), Duration::days(1))
                .is_empty()
        );
    }

    #[test]
    fn tracker_rings_follow_the_snapshot_version() {
        let rings = TrackerSnapshot {
            scrolls: vec![lumen_model::ScrollSample {
                position: 120.0,
                timestamp: now(),
            }],
            ..TrackerSnapshot::default()
        };
        let mut current = CacheSnapshot::capture(
            Vec::new(),
            now(),
            Duration::zero(),
            &EvictionPolicy::default(),
            NetworkClass::Fast,
            10,
        )
        .with_tracker(rings.clone());
        let mut future = CacheSnapshot {
            version: SNAPSHOT_VERSION + 1,
            ..current.clone()
        };

        let decoded = CacheSnapshot::from_json(&current.to_json().unwrap()).unwrap();
        assert_eq!(decoded.tracker.as_ref(), Some(&rings));
        assert_eq!(current.take_tracker(), Some(rings));
        assert!(current.tracker.is_none());
        assert_eq!(future.take_tracker(), None);
    }

    #[tokio::test]
    async fn file_store_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested/cache.json"));
        assert!(store.load().await.unwrap().is_none());

        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now(),
            entries: vec![entry("a.jpg", 2, Duration::hours(1))],
            tracker: None,
        };
        save_snapshot(&store, &snapshot).await.unwrap();
        let loaded = load_snapshot(&store).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_snapshot_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = load_snapshot(&FileSnapshotStore::new(path))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Snapshot(_)));
    }
}
