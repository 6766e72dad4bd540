use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use lumen_core::snapshot::{CacheSnapshot, FileSnapshotStore, SNAPSHOT_VERSION, load_snapshot};
use lumen_model::{ByteSize, LocalHandle, MediaKind};
use serde::Serialize;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct KindSummary {
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub version: u32,
    pub supported: bool,
    pub saved_at: DateTime<Utc>,
    pub entries: usize,
    pub total_bytes: ByteSize,
    pub on_disk: usize,
    pub expired: usize,
    pub images: KindSummary,
    pub videos: KindSummary,
    pub audio: KindSummary,
    /// Views carried in the persisted behaviour history.
    pub tracked_views: usize,
}

pub fn summarize(snapshot: &CacheSnapshot, now: DateTime<Utc>) -> SnapshotSummary {
    let mut summary = SnapshotSummary {
        version: snapshot.version,
        supported: snapshot.version == SNAPSHOT_VERSION,
        saved_at: snapshot.saved_at,
        entries: snapshot.entries.len(),
        total_bytes: ByteSize::ZERO,
        on_disk: 0,
        expired: 0,
        images: KindSummary::default(),
        videos: KindSummary::default(),
        audio: KindSummary::default(),
        tracked_views: snapshot.tracker.as_ref().map_or(0, |t| t.views.len()),
    };

    for entry in &snapshot.entries {
        summary.total_bytes = summary.total_bytes.saturating_add(entry.size);
        if matches!(entry.local, Some(LocalHandle::Disk { .. })) {
            summary.on_disk += 1;
        }
        if entry.expires_at <= now {
            summary.expired += 1;
        }
        let bucket = match entry.kind {
            MediaKind::Image => &mut summary.images,
            MediaKind::Video => &mut summary.videos,
            MediaKind::Audio => &mut summary.audio,
        };
        bucket.entries += 1;
        bucket.bytes += entry.size.as_bytes();
    }
    summary
}

pub async fn inspect(path: &Path, now: DateTime<Utc>) -> Result<SnapshotSummary> {
    let store = FileSnapshotStore::new(path);
    match load_snapshot(&store).await? {
        Some(snapshot) => Ok(summarize(&snapshot, now)),
        None => bail!("no snapshot at {}", path.display()),
    }
}
