use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::key::CacheKey;
use crate::media::MediaKind;
use crate::units::ByteSize;

/// A locally materialized copy of a resolved asset.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalHandle {
    /// Bytes held in process memory. Never persisted.
    #[cfg_attr(feature = "serde", serde(skip))]
    Memory(Arc<[u8]>),
    /// Content-addressed blob in the on-disk store.
    Disk {
        key: String,
        integrity: String,
        byte_len: u64,
    },
}

impl LocalHandle {
    pub fn byte_len(&self) -> u64 {
        match self {
            LocalHandle::Memory(bytes) => bytes.len() as u64,
            LocalHandle::Disk { byte_len, .. } => *byte_len,
        }
    }

    pub fn is_persistable(&self) -> bool {
        matches!(self, LocalHandle::Disk { .. })
    }
}

impl std::fmt::Debug for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalHandle::Memory(bytes) => f
                .debug_tuple("Memory")
                .field(&format_args!("{} bytes", bytes.len()))
                .finish(),
            LocalHandle::Disk {
                key,
                integrity,
                byte_len,
            } => f
                .debug_struct("Disk")
                .field("key", key)
                .field("integrity", integrity)
                .field("byte_len", byte_len)
                .finish(),
        }
    }
}

/// A resolved, time-limited URL plus bookkeeping for eviction scoring.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheEntry {
    pub key: CacheKey,
    pub url: Url,
    #[cfg_attr(feature = "serde", serde(default))]
    pub local: Option<LocalHandle>,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    pub size: ByteSize,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        url: Url,
        kind: MediaKind,
        expires_at: DateTime<Utc>,
        size: ByteSize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            url,
            local: None,
            kind,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            access_count: 0,
            size,
        }
    }

    /// An entry counts as expired `skew` before the backend deadline so a URL
    /// is never handed out moments before it stops working.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now >= self.expires_at - skew
    }

    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.last_accessed_at);
        (elapsed.num_milliseconds().max(0) as f64) / 3_600_000.0
    }
}
