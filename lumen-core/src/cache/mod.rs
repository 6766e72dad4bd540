//! Signed URL cache keyed by `(path, transforms)`.
//!
//! Entries live in a [`DashMap`] so readers never observe a half-written
//! entry. Concurrent misses for one key share a single in-flight resolution.
//! After a successful resolution the optional [`Materializer`] fetches and
//! warms the bytes in the background; that path never fails a caller.

mod materialize;
mod stats;

pub use materialize::Materializer;
pub use stats::CacheStats;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lumen_contracts::clock::Clock;
use lumen_contracts::media::{SignedUrl, UrlResolver};
use lumen_model::{
    ByteSize, CacheEntry, CacheKey, LocalHandle, MediaKind, NetworkClass,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::eviction::{EvictionPolicy, plan_evictions};
use crate::snapshot::CacheSnapshot;
use crate::warm::{self, WarmOutcome};
use stats::CacheCounters;

type SharedResolve = Shared<BoxFuture<'static, Result<Url>>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Estimated bytes the cache may hold before maintenance evicts.
    pub budget: ByteSize,
    /// Lifetime requested for signed URLs.
    pub url_lifetime_secs: u64,
    /// Entries are treated as expired this long before the backend deadline.
    pub expiry_skew_secs: u64,
    /// Bound for one backend resolution, fetch or decode.
    pub op_timeout_ms: u64,
    /// Fetch and keep bytes locally after resolution when collaborators exist.
    pub materialize: bool,
    /// Larger objects keep serving the network URL only.
    pub materialize_max_bytes: ByteSize,
    pub maintenance_interval_ms: u64,
    /// Size estimates used until the backend or a fetch reports a real size.
    pub default_image_size: ByteSize,
    pub default_video_size: ByteSize,
    pub default_audio_size: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget: ByteSize::from_mib(100),
            url_lifetime_secs: 60 * 60,
            expiry_skew_secs: 60,
            op_timeout_ms: 10_000,
            materialize: true,
            materialize_max_bytes: ByteSize::from_mib(25),
            maintenance_interval_ms: 30_000,
            default_image_size: ByteSize::from_kib(200),
            default_video_size: ByteSize::from_mib(5),
            default_audio_size: ByteSize::from_mib(1),
        }
    }
}

impl CacheConfig {
    pub fn url_lifetime(&self) -> Duration {
        Duration::from_secs(self.url_lifetime_secs)
    }

    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.expiry_skew_secs).unwrap_or(i64::MAX),
        )
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn default_size(&self, kind: MediaKind) -> ByteSize {
        match kind {
            MediaKind::Image => self.default_image_size,
            MediaKind::Video => self.default_video_size,
            MediaKind::Audio => self.default_audio_size,
        }
    }
}

#[derive(Clone)]
pub struct UrlCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,

    // One shared resolution per key while a backend call is outstanding
    inflight: Arc<DashMap<CacheKey, SharedResolve>>,

    resolver: Arc<dyn UrlResolver>,
    materializer: Option<Materializer>,
    clock: Arc<dyn Clock>,
    config: Arc<CacheConfig>,

    // Sum of `CacheEntry::size` over `entries`
    total_bytes: Arc<AtomicU64>,

    counters: Arc<CacheCounters>,
}

impl std::fmt::Debug for UrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.inflight.len())
            .field("total_bytes", &self.total_bytes())
            .field("materializer", &self.materializer)
            .finish()
    }
}

impl UrlCache {
    pub fn new(
        resolver: Arc<dyn UrlResolver>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            resolver,
            materializer: None,
            clock,
            config: Arc::new(config),
            total_bytes: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Unexpired entry for `key`, if any. Does not count as an access.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now();
        let skew = self.config.expiry_skew();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now, skew))
            .map(|entry| entry.value().clone())
    }

    pub fn contains_fresh(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        let skew = self.config.expiry_skew();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now, skew))
    }

    /// Return a usable URL for `key`, contacting the backend at most once per
    /// key no matter how many callers race on a miss.
    pub async fn resolve(&self, key: &CacheKey, kind: MediaKind) -> Result<Url> {
        if let Some(url) = self.touch(key) {
            self.counters.hit();
            return Ok(url);
        }

        self.counters.miss();
        self.shared_resolution(key, kind).await
    }

    fn touch(&self, key: &CacheKey) -> Option<Url> {
        let now = self.clock.now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired(now, self.config.expiry_skew()) {
            return None;
        }
        entry.record_access(now);
        Some(entry.url.clone())
    }

    fn shared_resolution(&self, key: &CacheKey, kind: MediaKind) -> SharedResolve {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                trace!(key = %key, "joining in-flight resolution");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                // A resolution may have stored the entry and released its
                // slot after our first lookup.
                if let Some(url) = self.touch(key) {
                    trace!(key = %key, "entry stored while waiting for the in-flight slot");
                    return futures::future::ready(Ok(url)).boxed().shared();
                }
                let fut = self
                    .clone()
                    .resolve_and_store(key.clone(), kind)
                    .boxed()
                    .shared();
                slot.insert(fut.clone());
                fut
            }
        }
    }

    async fn resolve_and_store(self, key: CacheKey, kind: MediaKind) -> Result<Url> {
        self.counters.resolution();
        let outcome = tokio::time::timeout(
            self.config.op_timeout(),
            self.resolver.resolve(&key, self.config.url_lifetime()),
        )
        .await;

        let result = match outcome {
            Ok(Ok(signed)) => Ok(self.store_resolved(&key, kind, signed)),
            Ok(Err(err)) => Err(CacheError::from_resolver(err)),
            Err(_) => Err(CacheError::Timeout),
        };

        // The entry is visible before the in-flight slot disappears, so a
        // later caller either hits or joins; it never issues a second call.
        self.inflight.remove(&key);

        match &result {
            Ok(url) => {
                if self.config.materialize && self.materializer.is_some() {
                    self.spawn_materialize(key, kind, url.clone());
                }
            }
            Err(err) => {
                self.counters.failure();
                warn!(key = %key, error = %err, "URL resolution failed");
            }
        }

        result
    }

    fn store_resolved(&self, key: &CacheKey, kind: MediaKind, signed: SignedUrl) -> Url {
        let now = self.clock.now();
        let size = signed
            .size_hint
            .unwrap_or_else(|| self.config.default_size(kind));
        let mut fresh = CacheEntry::new(
            key.clone(),
            signed.url.clone(),
            kind,
            signed.expires_at,
            size,
            now,
        );
        fresh.record_access(now);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                // Re-signing an expired URL keeps the history and local copy.
                let previous = slot.get();
                fresh.created_at = previous.created_at;
                fresh.access_count = previous.access_count.saturating_add(1);
                if previous.local.is_some() {
                    fresh.local = previous.local.clone();
                    fresh.size = previous.size;
                }
                let old_size = previous.size;
                let new_size = fresh.size;
                slot.insert(fresh);
                self.adjust_bytes(new_size, old_size);
            }
            Entry::Vacant(slot) => {
                let new_size = fresh.size;
                slot.insert(fresh);
                self.adjust_bytes(new_size, ByteSize::ZERO);
            }
        }

        signed.url
    }

    fn spawn_materialize(&self, key: CacheKey, kind: MediaKind, url: Url) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(key = %key, "no runtime available; skipping materialization");
            return;
        };
        let cache = self.clone();
        runtime.spawn(async move {
            cache.materialize(&key, kind, &url).await;
        });
    }

    /// Fetch, warm and store the bytes for an already resolved entry.
    ///
    /// Returns whether a local handle was attached. Every failure is logged at
    /// debug level and leaves the entry serving its network URL.
    pub async fn materialize(&self, key: &CacheKey, kind: MediaKind, url: &Url) -> bool {
        let Some(materializer) = &self.materializer else {
            return false;
        };
        let timeout = self.config.op_timeout();
        let max_bytes = self.config.materialize_max_bytes.as_bytes();

        let bytes = match tokio::time::timeout(
            timeout,
            materializer.fetcher.fetch(url, max_bytes),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                debug!(key = %key, error = %err, "materialization fetch failed");
                return false;
            }
            Err(_) => {
                debug!(key = %key, "materialization fetch timed out");
                return false;
            }
        };
        if bytes.len() as u64 > max_bytes {
            debug!(key = %key, len = bytes.len(), "fetched object exceeds materialization cap");
            return false;
        }

        if let Some(decoder) = &materializer.decoder {
            match warm::warm(decoder.as_ref(), kind, &bytes, timeout).await {
                WarmOutcome::Ready(info) => {
                    trace!(key = %key, width = ?info.width, height = ?info.height, "warmed");
                }
                WarmOutcome::Failed(reason) => {
                    debug!(key = %key, %reason, "decode warm failed");
                    return false;
                }
                WarmOutcome::TimedOut => {
                    debug!(key = %key, "decode warm timed out");
                    return false;
                }
            }
        }

        let byte_len = ByteSize::from_usize(bytes.len());
        let handle = match materializer.store.store(key, bytes).await {
            Ok(handle) => handle,
            Err(err) => {
                debug!(key = %key, error = %err, "storing materialized bytes failed");
                return false;
            }
        };

        let replaced = match self.entries.get_mut(key) {
            Some(mut entry) => {
                let old_size = entry.size;
                let previous = entry.local.replace(handle.clone());
                entry.size = byte_len;
                drop(entry);
                self.adjust_bytes(byte_len, old_size);
                Some(previous)
            }
            None => None,
        };

        match replaced {
            Some(previous) => {
                if let Some(previous) = previous
                    && previous != handle
                {
                    self.release_handle(previous);
                }
                self.counters.materialized();
                true
            }
            None => {
                // Evicted or invalidated while we were fetching.
                self.release_handle(handle);
                false
            }
        }
    }

    pub fn insert(&self, entry: CacheEntry) -> Option<CacheEntry> {
        let new_size = entry.size;
        let previous = self.entries.insert(entry.key.clone(), entry);
        let old_size = previous.as_ref().map_or(ByteSize::ZERO, |e| e.size);
        self.adjust_bytes(new_size, old_size);
        previous
    }

    pub fn invalidate(&self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.remove_entry(key);
        if removed.is_some() {
            debug!(key = %key, "invalidated cache entry");
        }
        removed
    }

    pub fn clear(&self) {
        let keys: Vec<CacheKey> =
            self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.remove_entry(&key);
        }
        info!("cleared URL cache");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> ByteSize {
        ByteSize::from_bytes(self.total_bytes.load(Ordering::Acquire))
    }

    /// Cloned view of every entry, expired ones included.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters
            .snapshot(self.entries.len(), self.total_bytes(), self.inflight.len())
    }

    /// Evict lowest-scoring entries until the estimated total fits `target`.
    pub fn evict_to(
        &self,
        target: ByteSize,
        policy: &EvictionPolicy,
        network: NetworkClass,
    ) -> Vec<CacheKey> {
        let now = self.clock.now();
        let candidates = self
            .entries
            .iter()
            .map(|entry| policy.candidate(entry.value(), now, network))
            .collect();
        let plan = plan_evictions(candidates, target);
        if plan.is_empty() {
            return Vec::new();
        }

        let mut evicted = Vec::with_capacity(plan.planned.len());
        for candidate in &plan.planned {
            if self.remove_entry(&candidate.key).is_some() {
                evicted.push(candidate.key.clone());
            }
        }
        self.counters.evicted(evicted.len());

        info!(
            evicted = evicted.len(),
            freed = %plan.freed(),
            total = %self.total_bytes(),
            target = %target,
            network = ?network,
            "URL cache eviction"
        );
        evicted
    }

    /// Bring the cache back under budget, down to `budget * low_water_ratio`.
    pub fn enforce_budget(
        &self,
        policy: &EvictionPolicy,
        network: NetworkClass,
        low_water_ratio: f64,
    ) -> Vec<CacheKey> {
        let budget = self.config.budget;
        if self.total_bytes() <= budget {
            return Vec::new();
        }
        let ratio = if low_water_ratio > 0.0 && low_water_ratio <= 1.0 {
            low_water_ratio
        } else {
            1.0
        };
        self.evict_to(budget.scale(ratio), policy, network)
    }

    pub fn export_snapshot(
        &self,
        policy: &EvictionPolicy,
        network: NetworkClass,
        max_entries: usize,
    ) -> CacheSnapshot {
        CacheSnapshot::capture(
            self.entries(),
            self.clock.now(),
            self.config.expiry_skew(),
            policy,
            network,
            max_entries,
        )
    }

    /// Seed the cache from a snapshot. Keys already present win. Returns the
    /// number of entries restored.
    pub fn restore_snapshot(
        &self,
        snapshot: CacheSnapshot,
        max_age: chrono::Duration,
    ) -> usize {
        let restorable = snapshot.into_restorable(
            self.clock.now(),
            self.config.expiry_skew(),
            max_age,
        );

        let mut restored = 0;
        for entry in restorable {
            if let Entry::Vacant(slot) = self.entries.entry(entry.key.clone()) {
                let size = entry.size;
                slot.insert(entry);
                self.adjust_bytes(size, ByteSize::ZERO);
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "restored URL cache entries from snapshot");
        }
        restored
    }

    fn remove_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let (_, entry) = self.entries.remove(key)?;
        self.adjust_bytes(ByteSize::ZERO, entry.size);
        if let Some(handle) = entry.local.clone() {
            self.release_handle(handle);
        }
        Some(entry)
    }

    fn release_handle(&self, handle: LocalHandle) {
        let Some(materializer) = &self.materializer else {
            return;
        };
        if matches!(handle, LocalHandle::Memory(_)) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = materializer.store.clone();
        runtime.spawn(async move {
            if let Err(err) = store.release(&handle).await {
                debug!(error = %err, "failed to release local handle");
            }
        });
    }

    fn adjust_bytes(&self, added: ByteSize, removed: ByteSize) {
        let _ = self.total_bytes.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| {
                Some(
                    current
                        .saturating_add(added.as_bytes())
                        .saturating_sub(removed.as_bytes()),
                )
            },
        );
    }
}
