//! Composition root tying the cache, scheduler, tracker and model together.
//!
//! Everything is constructed explicitly from injected collaborators; there
//! is no global state. Lifecycle is `new` → `start` → `shutdown`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lumen_contracts::{clock::Clock, media::UrlResolver, snapshot::SnapshotStore};
use lumen_model::{
    BehaviorProfile, CacheKey, DeviceClass, InteractionKind, ItemId, MediaItem,
    NetworkClass, Priority,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::behavior::{BehaviorConfig, BehaviorTracker};
use crate::cache::{CacheConfig, Materializer, UrlCache};
use crate::demand::{DemandConfig, ViewportSnapshot, plan_demand};
use crate::error::Result;
use crate::eviction::{EvictionConfig, EvictionPolicy};
use crate::network::NetworkConditions;
use crate::prediction::{PredictionConfig, PredictionModel};
use crate::scheduler::{PreloadScheduler, PreloadTicket, SchedulerConfig, SchedulerWorker};
use crate::snapshot::{FileSnapshotStore, SnapshotConfig, load_snapshot, save_snapshot};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub behavior: BehaviorConfig,
    pub prediction: PredictionConfig,
    pub eviction: EvictionConfig,
    pub snapshot: SnapshotConfig,
    pub demand: DemandConfig,
}

/// External collaborators for a [`PreloadService`].
pub struct ServiceDeps {
    pub resolver: Arc<dyn UrlResolver>,
    pub clock: Arc<dyn Clock>,
    pub materializer: Option<Materializer>,
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl ServiceDeps {
    pub fn new(resolver: Arc<dyn UrlResolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            clock,
            materializer: None,
            snapshots: None,
        }
    }

    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }
}

struct Inner {
    config: ServiceConfig,
    cache: UrlCache,
    scheduler: PreloadScheduler,
    worker: Mutex<Option<SchedulerWorker>>,
    tracker: Mutex<BehaviorTracker>,
    model: Mutex<PredictionModel>,
    last_viewed: Mutex<Option<ItemId>>,
    network: Arc<NetworkConditions>,
    policy: EvictionPolicy,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct PreloadService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PreloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadService")
            .field("cache", &self.inner.cache)
            .field("scheduler", &self.inner.scheduler)
            .field("network", &self.inner.network.class())
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl PreloadService {
    pub fn new(deps: ServiceDeps, config: ServiceConfig) -> Self {
        let ServiceDeps {
            resolver,
            clock,
            materializer,
            snapshots,
        } = deps;

        let mut cache = UrlCache::new(resolver, clock.clone(), config.cache.clone());
        if let Some(materializer) = materializer {
            cache = cache.with_materializer(materializer);
        }

        let shutdown = CancellationToken::new();
        let (scheduler, worker) = PreloadScheduler::with_shutdown(
            cache.clone(),
            config.scheduler.clone(),
            shutdown.clone(),
        );

        let snapshots = snapshots.or_else(|| {
            config
                .snapshot
                .path
                .as_ref()
                .map(|path| Arc::new(FileSnapshotStore::new(path)) as Arc<dyn SnapshotStore>)
        });

        let network = Arc::new(NetworkConditions::default());
        let mut tracker = BehaviorTracker::new(clock.clone(), config.behavior.clone());
        tracker.set_network_class(network.class());
        tracker.set_device_class(network.device());

        Self {
            inner: Arc::new(Inner {
                cache,
                scheduler,
                worker: Mutex::new(Some(worker)),
                tracker: Mutex::new(tracker),
                model: Mutex::new(PredictionModel::new(clock, config.prediction.clone())),
                last_viewed: Mutex::new(None),
                network,
                policy: EvictionPolicy::new(config.eviction.weights),
                snapshots,
                shutdown,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &UrlCache {
        &self.inner.cache
    }

    pub fn scheduler(&self) -> &PreloadScheduler {
        &self.inner.scheduler
    }

    pub fn network(&self) -> &Arc<NetworkConditions> {
        &self.inner.network
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.inner.policy
    }

    /// Restore the snapshot, then spawn the preload worker and the
    /// maintenance loop. Calling it twice is a no-op.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.restore_snapshot().await {
            warn!(error = %err, "cache snapshot restore failed; starting cold");
        }

        let mut tasks = Vec::with_capacity(2);
        if let Some(worker) = self.inner.worker.lock().take() {
            tasks.push(worker.spawn());
        }

        let service = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.cache.maintenance_interval();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.run_maintenance();
                    }
                }
            }
            debug!("maintenance loop stopped");
        }));

        self.inner.tasks.lock().extend(tasks);
        info!(
            budget = %self.inner.config.cache.budget,
            entries = self.inner.cache.len(),
            "preload service started"
        );
    }

    /// Cancel queued work, persist a snapshot and wait for background tasks.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        self.inner.shutdown.cancel();

        if let Err(err) = self.persist_snapshot().await {
            warn!(error = %err, "failed to persist cache snapshot");
        }

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("preload service stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn restore_snapshot(&self) -> Result<usize> {
        let Some(store) = self.snapshot_store() else {
            return Ok(0);
        };
        let Some(mut snapshot) = load_snapshot(store.as_ref()).await? else {
            return Ok(0);
        };
        if let Some(rings) = snapshot.take_tracker() {
            let mut tracker = self.inner.tracker.lock();
            tracker.restore(rings);
            debug!(views = tracker.view_count(), "restored behaviour history");
        }
        Ok(self
            .inner
            .cache
            .restore_snapshot(snapshot, self.inner.config.snapshot.max_age()))
    }

    fn snapshot_store(&self) -> Option<&Arc<dyn SnapshotStore>> {
        if self.inner.config.snapshot.enabled {
            self.inner.snapshots.as_ref()
        } else {
            None
        }
    }

    /// Write the current cache snapshot together with the tracker rings.
    /// Returns `false` when persistence is disabled or no store is configured.
    pub async fn persist_snapshot(&self) -> Result<bool> {
        let Some(store) = self.snapshot_store() else {
            return Ok(false);
        };
        let rings = self.inner.tracker.lock().snapshot();
        let snapshot = self
            .inner
            .cache
            .export_snapshot(
                &self.inner.policy,
                self.inner.network.class(),
                self.inner.config.snapshot.max_entries,
            )
            .with_tracker(rings);
        save_snapshot(store.as_ref(), &snapshot).await?;
        debug!(
            entries = snapshot.entries.len(),
            views = snapshot.tracker.as_ref().map_or(0, |t| t.views.len()),
            "persisted cache snapshot"
        );
        Ok(true)
    }

    /// Record a completed view and feed it to the model.
    pub fn record_view(&self, item_id: ItemId, duration_ms: u64, scroll_position: f64) {
        self.inner
            .tracker
            .lock()
            .track_view(item_id.clone(), duration_ms, scroll_position);

        let previous = self.inner.last_viewed.lock().replace(item_id.clone());
        self.inner.model.lock().observe(&item_id, previous.as_ref());
    }

    pub fn record_interaction(
        &self,
        kind: InteractionKind,
        item_id: ItemId,
        metadata: BTreeMap<String, String>,
    ) {
        self.inner
            .tracker
            .lock()
            .track_interaction(kind, item_id, metadata);
    }

    pub fn record_scroll(&self, position: f64) {
        self.inner.tracker.lock().track_scroll(position);
    }

    pub fn profile(&self) -> BehaviorProfile {
        self.inner.tracker.lock().profile().clone()
    }

    pub fn predict(&self, current: &ItemId, count: usize) -> Vec<ItemId> {
        self.inner.model.lock().predict(current, count)
    }

    pub fn set_network_class(&self, class: NetworkClass) {
        let previous = self.inner.network.set_class(class);
        self.inner.tracker.lock().set_network_class(class);
        if previous != class {
            info!(?previous, current = ?class, "network class changed");
        }
    }

    pub fn set_device_class(&self, device: DeviceClass) {
        self.inner.network.set_device(device);
        self.inner.tracker.lock().set_device_class(device);
    }

    /// Replace queued viewport work with the demand for `snapshot`.
    ///
    /// Older queued items are cancelled first; in-flight work keeps running.
    pub fn on_viewport(&self, snapshot: &ViewportSnapshot) -> Vec<PreloadTicket> {
        let superseded = self.inner.scheduler.advance_generation();

        let demand = self.inner.config.demand.adjusted_for(&self.profile());
        let predicted = snapshot
            .focus()
            .map(|focus| self.predict(&focus.id, demand.predicted))
            .unwrap_or_default();

        let requests = plan_demand(
            snapshot,
            &predicted,
            &demand,
            self.inner.network.device(),
            self.inner.network.class(),
        );
        debug!(
            superseded,
            requested = requests.len(),
            predicted = predicted.len(),
            "viewport demand planned"
        );

        requests
            .into_iter()
            .map(|request| self.preload_item(&request.item, request.priority))
            .collect()
    }

    pub fn preload_item(&self, item: &MediaItem, priority: Priority) -> PreloadTicket {
        self.inner
            .scheduler
            .enqueue(item.cache_key(), item.kind, priority)
    }

    /// One maintenance cycle: evict down to the low-water mark when over
    /// budget.
    pub fn run_maintenance(&self) -> Vec<CacheKey> {
        self.inner.cache.enforce_budget(
            &self.inner.policy,
            self.inner.network.class(),
            self.inner.config.eviction.low_water_ratio,
        )
    }
}

#[cfg(test)]
mod tests {
    use lumen_model::{ByteSize, MediaKind};

    use super::*;
    use crate::testing::{CountingResolver, InMemorySnapshotStore, ManualClock, fixed_now};

    fn service(config: ServiceConfig) -> (PreloadService, Arc<CountingResolver>) {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let resolver = Arc::new(CountingResolver::new(clock.clone()));
        let service = PreloadService::new(ServiceDeps::new(resolver.clone(), clock), config);
        (service, resolver)
    }

    #[test]
    fn views_feed_tracker_and_model() {
        let (service, _) = service(ServiceConfig::default());
        for id in ["x", "y", "z"] {
            service.record_view(ItemId::new(id), 1_200, 0.0);
        }
        assert!(service.predict(&ItemId::new("x"), 3).contains(&ItemId::new("y")));
        assert_eq!(
            service.inner.model.lock().transition_count(&ItemId::new("y"), &ItemId::new("z")),
            1
        );
    }

    #[test]
    fn network_changes_reach_tracker_context() {
        let (service, _) = service(ServiceConfig::default());
        service.set_network_class(NetworkClass::Slow);
        service.record_view(ItemId::new("a"), 500, 0.0);
        let tracker = service.inner.tracker.lock();
        assert_eq!(tracker.views().next().map(|v| v.network_class), Some(NetworkClass::Slow));
    }

    #[tokio::test]
    async fn lingering_users_get_a_shorter_lookahead() {
        let mut config = ServiceConfig::default();
        config.demand.predicted = 0;
        let (service, _) = service(config);
        let feed: Vec<MediaItem> = (0..20)
            .map(|i| MediaItem::new(format!("f{i}"), format!("feed/{i}.jpg"), MediaKind::Image))
            .collect();

        let before = service.on_viewport(&ViewportSnapshot::new(feed.clone(), 0..2));
        assert_eq!(before.len(), 8);

        for i in 0..10 {
            service.record_view(ItemId::new(format!("seen{i}")), 4_000, 0.0);
        }
        assert!(service.profile().is_deliberate());
        let after = service.on_viewport(&ViewportSnapshot::new(feed, 0..2));
        assert_eq!(after.len(), 5);
    }

    #[tokio::test]
    async fn maintenance_evicts_over_budget() {
        let mut config = ServiceConfig::default();
        config.cache.budget = ByteSize::from_mib(1);
        let (service, resolver) = service(config);
        resolver.set_size_hint(ByteSize::from_kib(400));

        for i in 0..4 {
            let item = MediaItem::new(format!("i{i}"), format!("feed/{i}.jpg"), MediaKind::Image);
            service.preload_item(&item, Priority::High);
        }
        while service.scheduler().queue_len() > 0 {
            service.scheduler().process_next_batch().await;
        }
        assert_eq!(service.cache().total_bytes(), ByteSize::from_kib(1600));

        let evicted = service.run_maintenance();
        assert_eq!(evicted.len(), 2);
        assert!(service.cache().total_bytes() <= ByteSize::from_mib(1).scale(0.9));
    }

    #[tokio::test]
    async fn persist_without_store_is_a_no_op() {
        let (service, _) = service(ServiceConfig::default());
        assert!(!service.persist_snapshot().await.unwrap());

        let clock = Arc::new(ManualClock::new(fixed_now()));
        let resolver = Arc::new(CountingResolver::new(clock.clone()));
        let store = Arc::new(InMemorySnapshotStore::default());
        let mut config = ServiceConfig::default();
        config.snapshot.enabled = false;
        let disabled = PreloadService::new(
            ServiceDeps::new(resolver, clock).with_snapshot_store(store.clone()),
            config,
        );
        assert!(!disabled.persist_snapshot().await.unwrap());
        assert!(store.saved().is_none());
    }
}
