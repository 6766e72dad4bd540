use lumen_core::behavior::BehaviorConfig;
use lumen_core::cache::CacheConfig;
use lumen_core::demand::DemandConfig;
use lumen_core::duplicates::DuplicatesConfig;
use lumen_core::eviction::EvictionConfig;
use lumen_core::prediction::PredictionConfig;
use lumen_core::scheduler::SchedulerConfig;
use lumen_core::service::ServiceConfig;
use lumen_core::snapshot::SnapshotConfig;
use lumen_core::upload::UploadConfig;
use serde::{Deserialize, Serialize};

/// Everything a Lumen deployment can tune. Every section may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    /// URL cache budget, signed URL lifetime and materialization limits.
    pub cache: CacheConfig,
    /// Batch size and per-item timeout of the preload worker.
    pub scheduler: SchedulerConfig,
    /// Ring capacities and profile recompute cadence.
    pub behavior: BehaviorConfig,
    /// Table bounds of the next-item model.
    pub prediction: PredictionConfig,
    /// Scoring weights and the low-water mark used after a budget overrun.
    pub eviction: EvictionConfig,
    pub snapshot: SnapshotConfig,
    /// Look-ahead window sizes around the visible feed items.
    pub demand: DemandConfig,
    pub upload: UploadConfig,
    pub duplicates: DuplicatesConfig,
}

impl LumenConfig {
    /// The subset consumed by [`lumen_core::service::PreloadService`].
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            cache: self.cache.clone(),
            scheduler: self.scheduler.clone(),
            behavior: self.behavior.clone(),
            prediction: self.prediction.clone(),
            eviction: self.eviction,
            snapshot: self.snapshot.clone(),
            demand: self.demand.clone(),
        }
    }
}
