//! # Lumen Core
//!
//! Predictive media cache and preloader for feed-style media browsing.
//!
//! ## Overview
//!
//! - **URL cache**: signed URLs per media key, with concurrent resolutions
//!   for the same key collapsed into one backend call
//! - **Preload scheduler**: priority queue drained in adaptive batches
//! - **Behavior tracker** and **prediction model**: bounded event history,
//!   derived preferences and next-item prediction
//! - **Eviction**: value-scored trimming to a byte budget
//! - **Uploads**: chunked uploads gated by duplicate detection
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lumen_contracts::clock::SystemClock;
//! use lumen_core::backend::{HttpBackendConfig, HttpStorageBackend};
//! use lumen_core::service::{PreloadService, ServiceConfig, ServiceDeps};
//! use lumen_model::{MediaItem, MediaKind, Priority};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(SystemClock);
//! let base = url::Url::parse("https://storage.example.com/")?;
//! let backend = HttpStorageBackend::new(HttpBackendConfig::new(base, "media"), clock.clone())?;
//! backend.set_token(Some("token".into()));
//!
//! let service = PreloadService::new(
//!     ServiceDeps::new(Arc::new(backend), clock),
//!     ServiceConfig::default(),
//! );
//! service.start().await;
//! let item = MediaItem::new("1", "feed/1.jpg", MediaKind::Image);
//! let url = service.preload_item(&item, Priority::High).await?;
//! println!("{url}");
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Storage backend and local blob store adapters
pub mod backend;

/// Bounded interaction history and derived preferences
pub mod behavior;

/// Signed URL cache with shared in-flight resolution
pub mod cache;

pub mod demand;

/// Duplicate upload detection
pub mod duplicates;

pub mod error;

/// Value scoring and byte-budget eviction
pub mod eviction;

pub mod network;

/// Next-item prediction from transitions, time of day and sequences
pub mod prediction;

pub mod rendition;

/// Priority preload queue and batch worker
pub mod scheduler;

/// Composition root wiring the engine together
pub mod service;

pub mod snapshot;

/// In-memory collaborators for tests and offline tooling
pub mod testing;

/// Chunked uploads with progress and retry
pub mod upload;

pub mod warm;

pub use cache::{CacheConfig, CacheStats, UrlCache};
pub use error::{CacheError, Result};
pub use eviction::{EvictionConfig, EvictionPolicy, EvictionWeights};
pub use scheduler::{PreloadScheduler, PreloadTicket, SchedulerConfig};
pub use service::{PreloadService, ServiceConfig, ServiceDeps};

/// Types most embedders need.
pub mod prelude {
    pub use crate::behavior::{BehaviorConfig, BehaviorTracker};
    pub use crate::cache::{CacheConfig, Materializer, UrlCache};
    pub use crate::demand::{DemandConfig, ViewportSnapshot};
    pub use crate::duplicates::{DuplicateDetector, DuplicatesConfig, FileFingerprint};
    pub use crate::error::{CacheError, Result};
    pub use crate::eviction::{EvictionConfig, EvictionPolicy};
    pub use crate::network::NetworkConditions;
    pub use crate::prediction::{PredictionConfig, PredictionModel};
    pub use crate::scheduler::{PreloadScheduler, PreloadTicket, SchedulerConfig};
    pub use crate::service::{PreloadService, ServiceConfig, ServiceDeps};
    pub use crate::snapshot::SnapshotConfig;
    pub use crate::upload::{ChunkedUploader, UploadConfig, UploadFile};
}
