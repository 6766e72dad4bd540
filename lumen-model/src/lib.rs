//! Core data model definitions shared across Lumen crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod entry;
pub mod error;
pub mod events;
pub mod key;
pub mod media;
pub mod prelude;
pub mod priority;
pub mod profile;
pub mod records;
pub mod transform;
pub mod units;

// Intentionally curated re-exports for downstream consumers.
pub use entry::{CacheEntry, LocalHandle};
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    DeviceClass, InteractionEvent, InteractionKind, NetworkClass,
    ScrollSample, ViewEvent,
};
pub use key::CacheKey;
pub use media::{ItemId, MediaItem, MediaKind};
pub use priority::Priority;
pub use profile::BehaviorProfile;
pub use records::{MediaRecord, ProcessingStatus};
pub use transform::{ResizeMode, TransformOptions};
pub use units::ByteSize;
