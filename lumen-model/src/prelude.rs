//! Convenience glob import for downstream crates.

pub use crate::entry::{CacheEntry, LocalHandle};
pub use crate::events::{
    DeviceClass, InteractionEvent, InteractionKind, NetworkClass,
    ScrollSample, ViewEvent,
};
pub use crate::key::CacheKey;
pub use crate::media::{ItemId, MediaItem, MediaKind};
pub use crate::priority::Priority;
pub use crate::profile::BehaviorProfile;
pub use crate::records::{MediaRecord, ProcessingStatus};
pub use crate::transform::{ResizeMode, TransformOptions};
pub use crate::units::ByteSize;
