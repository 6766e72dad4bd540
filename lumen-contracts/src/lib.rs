//! Trait surfaces for everything the Lumen engine does not own: the storage
//! backend, local blob stores, decoders, snapshot persistence and time.
#![allow(missing_docs)]

pub mod clock;
pub mod error;
pub mod media;
pub mod snapshot;
pub mod upload;

pub use error::{BackendError, BackendResult};

/// Frequently used contracts for engine and adapter crates.
pub mod prelude {
    pub use super::clock::{Clock, SystemClock};
    pub use super::error::{BackendError, BackendResult};
    pub use super::media::{
        BlobFetcher, BlobMaterializer, DecodedInfo, MediaDecoder, SignedUrl,
        UrlResolver,
    };
    pub use super::snapshot::SnapshotStore;
    pub use super::upload::{
        MediaRecords, ObjectStore, UploadRequest, UploadSession,
    };
}
