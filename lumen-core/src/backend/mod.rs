//! Concrete adapters for the storage contracts.

pub mod disk;
pub mod http;

pub use disk::{CacacheMaterializer, MemoryMaterializer};
pub use http::{HttpBackendConfig, HttpStorageBackend};
