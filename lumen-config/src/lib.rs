//! Configuration for the Lumen preloader.
//!
//! One [`LumenConfig`] aggregates the component settings of `lumen-core`.
//! It is loaded from a file or the environment and checked with
//! [`LumenConfig::validate`] before use.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::ConfigSource;
pub use models::LumenConfig;
pub use validation::{ConfigWarning, ConfigWarnings};
