use std::fmt;

use crate::error::{ModelError, Result};
use crate::transform::TransformOptions;

/// Identity of a cached rendition: storage path plus transform options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheKey {
    pub path: String,
    pub transforms: TransformOptions,
}

impl CacheKey {
    /// Leading slashes are stripped so `/a/b.jpg` and `a/b.jpg` share a key.
    pub fn new(path: impl AsRef<str>, transforms: TransformOptions) -> Self {
        Self {
            path: path.as_ref().trim_start_matches('/').to_string(),
            transforms,
        }
    }

    pub fn original(path: impl AsRef<str>) -> Self {
        Self::new(path, TransformOptions::NONE)
    }

    /// Parse the `path?w=..` display form back into a key.
    pub fn parse(raw: &str) -> Result<Self> {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw, ""),
        };
        if path.trim_start_matches('/').is_empty() {
            return Err(ModelError::InvalidKey(format!("empty path in {raw}")));
        }
        Ok(Self::new(path, TransformOptions::from_query(query)?))
    }

    pub fn with_transforms(&self, transforms: TransformOptions) -> Self {
        Self {
            path: self.path.clone(),
            transforms,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transforms.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}?{}", self.path, self.transforms.to_query())
        }
    }
}
