use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, Result};

/// How the storage backend fits a resized rendition into the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ResizeMode {
    Cover,
    Contain,
    Fill,
}

impl ResizeMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ResizeMode::Cover => "cover",
            ResizeMode::Contain => "contain",
            ResizeMode::Fill => "fill",
        }
    }
}

impl FromStr for ResizeMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(ResizeMode::Cover),
            "contain" => Ok(ResizeMode::Contain),
            "fill" => Ok(ResizeMode::Fill),
            other => Err(ModelError::UnknownVariant {
                kind: "resize mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Rendition selector for an image asset.
///
/// Two transforms are equal only when every field matches, so each distinct
/// rendition of the same object gets its own cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Encoder quality, 1..=100.
    pub quality: Option<u8>,
    pub resize: Option<ResizeMode>,
}

impl TransformOptions {
    pub const NONE: Self = Self {
        width: None,
        height: None,
        quality: None,
        resize: None,
    };

    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::NONE
        }
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality.clamp(1, 100));
        self
    }

    pub fn with_resize(mut self, resize: ResizeMode) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.quality.is_none()
            && self.resize.is_none()
    }

    /// Canonical `w=..&h=..&q=..&resize=..` form; absent fields are omitted.
    pub fn to_query(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4);
        if let Some(w) = self.width {
            parts.push(format!("w={w}"));
        }
        if let Some(h) = self.height {
            parts.push(format!("h={h}"));
        }
        if let Some(q) = self.quality {
            parts.push(format!("q={q}"));
        }
        if let Some(r) = self.resize {
            parts.push(format!("resize={}", r.as_str()));
        }
        parts.join("&")
    }

    /// Parse the canonical query form. Field order is not significant.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut out = Self::NONE;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ModelError::InvalidTransform(format!("missing '=' in {pair}"))
            })?;
            let invalid = |_| {
                ModelError::InvalidTransform(format!("bad value in {pair}"))
            };
            match name {
                "w" => out.width = Some(value.parse().map_err(invalid)?),
                "h" => out.height = Some(value.parse().map_err(invalid)?),
                "q" => {
                    let q: u8 = value.parse().map_err(invalid)?;
                    if !(1..=100).contains(&q) {
                        return Err(ModelError::InvalidTransform(format!(
                            "quality out of range: {q}"
                        )));
                    }
                    out.quality = Some(q);
                }
                "resize" => out.resize = Some(value.parse()?),
                other => {
                    return Err(ModelError::InvalidTransform(format!(
                        "unknown field {other}"
                    )));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TransformOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

#[cfg(test)]
mod tests {
    use super::{ResizeMode, TransformOptions};

    #[test]
    fn query_form_is_canonical_and_parseable() {
        let t = TransformOptions::width(320)
            .with_height(180)
            .with_quality(75)
            .with_resize(ResizeMode::Cover);
        assert_eq!(t.to_query(), "w=320&h=180&q=75&resize=cover");

        let parsed =
            TransformOptions::from_query("resize=cover&q=75&h=180&w=320")
                .expect("parse");
        assert_eq!(parsed, t);
    }

    #[test]
    fn empty_transform_renders_empty_query() {
        assert!(TransformOptions::NONE.is_empty());
        assert_eq!(TransformOptions::default().to_query(), "");
        assert_eq!(
            TransformOptions::from_query("").expect("empty"),
            TransformOptions::NONE
        );
    }

    #[test]
    fn rejects_out_of_range_quality_and_unknown_fields() {
        assert!(TransformOptions::from_query("q=0").is_err());
        assert!(TransformOptions::from_query("q=101").is_err());
        assert!(TransformOptions::from_query("dpr=2").is_err());
        assert!(TransformOptions::from_query("w").is_err());
    }

    #[test]
    fn quality_builder_clamps() {
        assert_eq!(TransformOptions::NONE.with_quality(0).quality, Some(1));
        assert_eq!(TransformOptions::NONE.with_quality(250).quality, Some(100));
    }
}
