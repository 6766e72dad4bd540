use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;
use crate::key::CacheKey;
use crate::transform::TransformOptions;
use crate::units::ByteSize;

/// Opaque feed item identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    const IMAGE_EXTENSIONS: &'static [&'static str] = &[
        "jpg", "jpeg", "png", "gif", "webp", "avif", "heic", "heif", "bmp",
    ];
    const VIDEO_EXTENSIONS: &'static [&'static str] =
        &["mp4", "mov", "webm", "mkv", "m4v", "avi", "m3u8"];
    const AUDIO_EXTENSIONS: &'static [&'static str] =
        &["mp3", "m4a", "aac", "wav", "ogg", "flac", "opus"];

    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Classify by the top-level MIME type (`image/webp` → `Image`).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let top = mime.split('/').next()?.trim().to_ascii_lowercase();
        match top.as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Classify by file extension, ignoring any query string.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let (_, ext) = path.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if Self::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if Self::AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

impl FromStr for MediaKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(ModelError::UnknownVariant {
                kind: "media kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A feed item as handed to the preloader.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaItem {
    pub id: ItemId,
    pub path: String,
    pub kind: MediaKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub transforms: TransformOptions,
    #[cfg_attr(feature = "serde", serde(default))]
    pub size_hint: Option<ByteSize>,
}

impl MediaItem {
    pub fn new(
        id: impl Into<ItemId>,
        path: impl Into<String>,
        kind: MediaKind,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
            transforms: TransformOptions::NONE,
            size_hint: None,
        }
    }

    pub fn with_transforms(mut self, transforms: TransformOptions) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_size_hint(mut self, size: ByteSize) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.path, self.transforms)
    }
}
