use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ModelError;
use crate::media::{ItemId, MediaItem, MediaKind};
use crate::units::ByteSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ProcessingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Ready => "ready",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Ready | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "ready" | "completed" => Ok(ProcessingStatus::Ready),
            "failed" | "error" => Ok(ProcessingStatus::Failed),
            other => Err(ModelError::UnknownVariant {
                kind: "processing status",
                value: other.to_string(),
            }),
        }
    }
}

/// Backend metadata row for an uploaded media file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaRecord {
    pub id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub content_hash: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub status: ProcessingStatus,
    pub storage_path: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub thumbnail_path: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub processed_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime_type)
            .or_else(|| MediaKind::from_path(&self.filename))
    }

    /// Path the feed should display: processed rendition first, then the
    /// original upload.
    pub fn display_path(&self) -> &str {
        self.processed_path
            .as_deref()
            .unwrap_or(self.storage_path.as_str())
    }

    /// Hand the record to the preloader. `None` for unclassifiable files.
    pub fn to_media_item(&self) -> Option<MediaItem> {
        let kind = self.kind()?;
        Some(
            MediaItem::new(
                ItemId::new(self.id.to_string()),
                self.display_path(),
                kind,
            )
            .with_size_hint(ByteSize::from_bytes(self.size_bytes)),
        )
    }
}
