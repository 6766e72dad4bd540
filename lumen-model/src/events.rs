use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::media::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

impl DeviceClass {
    /// Classify from a viewport width in CSS pixels.
    pub fn from_viewport_width(width: u32) -> Self {
        if width < 768 {
            DeviceClass::Mobile
        } else if width < 1024 {
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }
}

/// Coarse network quality used for eviction and rendition decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum NetworkClass {
    VerySlow,
    Slow,
    Moderate,
    #[default]
    Fast,
}

impl NetworkClass {
    pub const fn as_u8(self) -> u8 {
        match self {
            NetworkClass::VerySlow => 0,
            NetworkClass::Slow => 1,
            NetworkClass::Moderate => 2,
            NetworkClass::Fast => 3,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => NetworkClass::VerySlow,
            1 => NetworkClass::Slow,
            2 => NetworkClass::Moderate,
            _ => NetworkClass::Fast,
        }
    }

    /// `slow-2g`, `2g`, `3g`, `4g` effective connection types.
    pub fn from_effective_type(effective: &str) -> Option<Self> {
        match effective.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(NetworkClass::VerySlow),
            "2g" => Some(NetworkClass::Slow),
            "3g" => Some(NetworkClass::Moderate),
            "4g" | "5g" | "wifi" | "ethernet" => Some(NetworkClass::Fast),
            _ => None,
        }
    }

    pub const fn is_constrained(self) -> bool {
        matches!(self, NetworkClass::VerySlow | NetworkClass::Slow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum InteractionKind {
    Like,
    Comment,
    Share,
    Save,
    Click,
    Unlock,
    Zoom,
    Play,
}

impl InteractionKind {
    /// Declaration order; used to break ties deterministically.
    pub const ALL: [InteractionKind; 8] = [
        InteractionKind::Like,
        InteractionKind::Comment,
        InteractionKind::Share,
        InteractionKind::Save,
        InteractionKind::Click,
        InteractionKind::Unlock,
        InteractionKind::Zoom,
        InteractionKind::Play,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Comment => "comment",
            InteractionKind::Share => "share",
            InteractionKind::Save => "save",
            InteractionKind::Click => "click",
            InteractionKind::Unlock => "unlock",
            InteractionKind::Zoom => "zoom",
            InteractionKind::Play => "play",
        }
    }
}

impl FromStr for InteractionKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        InteractionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or(ModelError::UnknownVariant {
                kind: "interaction",
                value: lower,
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewEvent {
    pub item_id: ItemId,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub scroll_position: f64,
    pub device_class: DeviceClass,
    pub network_class: NetworkClass,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub item_id: ItemId,
    pub timestamp: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScrollSample {
    pub position: f64,
    pub timestamp: DateTime<Utc>,
}
