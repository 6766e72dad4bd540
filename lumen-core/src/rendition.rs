//! Adaptive rendition choice for images and video.

use lumen_model::{DeviceClass, NetworkClass, ResizeMode, TransformOptions};
use serde::{Deserialize, Serialize};

/// Widest image worth requesting for a device class.
pub const fn device_max_width(device: DeviceClass) -> u32 {
    match device {
        DeviceClass::Mobile => 828,
        DeviceClass::Tablet => 1280,
        DeviceClass::Desktop => 1920,
    }
}

/// Width multiplier and encoder quality for a network class.
pub const fn network_image_profile(network: NetworkClass) -> (f64, u8) {
    match network {
        NetworkClass::VerySlow => (0.5, 50),
        NetworkClass::Slow => (0.75, 60),
        NetworkClass::Moderate => (1.0, 75),
        NetworkClass::Fast => (1.0, 85),
    }
}

/// Transforms for an image displayed `display_width` pixels wide.
pub fn image_transforms(
    display_width: u32,
    device: DeviceClass,
    network: NetworkClass,
) -> TransformOptions {
    let (scale, quality) = network_image_profile(network);
    let capped = display_width.min(device_max_width(device)).max(1);
    let width = ((f64::from(capped) * scale).round() as u32).max(1);
    TransformOptions::width(width)
        .with_quality(quality)
        .with_resize(ResizeMode::Cover)
}

/// Thumbnail-sized transforms used for look-ahead preloads.
pub fn thumbnail_transforms(network: NetworkClass) -> TransformOptions {
    let (_, quality) = network_image_profile(network);
    TransformOptions::width(240)
        .with_quality(quality.min(70))
        .with_resize(ResizeMode::Cover)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateRung {
    pub label: String,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl BitrateRung {
    pub fn new(label: impl Into<String>, height: u32, bitrate_kbps: u32) -> Self {
        Self {
            label: label.into(),
            height,
            bitrate_kbps,
        }
    }
}

/// Video renditions sorted by ascending bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateLadder {
    rungs: Vec<BitrateRung>,
}

impl Default for BitrateLadder {
    fn default() -> Self {
        Self::new(vec![
            BitrateRung::new("240p", 240, 400),
            BitrateRung::new("360p", 360, 800),
            BitrateRung::new("480p", 480, 1_400),
            BitrateRung::new("720p", 720, 2_800),
            BitrateRung::new("1080p", 1080, 5_000),
        ])
    }
}

/// Share of the measured downlink a stream may use.
const HEADROOM: f64 = 0.8;

impl BitrateLadder {
    pub fn new(mut rungs: Vec<BitrateRung>) -> Self {
        rungs.sort_by_key(|r| r.bitrate_kbps);
        Self { rungs }
    }

    pub fn rungs(&self) -> &[BitrateRung] {
        &self.rungs
    }

    /// Nominal throughput assumed for a class when no measurement exists.
    pub const fn class_budget_kbps(network: NetworkClass) -> u32 {
        match network {
            NetworkClass::VerySlow => 250,
            NetworkClass::Slow => 700,
            NetworkClass::Moderate => 1_500,
            NetworkClass::Fast => 8_000,
        }
    }

    /// Highest rung fitting the budget, or the lowest rung when none does.
    ///
    /// A measured downlink wins over the class estimate. Mobile devices
    /// never get more than 720 lines.
    pub fn select(
        &self,
        network: NetworkClass,
        device: DeviceClass,
        downlink_kbps: Option<u32>,
    ) -> Option<&BitrateRung> {
        let budget = match downlink_kbps {
            Some(kbps) => (f64::from(kbps) * HEADROOM) as u32,
            None => Self::class_budget_kbps(network),
        };
        let max_height = match device {
            DeviceClass::Mobile => 720,
            _ => u32::MAX,
        };
        self.rungs
            .iter()
            .rev()
            .find(|r| r.bitrate_kbps <= budget && r.height <= max_height)
            .or_else(|| self.rungs.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_width_shrinks_on_slow_networks() {
        let fast = image_transforms(1000, DeviceClass::Desktop, NetworkClass::Fast);
        assert_eq!(fast.width, Some(1000));
        assert_eq!(fast.quality, Some(85));

        let slow = image_transforms(1000, DeviceClass::Desktop, NetworkClass::VerySlow);
        assert_eq!(slow.width, Some(500));
        assert_eq!(slow.quality, Some(50));
    }

    #[test]
    fn image_width_is_capped_by_device() {
        let t = image_transforms(4000, DeviceClass::Mobile, NetworkClass::Fast);
        assert_eq!(t.width, Some(828));
        let t = image_transforms(4000, DeviceClass::Tablet, NetworkClass::Slow);
        assert_eq!(t.width, Some(960));
    }

    #[test]
    fn ladder_picks_highest_fitting_rung() {
        let ladder = BitrateLadder::default();
        let pick = |n, d, k| ladder.select(n, d, k).map(|r| r.label.as_str());

        assert_eq!(pick(NetworkClass::Fast, DeviceClass::Desktop, None), Some("1080p"));
        assert_eq!(pick(NetworkClass::Fast, DeviceClass::Mobile, None), Some("720p"));
        assert_eq!(pick(NetworkClass::Moderate, DeviceClass::Desktop, None), Some("480p"));
        // 2000 * 0.8 = 1600 kbps
        assert_eq!(pick(NetworkClass::Fast, DeviceClass::Desktop, Some(2_000)), Some("480p"));
    }

    #[test]
    fn ladder_falls_back_to_lowest_rung() {
        let ladder = BitrateLadder::default();
        let rung = ladder
            .select(NetworkClass::VerySlow, DeviceClass::Desktop, None)
            .unwrap();
        assert_eq!(rung.label, "240p");
        assert!(BitrateLadder::new(Vec::new())
            .select(NetworkClass::Fast, DeviceClass::Desktop, None)
            .is_none());
    }
}
