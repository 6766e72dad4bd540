//! Desired preload set for the current viewport.
//!
//! Visible items go first (center outwards), then predicted items, then the
//! look-ahead neighbours around the visible window. An item named by more
//! than one tier keeps its first position and the highest priority.

use std::collections::HashMap;
use std::ops::Range;

use lumen_model::{
    BehaviorProfile, CacheKey, DeviceClass, ItemId, MediaItem, MediaKind, NetworkClass, Priority,
};
use serde::{Deserialize, Serialize};

use crate::rendition;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandConfig {
    /// Items after the visible window preloaded at low priority.
    pub lookahead_after: usize,
    /// Items before the visible window preloaded at low priority.
    pub lookahead_before: usize,
    /// Predicted items requested per viewport update.
    pub predicted: usize,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            lookahead_after: 6,
            lookahead_before: 2,
            predicted: 5,
        }
    }
}

impl DemandConfig {
    /// Someone who lingers on each item needs half the forward look-ahead.
    pub fn adjusted_for(&self, profile: &BehaviorProfile) -> DemandConfig {
        if !profile.is_deliberate() {
            return self.clone();
        }
        DemandConfig {
            lookahead_after: self.lookahead_after.div_ceil(2),
            ..self.clone()
        }
    }
}

/// What the feed currently shows.
#[derive(Debug, Clone, Default)]
pub struct ViewportSnapshot {
    /// Feed items in display order.
    pub items: Vec<MediaItem>,
    /// Indices into `items` that are on screen.
    pub visible: Range<usize>,
    /// Rendered width of a feed cell, used to pick image renditions.
    pub display_width: Option<u32>,
}

impl ViewportSnapshot {
    pub fn new(items: Vec<MediaItem>, visible: Range<usize>) -> Self {
        Self {
            items,
            visible,
            display_width: None,
        }
    }

    pub fn with_display_width(mut self, width: u32) -> Self {
        self.display_width = Some(width);
        self
    }

    fn clamped_visible(&self) -> Range<usize> {
        let end = self.visible.end.min(self.items.len());
        self.visible.start.min(end)..end
    }

    /// The visible item nearest the center of the window.
    pub fn focus(&self) -> Option<&MediaItem> {
        let visible = self.clamped_visible();
        if visible.is_empty() {
            return None;
        }
        self.items.get(visible.start + visible.len() / 2)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemandRequest {
    pub item: MediaItem,
    pub priority: Priority,
}

impl DemandRequest {
    pub fn key(&self) -> CacheKey {
        self.item.cache_key()
    }
}

fn with_rendition(
    item: &MediaItem,
    priority: Priority,
    display_width: Option<u32>,
    device: DeviceClass,
    network: NetworkClass,
) -> MediaItem {
    if item.kind != MediaKind::Image || !item.transforms.is_empty() {
        return item.clone();
    }
    let transforms = match (priority, display_width) {
        (Priority::Low, _) => rendition::thumbnail_transforms(network),
        (_, Some(width)) => rendition::image_transforms(width, device, network),
        (_, None) => return item.clone(),
    };
    item.clone().with_transforms(transforms)
}

/// Build the ordered, deduplicated preload set for `snapshot`.
///
/// `predicted` ids are looked up among the snapshot's items; ids the feed
/// has not loaded yet are skipped.
pub fn plan_demand(
    snapshot: &ViewportSnapshot,
    predicted: &[ItemId],
    config: &DemandConfig,
    device: DeviceClass,
    network: NetworkClass,
) -> Vec<DemandRequest> {
    let mut out: Vec<DemandRequest> = Vec::new();
    let mut positions: HashMap<ItemId, usize> = HashMap::new();

    let mut push_or_update = |item: &MediaItem, priority: Priority| {
        if let Some(existing) = positions.get(&item.id) {
            if priority.weight() > out[*existing].priority.weight() {
                let upgraded =
                    with_rendition(item, priority, snapshot.display_width, device, network);
                out[*existing] = DemandRequest {
                    item: upgraded,
                    priority,
                };
            }
        } else {
            positions.insert(item.id.clone(), out.len());
            out.push(DemandRequest {
                item: with_rendition(item, priority, snapshot.display_width, device, network),
                priority,
            });
        }
    };

    let visible = snapshot.clamped_visible();
    if !visible.is_empty() {
        let center = visible.len() / 2;
        let mut indexed: Vec<(usize, usize)> =
            visible.clone().enumerate().collect();
        indexed.sort_by_key(|(offset, _)| offset.abs_diff(center));
        for (_, idx) in indexed {
            push_or_update(&snapshot.items[idx], Priority::High);
        }
    }

    let by_id: HashMap<&ItemId, &MediaItem> =
        snapshot.items.iter().map(|item| (&item.id, item)).collect();
    for id in predicted.iter().take(config.predicted) {
        if let Some(item) = by_id.get(id) {
            push_or_update(item, Priority::Medium);
        }
    }

    let after_end = visible
        .end
        .saturating_add(config.lookahead_after)
        .min(snapshot.items.len());
    for item in &snapshot.items[visible.end..after_end] {
        push_or_update(item, Priority::Low);
    }
    let before_start = visible.start.saturating_sub(config.lookahead_before);
    for item in snapshot.items[before_start..visible.start].iter().rev() {
        push_or_update(item, Priority::Low);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(n: usize) -> Vec<MediaItem> {
        (0..n)
            .map(|i| MediaItem::new(format!("i{i}"), format!("feed/{i}.jpg"), MediaKind::Image))
            .collect()
    }

    fn ids(plan: &[DemandRequest]) -> Vec<&str> {
        plan.iter().map(|r| r.item.id.as_str()).collect()
    }

    #[test]
    fn visible_items_are_high_and_center_first() {
        let snapshot = ViewportSnapshot::new(feed(10), 2..6);
        let config = DemandConfig {
            lookahead_after: 0,
            lookahead_before: 0,
            ..DemandConfig::default()
        };
        let plan = plan_demand(&snapshot, &[], &config, DeviceClass::Desktop, NetworkClass::Fast);

        assert_eq!(ids(&plan), vec!["i4", "i3", "i5", "i2"]);
        assert!(plan.iter().all(|r| r.priority == Priority::High));
    }

    #[test]
    fn tiers_follow_visible_predicted_lookahead() {
        let snapshot = ViewportSnapshot::new(feed(10), 3..4);
        let config = DemandConfig {
            lookahead_after: 2,
            lookahead_before: 1,
            predicted: 5,
        };
        let predicted = vec![ItemId::new("i8"), ItemId::new("missing")];
        let plan = plan_demand(
            &snapshot,
            &predicted,
            &config,
            DeviceClass::Desktop,
            NetworkClass::Fast,
        );

        assert_eq!(ids(&plan), vec!["i3", "i8", "i4", "i5", "i2"]);
        let priorities: Vec<_> = plan.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![
                Priority::High,
                Priority::Medium,
                Priority::Low,
                Priority::Low,
                Priority::Low
            ]
        );
    }

    #[test]
    fn duplicates_keep_highest_priority() {
        let snapshot = ViewportSnapshot::new(feed(6), 0..2);
        let predicted = vec![ItemId::new("i2"), ItemId::new("i0")];
        let plan = plan_demand(
            &snapshot,
            &predicted,
            &DemandConfig::default(),
            DeviceClass::Desktop,
            NetworkClass::Fast,
        );

        let i0 = plan.iter().find(|r| r.item.id.as_str() == "i0").unwrap();
        assert_eq!(i0.priority, Priority::High);
        let i2: Vec<_> = plan.iter().filter(|r| r.item.id.as_str() == "i2").collect();
        assert_eq!(i2.len(), 1);
        assert_eq!(i2[0].priority, Priority::Medium);
    }

    #[test]
    fn image_renditions_follow_tier_and_network() {
        let snapshot = ViewportSnapshot::new(feed(4), 0..1).with_display_width(600);
        let plan = plan_demand(
            &snapshot,
            &[],
            &DemandConfig::default(),
            DeviceClass::Desktop,
            NetworkClass::Slow,
        );
        assert_eq!(plan[0].item.transforms.width, Some(450));
        assert_eq!(plan[1].priority, Priority::Low);
        assert_eq!(plan[1].item.transforms.width, Some(240));
        assert_ne!(plan[0].key(), CacheKey::original("feed/0.jpg"));
    }

    #[test]
    fn out_of_range_window_is_clamped() {
        let snapshot = ViewportSnapshot::new(feed(3), 2..9);
        assert_eq!(snapshot.focus().map(|i| i.id.as_str()), Some("i2"));
        let plan = plan_demand(
            &snapshot,
            &[],
            &DemandConfig::default(),
            DeviceClass::Mobile,
            NetworkClass::Fast,
        );
        assert_eq!(ids(&plan), vec!["i2", "i1", "i0"]);
    }

    #[test]
    fn deliberate_profiles_halve_forward_lookahead() {
        let config = DemandConfig::default();
        let skimming = BehaviorProfile {
            avg_view_duration_ms: 800.0,
            views_considered: 10,
            ..BehaviorProfile::default()
        };
        let lingering = BehaviorProfile {
            avg_view_duration_ms: 4_000.0,
            ..skimming.clone()
        };

        assert_eq!(config.adjusted_for(&skimming).lookahead_after, 6);
        let adjusted = config.adjusted_for(&lingering);
        assert_eq!(adjusted.lookahead_after, 3);
        assert_eq!(adjusted.lookahead_before, config.lookahead_before);
        assert_eq!(adjusted.predicted, config.predicted);
    }
}
