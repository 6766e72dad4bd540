//! Bounded rings of viewing behaviour and the profile derived from them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use lumen_contracts::clock::Clock;
use lumen_model::{
    BehaviorProfile, DeviceClass, InteractionEvent, InteractionKind, ItemId,
    NetworkClass, ScrollSample, ViewEvent,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub view_capacity: usize,
    pub interaction_capacity: usize,
    pub scroll_capacity: usize,
    /// Recompute the profile after this many views.
    pub recompute_every: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            view_capacity: 100,
            interaction_capacity: 200,
            scroll_capacity: 50,
            recompute_every: 10,
        }
    }
}

/// Persistable copy of the tracker rings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub views: Vec<ViewEvent>,
    pub interactions: Vec<InteractionEvent>,
    pub scrolls: Vec<ScrollSample>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, capacity: usize, value: T) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn refill<T>(ring: &mut VecDeque<T>, capacity: usize, values: Vec<T>) {
    ring.clear();
    let skip = values.len().saturating_sub(capacity);
    ring.extend(values.into_iter().skip(skip));
}

#[derive(Debug)]
pub struct BehaviorTracker {
    clock: Arc<dyn Clock>,
    config: BehaviorConfig,
    views: VecDeque<ViewEvent>,
    interactions: VecDeque<InteractionEvent>,
    scrolls: VecDeque<ScrollSample>,
    profile: BehaviorProfile,
    views_since_recompute: usize,
    device: DeviceClass,
    network: NetworkClass,
}

impl BehaviorTracker {
    pub fn new(clock: Arc<dyn Clock>, config: BehaviorConfig) -> Self {
        Self {
            clock,
            views: VecDeque::with_capacity(config.view_capacity),
            interactions: VecDeque::with_capacity(config.interaction_capacity),
            scrolls: VecDeque::with_capacity(config.scroll_capacity),
            config,
            profile: BehaviorProfile::default(),
            views_since_recompute: 0,
            device: DeviceClass::default(),
            network: NetworkClass::default(),
        }
    }

    pub fn set_device_class(&mut self, device: DeviceClass) {
        self.device = device;
    }

    pub fn set_network_class(&mut self, network: NetworkClass) {
        self.network = network;
    }

    /// Returns `true` when this view triggered a profile recompute.
    pub fn track_view(
        &mut self,
        item_id: ItemId,
        duration_ms: u64,
        scroll_position: f64,
    ) -> bool {
        let event = ViewEvent {
            item_id,
            timestamp: self.clock.now(),
            duration_ms,
            scroll_position,
            device_class: self.device,
            network_class: self.network,
        };
        push_bounded(&mut self.views, self.config.view_capacity, event);

        self.views_since_recompute += 1;
        let every = self.config.recompute_every.max(1);
        if self.views_since_recompute >= every {
            self.recompute();
            true
        } else {
            false
        }
    }

    pub fn track_interaction(
        &mut self,
        kind: InteractionKind,
        item_id: ItemId,
        metadata: BTreeMap<String, String>,
    ) {
        let event = InteractionEvent {
            kind,
            item_id,
            timestamp: self.clock.now(),
            metadata,
        };
        push_bounded(
            &mut self.interactions,
            self.config.interaction_capacity,
            event,
        );
    }

    pub fn track_scroll(&mut self, position: f64) {
        let sample = ScrollSample {
            position,
            timestamp: self.clock.now(),
        };
        push_bounded(&mut self.scrolls, self.config.scroll_capacity, sample);
    }

    pub fn recompute(&mut self) -> &BehaviorProfile {
        self.profile = BehaviorProfile::derive(
            &self.views,
            &self.interactions,
            &self.scrolls,
        );
        self.views_since_recompute = 0;
        trace!(
            views = self.profile.views_considered,
            top_hours = ?self.profile.top_hours,
            "recomputed behaviour profile"
        );
        &self.profile
    }

    pub fn profile(&self) -> &BehaviorProfile {
        &self.profile
    }

    pub fn views(&self) -> impl ExactSizeIterator<Item = &ViewEvent> {
        self.views.iter()
    }

    pub fn interactions(&self) -> impl ExactSizeIterator<Item = &InteractionEvent> {
        self.interactions.iter()
    }

    pub fn scrolls(&self) -> impl ExactSizeIterator<Item = &ScrollSample> {
        self.scrolls.iter()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.len()
    }

    pub fn scroll_count(&self) -> usize {
        self.scrolls.len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            views: self.views.iter().cloned().collect(),
            interactions: self.interactions.iter().cloned().collect(),
            scrolls: self.scrolls.iter().copied().collect(),
        }
    }

    /// Replace the rings with `snapshot`, keeping the newest events that fit.
    pub fn restore(&mut self, snapshot: TrackerSnapshot) {
        refill(&mut self.views, self.config.view_capacity, snapshot.views);
        refill(
            &mut self.interactions,
            self.config.interaction_capacity,
            snapshot.interactions,
        );
        refill(&mut self.scrolls, self.config.scroll_capacity, snapshot.scrolls);
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::{ManualClock, fixed_now};

    fn tracker(config: BehaviorConfig) -> (BehaviorTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        (BehaviorTracker::new(clock.clone(), config), clock)
    }

    #[test]
    fn rings_drop_oldest_when_full() {
        let (mut tracker, _) = tracker(BehaviorConfig {
            view_capacity: 3,
            scroll_capacity: 2,
            ..BehaviorConfig::default()
        });
        for i in 0..5 {
            tracker.track_view(ItemId::new(format!("v{i}")), 100, 0.0);
            tracker.track_scroll(i as f64);
        }
        let ids: Vec<_> = tracker.views().map(|v| v.item_id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v3", "v4"]);
        assert_eq!(tracker.scroll_count(), 2);
    }

    #[test]
    fn profile_recomputes_every_tenth_view() {
        let (mut tracker, clock) = tracker(BehaviorConfig::default());
        tracker.set_network_class(NetworkClass::Slow);
        for i in 0..9 {
            assert!(!tracker.track_view(ItemId::new(format!("v{i}")), 2_000, 0.0));
            clock.advance(Duration::seconds(5));
        }
        assert_eq!(tracker.profile().views_considered, 0);

        assert!(tracker.track_view(ItemId::new("v9"), 2_000, 0.0));
        let profile = tracker.profile();
        assert_eq!(profile.views_considered, 10);
        assert_eq!(profile.top_hours, vec![10]);
        assert!(tracker.views().all(|v| v.network_class == NetworkClass::Slow));
    }

    #[test]
    fn profile_is_a_function_of_ring_contents() {
        let (mut tracker, clock) = tracker(BehaviorConfig::default());
        tracker.track_interaction(InteractionKind::Like, ItemId::new("a"), BTreeMap::new());
        tracker.track_scroll(0.0);
        clock.advance(Duration::milliseconds(200));
        tracker.track_scroll(100.0);
        tracker.track_view(ItemId::new("a"), 1_500, 100.0);

        let live = tracker.recompute().clone();
        let snapshot = tracker.snapshot();
        let pure = BehaviorProfile::derive(
            &snapshot.views,
            &snapshot.interactions,
            &snapshot.scrolls,
        );
        assert_eq!(live, pure);
        assert_eq!(live.dominant_interaction, Some(InteractionKind::Like));
    }

    #[test]
    fn restore_keeps_newest_events_within_capacity() {
        let (mut source, _) = tracker(BehaviorConfig::default());
        for i in 0..6 {
            source.track_view(ItemId::new(format!("v{i}")), 1_000, 0.0);
        }
        let (mut target, _) = tracker(BehaviorConfig {
            view_capacity: 4,
            ..BehaviorConfig::default()
        });
        target.restore(source.snapshot());

        let ids: Vec<_> = target.views().map(|v| v.item_id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v3", "v4", "v5"]);
        assert_eq!(target.profile().views_considered, 4);
    }
}
