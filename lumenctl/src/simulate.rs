//! Replays a recorded interaction trace through the tracker and model.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lumen_core::behavior::{BehaviorConfig, BehaviorTracker};
use lumen_core::prediction::{PredictionConfig, PredictionModel};
use lumen_core::testing::{ManualClock, fixed_now};
use lumen_model::{BehaviorProfile, DeviceClass, InteractionKind, ItemId, NetworkClass};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub device: DeviceClass,
    #[serde(default)]
    pub network: NetworkClass,
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    View {
        item: ItemId,
        at: DateTime<Utc>,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        scroll: f64,
    },
    Interaction {
        kind: InteractionKind,
        item: ItemId,
        at: DateTime<Utc>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    Scroll {
        position: f64,
        at: DateTime<Utc>,
    },
    /// Network class change mid-session.
    Network {
        class: NetworkClass,
        at: DateTime<Utc>,
    },
}

impl TraceEvent {
    fn at(&self) -> DateTime<Utc> {
        match self {
            TraceEvent::View { at, .. }
            | TraceEvent::Interaction { at, .. }
            | TraceEvent::Scroll { at, .. }
            | TraceEvent::Network { at, .. } => *at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub views: usize,
    pub interactions: usize,
    pub scrolls: usize,
    pub profile: BehaviorProfile,
    pub predict_from: Option<ItemId>,
    pub predictions: Vec<ItemId>,
}

pub fn load_trace(path: &Path) -> Result<Trace> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trace {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid trace {}", path.display()))
}

/// Replay `trace` in timestamp order. Predictions are made from `from`, or
/// from the last viewed item when `from` is `None`.
pub fn replay(
    trace: Trace,
    behavior: BehaviorConfig,
    prediction: PredictionConfig,
    from: Option<ItemId>,
    count: usize,
) -> SimulationReport {
    let mut events = trace.events;
    events.sort_by_key(TraceEvent::at);

    let start = events.first().map(TraceEvent::at).unwrap_or_else(fixed_now);
    let clock = Arc::new(ManualClock::new(start));
    let mut tracker = BehaviorTracker::new(clock.clone(), behavior);
    let mut model = PredictionModel::new(clock.clone(), prediction);
    tracker.set_device_class(trace.device);
    tracker.set_network_class(trace.network);

    let mut last_view: Option<ItemId> = None;
    for event in events {
        clock.set(event.at());
        match event {
            TraceEvent::View {
                item,
                duration_ms,
                scroll,
                ..
            } => {
                tracker.track_view(item.clone(), duration_ms, scroll);
                model.observe(&item, last_view.as_ref());
                last_view = Some(item);
            }
            TraceEvent::Interaction {
                kind,
                item,
                metadata,
                ..
            } => tracker.track_interaction(kind, item, metadata),
            TraceEvent::Scroll { position, .. } => tracker.track_scroll(position),
            TraceEvent::Network { class, .. } => tracker.set_network_class(class),
        }
    }

    let profile = tracker.recompute().clone();
    let predict_from = from.or(last_view);
    let predictions = predict_from
        .as_ref()
        .map(|item| model.predict(item, count))
        .unwrap_or_default();

    SimulationReport {
        views: tracker.view_count(),
        interactions: tracker.interaction_count(),
        scrolls: tracker.scroll_count(),
        profile,
        predict_from,
        predictions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"{
        "device": "mobile",
        "network": "slow",
        "events": [
            {"type": "view", "item": "b", "at": "2026-01-05T10:00:05Z", "duration_ms": 2000},
            {"type": "view", "item": "a", "at": "2026-01-05T10:00:00Z", "duration_ms": 1000},
            {"type": "interaction", "kind": "like", "item": "b", "at": "2026-01-05T10:00:06Z"},
            {"type": "scroll", "position": 300.0, "at": "2026-01-05T10:00:07Z"},
            {"type": "view", "item": "c", "at": "2026-01-05T10:00:09Z", "duration_ms": 3000}
        ]
    }"#;

    #[test]
    fn replays_in_timestamp_order() {
        let trace: Trace = serde_json::from_str(TRACE).unwrap();
        let report = replay(
            trace,
            BehaviorConfig::default(),
            PredictionConfig::default(),
            Some(ItemId::new("a")),
            3,
        );

        assert_eq!(report.views, 3);
        assert_eq!(report.interactions, 1);
        assert_eq!(report.scrolls, 1);
        assert_eq!(report.profile.avg_view_duration_ms, 2000.0);
        assert_eq!(report.profile.top_hours, vec![10]);
        assert_eq!(report.predictions.first(), Some(&ItemId::new("b")));
    }

    #[test]
    fn defaults_to_last_viewed_item() {
        let trace: Trace = serde_json::from_str(TRACE).unwrap();
        let report = replay(
            trace,
            BehaviorConfig::default(),
            PredictionConfig::default(),
            None,
            2,
        );
        assert_eq!(report.predict_from, Some(ItemId::new("c")));
        assert!(report.predictions.len() <= 2);
    }
}
