use chrono::Timelike;

use crate::events::{InteractionEvent, InteractionKind, ScrollSample, ViewEvent};

/// Most frequent hours kept in [`BehaviorProfile::top_hours`].
pub const TOP_HOURS: usize = 5;

/// Derived summary of recent viewing behaviour. Heuristic only.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BehaviorProfile {
    pub avg_view_duration_ms: f64,
    /// Up to five hours of day (0..=23, UTC), most frequent first.
    pub top_hours: Vec<u32>,
    /// Mean scroll speed in position units per millisecond.
    pub scroll_velocity: f64,
    pub dominant_interaction: Option<InteractionKind>,
    pub views_considered: usize,
    pub interactions_considered: usize,
}

impl BehaviorProfile {
    /// Summarise the given events. Depends on nothing but its inputs.
    ///
    /// Hour ties go to the lower hour; interaction ties go to the kind
    /// declared first in [`InteractionKind`].
    pub fn derive<'a>(
        views: impl IntoIterator<Item = &'a ViewEvent>,
        interactions: impl IntoIterator<Item = &'a InteractionEvent>,
        scrolls: impl IntoIterator<Item = &'a ScrollSample>,
    ) -> Self {
        let mut hour_counts = [0usize; 24];
        let mut total_duration = 0u128;
        let mut views_considered = 0usize;
        for view in views {
            views_considered += 1;
            total_duration += u128::from(view.duration_ms);
            hour_counts[view.timestamp.hour() as usize] += 1;
        }

        let avg_view_duration_ms = if views_considered == 0 {
            0.0
        } else {
            total_duration as f64 / views_considered as f64
        };

        let mut hours: Vec<(u32, usize)> = hour_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(hour, count)| (hour as u32, *count))
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let top_hours = hours
            .into_iter()
            .take(TOP_HOURS)
            .map(|(hour, _)| hour)
            .collect();

        let mut kind_counts = vec![0usize; InteractionKind::ALL.len()];
        let mut interactions_considered = 0usize;
        for event in interactions {
            interactions_considered += 1;
            if let Some(idx) =
                InteractionKind::ALL.iter().position(|k| *k == event.kind)
            {
                kind_counts[idx] += 1;
            }
        }
        let mut dominant_interaction = None;
        let mut best = 0usize;
        for (kind, count) in InteractionKind::ALL.iter().zip(kind_counts) {
            if count > best {
                best = count;
                dominant_interaction = Some(*kind);
            }
        }

        Self {
            avg_view_duration_ms,
            top_hours,
            scroll_velocity: scroll_velocity(scrolls),
            dominant_interaction,
            views_considered,
            interactions_considered,
        }
    }

    /// Whether the user tends to linger (long average views, slow scroll).
    pub fn is_deliberate(&self) -> bool {
        self.views_considered > 0
            && self.avg_view_duration_ms >= 3_000.0
            && self.scroll_velocity.abs() < 1.0
    }
}

fn scroll_velocity<'a>(
    scrolls: impl IntoIterator<Item = &'a ScrollSample>,
) -> f64 {
    let mut previous: Option<&ScrollSample> = None;
    let mut sum = 0.0;
    let mut samples = 0usize;
    for sample in scrolls {
        if let Some(prev) = previous {
            let dt = sample
                .timestamp
                .signed_duration_since(prev.timestamp)
                .num_milliseconds();
            if dt > 0 {
                sum += (sample.position - prev.position) / dt as f64;
                samples += 1;
            }
        }
        previous = Some(sample);
    }
    if samples == 0 { 0.0 } else { sum / samples as f64 }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::events::{DeviceClass, NetworkClass};
    use crate::media::ItemId;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, hour, minute, 0).unwrap()
    }

    fn view(hour: u32, duration_ms: u64) -> ViewEvent {
        ViewEvent {
            item_id: ItemId::new("v"),
            timestamp: at(hour, 0),
            duration_ms,
            scroll_position: 0.0,
            device_class: DeviceClass::Mobile,
            network_class: NetworkClass::Fast,
        }
    }

    fn interaction(kind: InteractionKind) -> InteractionEvent {
        InteractionEvent {
            kind,
            item_id: ItemId::new("i"),
            timestamp: at(12, 0),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_inputs_give_neutral_profile() {
        let profile = BehaviorProfile::derive([], [], []);
        assert_eq!(profile, BehaviorProfile::default());
        assert!(!profile.is_deliberate());
    }

    #[test]
    fn hours_rank_by_count_with_lower_hour_on_ties() {
        let views: Vec<_> = [22, 8, 8, 22, 3, 15, 15, 15, 1, 9]
            .into_iter()
            .map(|h| view(h, 1_000))
            .collect();
        let profile = BehaviorProfile::derive(&views, [], []);
        assert_eq!(profile.top_hours, vec![15, 8, 22, 1, 3]);
        assert_eq!(profile.views_considered, 10);
        assert!((profile.avg_view_duration_ms - 1_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dominant_interaction_ties_follow_declaration_order() {
        let events = vec![
            interaction(InteractionKind::Save),
            interaction(InteractionKind::Comment),
            interaction(InteractionKind::Save),
            interaction(InteractionKind::Comment),
        ];
        let profile = BehaviorProfile::derive([], &events, []);
        assert_eq!(profile.dominant_interaction, Some(InteractionKind::Comment));
        assert_eq!(profile.interactions_considered, 4);
    }

    #[test]
    fn scroll_velocity_skips_non_positive_time_steps() {
        let start = at(9, 0);
        let samples = vec![
            ScrollSample { position: 0.0, timestamp: start },
            ScrollSample {
                position: 100.0,
                timestamp: start + Duration::milliseconds(100),
            },
            // Same timestamp: ignored.
            ScrollSample {
                position: 500.0,
                timestamp: start + Duration::milliseconds(100),
            },
            ScrollSample {
                position: 700.0,
                timestamp: start + Duration::milliseconds(300),
            },
        ];
        let profile = BehaviorProfile::derive([], [], &samples);
        // (1.0 + 1.0) / 2
        assert!((profile.scroll_velocity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn derive_is_deterministic() {
        let views = vec![view(7, 4_000), view(7, 6_000)];
        let a = BehaviorProfile::derive(&views, [], []);
        let b = BehaviorProfile::derive(&views, [], []);
        assert_eq!(a, b);
        assert!(a.is_deliberate());
    }
}
