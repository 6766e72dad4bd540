//! Score-based eviction.
//!
//! Scoring and planning are pure; [`crate::cache::UrlCache::evict_to`] applies
//! a plan against the live map.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use lumen_model::{ByteSize, CacheEntry, CacheKey, MediaKind, NetworkClass};
use serde::{Deserialize, Serialize};

/// Tunable weights for [`EvictionPolicy::score`]. Higher scores survive longer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionWeights {
    /// Added per recorded access.
    pub access_weight: f64,
    /// Recency bonus for an entry touched just now.
    pub recency_max: f64,
    /// Recency bonus lost per hour since the last access.
    pub recency_decay_per_hour: f64,
    /// Subtracted per MiB of estimated size.
    pub size_penalty_per_mib: f64,
    /// Added while the network is constrained; refetching is expensive then.
    pub slow_network_bonus: f64,
    pub image_bonus: f64,
    pub video_bonus: f64,
    pub audio_bonus: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            access_weight: 10.0,
            recency_max: 100.0,
            recency_decay_per_hour: 5.0,
            size_penalty_per_mib: 2.0,
            slow_network_bonus: 20.0,
            image_bonus: 15.0,
            video_bonus: 10.0,
            audio_bonus: 5.0,
        }
    }
}

impl EvictionWeights {
    pub fn type_bonus(&self, kind: MediaKind) -> f64 {
        match kind {
            MediaKind::Image => self.image_bonus,
            MediaKind::Video => self.video_bonus,
            MediaKind::Audio => self.audio_bonus,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub weights: EvictionWeights,
    /// Once over budget, evict down to `budget * low_water_ratio` so the
    /// next few inserts do not immediately trip the cap again.
    pub low_water_ratio: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            weights: EvictionWeights::default(),
            low_water_ratio: 0.9,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EvictionPolicy {
    weights: EvictionWeights,
}

impl EvictionPolicy {
    pub fn new(weights: EvictionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &EvictionWeights {
        &self.weights
    }

    pub fn score(
        &self,
        entry: &CacheEntry,
        now: DateTime<Utc>,
        network: NetworkClass,
    ) -> f64 {
        let w = &self.weights;
        let frequency = w.access_weight * f64::from(entry.access_count);
        let recency = (w.recency_max
            - w.recency_decay_per_hour * entry.hours_since_access(now))
        .max(0.0);
        let size = w.size_penalty_per_mib * entry.size.as_mib();
        let network_bonus = if network.is_constrained() {
            w.slow_network_bonus
        } else {
            0.0
        };

        frequency + recency - size + network_bonus + w.type_bonus(entry.kind)
    }

    pub fn candidate(
        &self,
        entry: &CacheEntry,
        now: DateTime<Utc>,
        network: NetworkClass,
    ) -> EvictionCandidate {
        EvictionCandidate {
            key: entry.key.clone(),
            size: entry.size,
            score: self.score(entry, now, network),
            last_accessed_at: entry.last_accessed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub size: ByteSize,
    pub score: f64,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct EvictionPlan {
    pub planned: Vec<EvictionCandidate>,
    pub total_before: ByteSize,
    pub total_after: ByteSize,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.planned.iter().map(|c| &c.key)
    }

    pub fn freed(&self) -> ByteSize {
        self.total_before.saturating_sub(self.total_after)
    }
}

fn eviction_order(a: &EvictionCandidate, b: &EvictionCandidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
        .then_with(|| a.key.cmp(&b.key))
}

/// Remove the lowest-scoring candidates until the total fits `target`.
///
/// Stops as soon as the total is at or below `target`; nothing is planned
/// when it already fits.
pub fn plan_evictions(
    mut candidates: Vec<EvictionCandidate>,
    target: ByteSize,
) -> EvictionPlan {
    let mut total = candidates
        .iter()
        .fold(ByteSize::ZERO, |acc, c| acc.saturating_add(c.size));
    let mut plan = EvictionPlan {
        total_before: total,
        ..EvictionPlan::default()
    };

    if total > target {
        candidates.sort_by(eviction_order);
        for candidate in candidates {
            if total <= target {
                break;
            }
            total = total.saturating_sub(candidate.size);
            plan.planned.push(candidate);
        }
    }

    plan.total_after = total;
    plan
}
