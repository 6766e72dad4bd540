//! Markov-style next-item prediction.
//!
//! Three tables feed [`PredictionModel::predict`]: item-to-item transition
//! counts, the items seen in each hour of day, and two-item sequences with
//! their observed successors. Every table is bounded; the least recently
//! touched rows are dropped once a table exceeds its limit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Timelike;
use lumen_contracts::clock::Clock;
use lumen_model::ItemId;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Distinct source items kept in the transition table.
    pub max_sources: usize,
    /// Targets kept per source item.
    pub max_successors: usize,
    /// Distinct two-item sequence keys.
    pub max_sequences: usize,
    /// Successors kept per sequence key.
    pub sequence_successor_cap: usize,
    /// Items kept per hour-of-day bucket.
    pub hourly_cap: usize,
    /// Derive a sequence entry every N observations.
    pub sequence_every: u64,
    /// Items remembered as "observed" for the unseen-item check.
    pub max_known_items: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_sources: 500,
            max_successors: 20,
            max_sequences: 500,
            sequence_successor_cap: 10,
            hourly_cap: 50,
            sequence_every: 5,
            max_known_items: 2_000,
        }
    }
}

#[derive(Debug, Default)]
struct TransitionRow {
    touched: u64,
    /// target -> (count, last tick the pair was observed)
    targets: HashMap<ItemId, (u32, u64)>,
}

#[derive(Debug, Default)]
struct SequenceRow {
    touched: u64,
    successors: VecDeque<ItemId>,
}

type SequenceKey = (ItemId, ItemId);

/// Remove least recently touched keys until `map.len() <= max`.
fn trim_lru<K, V>(map: &mut HashMap<K, V>, max: usize, touched: impl Fn(&V) -> u64)
where
    K: Clone + Eq + std::hash::Hash,
{
    while map.len() > max {
        let Some(oldest) = map
            .iter()
            .min_by_key(|(_, v)| touched(v))
            .map(|(k, _)| k.clone())
        else {
            break;
        };
        map.remove(&oldest);
    }
}

#[derive(Debug)]
pub struct PredictionModel {
    clock: Arc<dyn Clock>,
    config: PredictionConfig,
    tick: u64,
    transitions: HashMap<ItemId, TransitionRow>,
    hourly: Vec<VecDeque<ItemId>>,
    sequences: HashMap<SequenceKey, SequenceRow>,
    recent: VecDeque<ItemId>,
    known: HashMap<ItemId, u64>,
}

impl PredictionModel {
    pub fn new(clock: Arc<dyn Clock>, config: PredictionConfig) -> Self {
        Self {
            clock,
            config,
            tick: 0,
            transitions: HashMap::new(),
            hourly: vec![VecDeque::new(); 24],
            sequences: HashMap::new(),
            recent: VecDeque::with_capacity(3),
            known: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Record that `current` was viewed, optionally right after `previous`.
    pub fn observe(&mut self, current: &ItemId, previous: Option<&ItemId>) {
        self.tick += 1;
        let tick = self.tick;

        if let Some(previous) = previous
            && previous != current
        {
            let row = self.transitions.entry(previous.clone()).or_default();
            row.touched = tick;
            let slot = row.targets.entry(current.clone()).or_insert((0, tick));
            slot.0 = slot.0.saturating_add(1);
            slot.1 = tick;
            trim_lru(&mut row.targets, self.config.max_successors, |(_, t)| *t);
            trim_lru(&mut self.transitions, self.config.max_sources, |r| r.touched);
            self.touch_known(previous, tick);
        }

        let hour = self.clock.now().hour() as usize;
        if self.config.hourly_cap > 0 {
            let bucket = &mut self.hourly[hour];
            while bucket.len() >= self.config.hourly_cap {
                bucket.pop_front();
            }
            bucket.push_back(current.clone());
        }

        while self.recent.len() >= 3 {
            self.recent.pop_front();
        }
        self.recent.push_back(current.clone());
        self.touch_known(current, tick);

        let every = self.config.sequence_every.max(1);
        if tick % every == 0 && self.recent.len() == 3 {
            self.record_sequence(tick);
        }
    }

    fn touch_known(&mut self, item: &ItemId, tick: u64) {
        self.known.insert(item.clone(), tick);
        trim_lru(&mut self.known, self.config.max_known_items, |t| *t);
    }

    fn record_sequence(&mut self, tick: u64) {
        let key = (self.recent[0].clone(), self.recent[1].clone());
        let successor = self.recent[2].clone();
        let cap = self.config.sequence_successor_cap;
        let row = self.sequences.entry(key).or_default();
        row.touched = tick;
        if cap > 0 && !row.successors.contains(&successor) {
            while row.successors.len() >= cap {
                row.successors.pop_front();
            }
            row.successors.push_back(successor);
        }
        trim_lru(&mut self.sequences, self.config.max_sequences, |r| r.touched);
        trace!(sequences = self.sequences.len(), "recorded view sequence");
    }

    /// Up to `count` items likely to be viewed after `current`.
    ///
    /// Transition targets come first (most frequent first), then items
    /// common in the current hour, then successors of the last two
    /// observed items. Returns nothing for an item never observed.
    pub fn predict(&self, current: &ItemId, count: usize) -> Vec<ItemId> {
        if count == 0 || !self.known.contains_key(current) {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(count);
        let mut seen: HashSet<ItemId> = HashSet::new();
        seen.insert(current.clone());
        let mut push = |item: &ItemId, out: &mut Vec<ItemId>| {
            if out.len() < count && seen.insert(item.clone()) {
                out.push(item.clone());
            }
        };

        if let Some(row) = self.transitions.get(current) {
            let mut targets: Vec<_> = row.targets.iter().collect();
            targets.sort_by(|(a_id, (a_count, a_tick)), (b_id, (b_count, b_tick))| {
                b_count
                    .cmp(a_count)
                    .then(b_tick.cmp(a_tick))
                    .then(a_id.cmp(b_id))
            });
            for (target, _) in targets {
                push(target, &mut out);
            }
        }

        let hour = self.clock.now().hour() as usize;
        for item in self.hourly_ranked(hour) {
            push(item, &mut out);
        }

        if self.recent.len() >= 2 {
            let n = self.recent.len();
            let key = (self.recent[n - 2].clone(), self.recent[n - 1].clone());
            if let Some(row) = self.sequences.get(&key) {
                for item in row.successors.iter().rev() {
                    push(item, &mut out);
                }
            }
        }

        out
    }

    /// Items in `hour`'s bucket by descending frequency, most recent first on ties.
    fn hourly_ranked(&self, hour: usize) -> Vec<&ItemId> {
        let bucket = &self.hourly[hour];
        let mut stats: HashMap<&ItemId, (usize, usize)> = HashMap::new();
        for (position, item) in bucket.iter().enumerate() {
            let entry = stats.entry(item).or_insert((0, position));
            entry.0 += 1;
            entry.1 = position;
        }
        let mut ranked: Vec<_> = stats.into_iter().collect();
        ranked.sort_by(|(_, (a_count, a_pos)), (_, (b_count, b_pos))| {
            b_count.cmp(a_count).then(b_pos.cmp(a_pos))
        });
        ranked.into_iter().map(|(item, _)| item).collect()
    }

    pub fn transition_count(&self, from: &ItemId, to: &ItemId) -> u32 {
        self.transitions
            .get(from)
            .and_then(|row| row.targets.get(to))
            .map_or(0, |(count, _)| *count)
    }

    pub fn observations(&self) -> u64 {
        self.tick
    }

    pub fn source_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn sequence_successors(&self, first: &ItemId, second: &ItemId) -> Vec<ItemId> {
        self.sequences
            .get(&(first.clone(), second.clone()))
            .map(|row| row.successors.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.tick = 0;
        self.transitions.clear();
        self.hourly.iter_mut().for_each(VecDeque::clear);
        self.sequences.clear();
        self.recent.clear();
        self.known.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::{ManualClock, fixed_now};

    fn model(config: PredictionConfig) -> (PredictionModel, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(fixed_now()));
        (PredictionModel::new(clock.clone(), config), clock)
    }

    fn id(raw: &str) -> ItemId {
        ItemId::new(raw)
    }

    fn walk(model: &mut PredictionModel, items: &[&str]) {
        let mut previous: Option<ItemId> = None;
        for raw in items {
            let current = id(raw);
            model.observe(&current, previous.as_ref());
            previous = Some(current);
        }
    }

    #[test]
    fn chain_records_transitions_and_predicts_next() {
        let (mut model, _) = model(PredictionConfig::default());
        walk(&mut model, &["x", "y", "z"]);

        assert_eq!(model.transition_count(&id("x"), &id("y")), 1);
        assert_eq!(model.transition_count(&id("y"), &id("z")), 1);
        assert_eq!(model.transition_count(&id("x"), &id("z")), 0);

        let predicted = model.predict(&id("x"), 3);
        assert!(predicted.contains(&id("y")));
        assert!(!predicted.contains(&id("x")));
        assert!(predicted.len() <= 3);
    }

    #[test]
    fn unseen_item_predicts_nothing() {
        let (mut model, _) = model(PredictionConfig::default());
        walk(&mut model, &["a", "b"]);
        assert!(model.predict(&id("never"), 5).is_empty());
        assert!(model.predict(&id("a"), 0).is_empty());
    }

    #[test]
    fn transitions_rank_by_frequency() {
        let (mut model, clock) = model(PredictionConfig::default());
        walk(&mut model, &["a", "b", "a", "c", "a", "c"]);
        // Move to an empty hour so only transitions contribute.
        clock.advance(Duration::hours(3));

        let predicted = model.predict(&id("a"), 2);
        assert_eq!(predicted, vec![id("c"), id("b")]);
    }

    #[test]
    fn predictions_are_unique_and_bounded() {
        let (mut model, _) = model(PredictionConfig::default());
        walk(&mut model, &["a", "b", "c", "a", "b", "d", "a", "e", "b"]);
        for n in 0..6 {
            let predicted = model.predict(&id("a"), n);
            assert!(predicted.len() <= n);
            let unique: HashSet<_> = predicted.iter().collect();
            assert_eq!(unique.len(), predicted.len());
        }
    }

    #[test]
    fn every_fifth_observation_records_a_sequence() {
        let (mut model, _) = model(PredictionConfig::default());
        walk(&mut model, &["a", "b", "c", "d"]);
        assert_eq!(model.sequence_count(), 0);

        walk(&mut model, &["e"]);
        assert_eq!(model.observations(), 5);
        assert_eq!(model.sequence_successors(&id("c"), &id("d")), vec![id("e")]);
    }

    #[test]
    fn hourly_bucket_drops_oldest() {
        let (mut model, _) = model(PredictionConfig {
            hourly_cap: 2,
            ..PredictionConfig::default()
        });
        for raw in ["h1", "h2", "h3"] {
            model.observe(&id(raw), None);
        }
        // h1 fell out of the bucket; still known, but only h2 is predicted.
        assert_eq!(model.predict(&id("h3"), 5), vec![id("h2")]);
    }

    #[test]
    fn transition_sources_are_lru_bounded() {
        let (mut model, _) = model(PredictionConfig {
            max_sources: 3,
            ..PredictionConfig::default()
        });
        walk(&mut model, &["s1", "t", "s2", "t", "s3", "t", "s4", "t"]);
        assert!(model.source_count() <= 3);
        assert_eq!(model.transition_count(&id("s1"), &id("t")), 0);
        assert_eq!(model.transition_count(&id("s4"), &id("t")), 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let (mut model, _) = model(PredictionConfig::default());
        walk(&mut model, &["a", "b", "c", "d", "e"]);
        model.clear();
        assert_eq!(model.observations(), 0);
        assert_eq!(model.source_count(), 0);
        assert!(model.predict(&id("a"), 3).is_empty());
    }
}
