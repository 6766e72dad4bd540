use std::collections::HashSet;
use std::sync::Arc;

use lumen_core::prediction::{PredictionConfig, PredictionModel};
use lumen_core::testing::{ManualClock, fixed_now};
use lumen_model::ItemId;

fn model() -> (PredictionModel, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(fixed_now()));
    (
        PredictionModel::new(clock.clone(), PredictionConfig::default()),
        clock,
    )
}

fn id(raw: &str) -> ItemId {
    ItemId::new(raw)
}

/// Feed a browsing session through the model the way the service does.
fn browse(model: &mut PredictionModel, session: &[&str]) {
    let mut previous: Option<ItemId> = None;
    for raw in session {
        let current = id(raw);
        model.observe(&current, previous.as_ref());
        previous = Some(current);
    }
}

#[test]
fn chain_predicts_the_observed_successor() {
    let (mut model, _) = model();
    browse(&mut model, &["x", "y", "z"]);

    assert_eq!(model.predict(&id("x"), 1), vec![id("y")]);
    assert!(model.predict(&id("y"), 5).contains(&id("z")));
}

#[test]
fn predictions_are_unique_and_bounded() {
    let (mut model, clock) = model();
    let session: Vec<String> = (0..60).map(|i| format!("item-{}", i % 13)).collect();
    let refs: Vec<&str> = session.iter().map(String::as_str).collect();
    for hour in 0..3 {
        browse(&mut model, &refs);
        clock.advance(chrono::Duration::minutes(40 + hour));
    }

    for raw in ["item-0", "item-5", "item-12"] {
        for count in [1, 3, 10, 40] {
            let predicted = model.predict(&id(raw), count);
            assert!(predicted.len() <= count);
            let unique: HashSet<_> = predicted.iter().collect();
            assert_eq!(unique.len(), predicted.len(), "duplicates for {raw}");
        }
    }
    assert!(model.predict(&id("never-seen"), 5).is_empty());
    assert!(model.predict(&id("item-1"), 0).is_empty());
}

#[test]
fn frequent_transitions_rank_first() {
    let (mut model, _) = model();
    for _ in 0..3 {
        browse(&mut model, &["home", "a"]);
    }
    browse(&mut model, &["home", "b"]);

    let predicted = model.predict(&id("home"), 2);
    assert_eq!(predicted.first(), Some(&id("a")));
    assert_eq!(model.transition_count(&id("home"), &id("a")), 3);
    assert_eq!(model.transition_count(&id("home"), &id("b")), 1);
}

#[test]
fn tables_stay_within_limits() {
    let clock = Arc::new(ManualClock::new(fixed_now()));
    let config = PredictionConfig {
        max_sources: 8,
        max_sequences: 4,
        ..PredictionConfig::default()
    };
    let mut model = PredictionModel::new(clock, config);

    let session: Vec<String> = (0..200).map(|i| format!("n{i}")).collect();
    let refs: Vec<&str> = session.iter().map(String::as_str).collect();
    browse(&mut model, &refs);

    assert!(model.source_count() <= 8);
    assert!(model.sequence_count() <= 4);
    assert_eq!(model.observations(), 200);
}
