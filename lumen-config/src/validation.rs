//! Guard rails: settings that load fine but would misbehave at runtime.

use std::fmt;

use lumen_core::scheduler::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use lumen_model::ByteSize;

use crate::models::LumenConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

const FALLBACK_BUDGET: ByteSize = ByteSize::from_mib(100);
const FALLBACK_LOW_WATER: f64 = 0.9;

fn ratio_in_unit_range(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

impl LumenConfig {
    /// Report settings that [`Self::into_normalized`] would change.
    pub fn validate(&self) -> ConfigWarnings {
        let mut warnings = ConfigWarnings::default();

        let batch = self.scheduler.batch_size;
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch) {
            warnings.push_with_hint(
                format!("scheduler.batch_size = {batch} is outside {MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}"),
                "the worker clamps it at runtime",
            );
        }
        if self.cache.budget.is_zero() {
            warnings.push_with_hint(
                "cache.budget is zero; every maintenance pass would empty the cache",
                format!("defaulting to {FALLBACK_BUDGET}"),
            );
        }
        if !ratio_in_unit_range(self.eviction.low_water_ratio) {
            warnings.push_with_hint(
                format!(
                    "eviction.low_water_ratio = {} must be in (0, 1]",
                    self.eviction.low_water_ratio
                ),
                format!("defaulting to {FALLBACK_LOW_WATER}"),
            );
        }

        let behavior = &self.behavior;
        for (name, value) in [
            ("behavior.view_capacity", behavior.view_capacity),
            ("behavior.interaction_capacity", behavior.interaction_capacity),
            ("behavior.scroll_capacity", behavior.scroll_capacity),
            ("behavior.recompute_every", behavior.recompute_every),
        ] {
            if value == 0 {
                warnings.push(format!("{name} is zero; raised to 1"));
            }
        }

        let threshold = self.duplicates.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            warnings.push_with_hint(
                format!("duplicates.similarity_threshold = {threshold} is outside [0, 1]"),
                "clamped into range",
            );
        }

        if self.upload.chunk_size.is_zero() {
            warnings.push("upload.chunk_size is zero; uploads would fail");
        }
        if self.snapshot.enabled && self.snapshot.path.is_none() {
            warnings.push_with_hint(
                "snapshot.enabled is set but snapshot.path is empty",
                "snapshots are only written when a store is supplied in code",
            );
        }

        warnings
    }

    /// Clamp out-of-range settings to usable values.
    pub fn into_normalized(mut self) -> Self {
        self.scheduler.batch_size = self
            .scheduler
            .batch_size
            .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        if self.cache.budget.is_zero() {
            self.cache.budget = FALLBACK_BUDGET;
        }
        if !ratio_in_unit_range(self.eviction.low_water_ratio) {
            self.eviction.low_water_ratio = FALLBACK_LOW_WATER;
        }

        let behavior = &mut self.behavior;
        behavior.view_capacity = behavior.view_capacity.max(1);
        behavior.interaction_capacity = behavior.interaction_capacity.max(1);
        behavior.scroll_capacity = behavior.scroll_capacity.max(1);
        behavior.recompute_every = behavior.recompute_every.max(1);

        let threshold = self.duplicates.similarity_threshold;
        self.duplicates.similarity_threshold = if threshold.is_nan() {
            0.85
        } else {
            threshold.clamp(0.0, 1.0)
        };

        if self.upload.chunk_size.is_zero() {
            self.upload.chunk_size = ByteSize::from_mib(5);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_only_warn_about_missing_snapshot_path() {
        let warnings = LumenConfig::default().validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.items[0].message.contains("snapshot.path"));
    }

    #[test]
    fn out_of_range_values_are_reported_and_clamped() {
        let mut config = LumenConfig::default();
        config.scheduler.batch_size = 40;
        config.cache.budget = ByteSize::ZERO;
        config.eviction.low_water_ratio = 1.5;
        config.behavior.scroll_capacity = 0;
        config.duplicates.similarity_threshold = -0.2;
        config.snapshot.enabled = false;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 5);

        let normalized = config.into_normalized();
        assert_eq!(normalized.scheduler.batch_size, MAX_BATCH_SIZE);
        assert_eq!(normalized.cache.budget, FALLBACK_BUDGET);
        assert_eq!(normalized.eviction.low_water_ratio, FALLBACK_LOW_WATER);
        assert_eq!(normalized.behavior.scroll_capacity, 1);
        assert_eq!(normalized.duplicates.similarity_threshold, 0.0);
        assert!(normalized.validate().is_empty());
    }
}
