/// Priority hint for preload work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Priority {
    /// On screen right now.
    High,
    /// Likely to be needed soon (predicted or adjacent).
    #[default]
    Medium,
    /// Background warm-up.
    Low,
}

impl Priority {
    /// Convert the priority to a queue weight (higher is more urgent).
    pub const fn weight(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if other.weight() > self.weight() {
            other
        } else {
            self
        }
    }
}
