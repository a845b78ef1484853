use super::dataset::{FeatureVector, FEATURE_COUNT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fitted linear price model: one non-negative coefficient per feature
/// plus an unconstrained intercept. Fit once by the trainer, persisted as a
/// JSON blob, loaded once at serving start and treated as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceModel {
    pub coefficients: [f64; FEATURE_COUNT],
    pub intercept: f64,
    pub trained_at: DateTime<Utc>,
}

impl PriceModel {
    /// Evaluate the model on a feature vector. The raw value may be
    /// negative for extreme inputs; callers clamp as their contract
    /// requires.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .map(|(coefficient, value)| coefficient * value)
            .sum::<f64>()
            + self.intercept
    }
}
