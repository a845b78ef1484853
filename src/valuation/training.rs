use super::artifacts;
use super::dataset::{FeatureRange, FeatureVector, HousingDataset, FEATURE_COUNT};
use super::model::PriceModel;
use super::ValuationError;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Fixed shuffle seed so every training run on the same dataset produces
/// the same split, model, and metrics.
pub const SPLIT_SEED: u64 = 42;

/// Share of rows held out for evaluation.
pub const TEST_FRACTION: f64 = 0.3;

const MAX_SWEEPS: usize = 10_000;
const CONVERGENCE_TOL: f64 = 1e-9;

/// Regression quality on the held-out test split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub r_squared: f64,
    pub mean_absolute_error: f64,
    pub mean_squared_error: f64,
    pub root_mean_squared_error: f64,
}

/// Everything a training run produces, before and after persistence.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: PriceModel,
    /// `None` when the dataset was too small to hold anything out; no
    /// metrics file is written in that case.
    pub metrics: Option<EvaluationMetrics>,
    /// Per-feature min/max observed in the training split, for operator
    /// inspection.
    pub train_ranges: [FeatureRange; FEATURE_COUNT],
    /// Rows remaining after cleaning.
    pub rows: usize,
}

/// Fits the price model from a dataset file and persists the resulting
/// artifacts. Nothing is written when loading or fitting fails.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub model_path: PathBuf,
    pub metrics_path: PathBuf,
}

impl Trainer {
    pub fn new(model_path: PathBuf, metrics_path: PathBuf) -> Self {
        Self {
            model_path,
            metrics_path,
        }
    }

    /// `train(dataset_path) -> (model, metrics)`, persisted as a side
    /// effect: the model as a JSON blob, the metrics as `key: value` lines.
    pub fn train(&self, dataset_path: &Path) -> Result<TrainingReport, ValuationError> {
        let dataset = HousingDataset::load(dataset_path)?;
        let report = fit_and_evaluate(&dataset);

        artifacts::save_model(&self.model_path, &report.model)?;
        match &report.metrics {
            Some(metrics) => artifacts::write_metrics(&self.metrics_path, metrics)?,
            None => warn!(
                rows = report.rows,
                "held-out split is empty; skipping the metrics file"
            ),
        }

        info!(
            rows = report.rows,
            evaluated = report.metrics.is_some(),
            model = %self.model_path.display(),
            "price model trained and persisted"
        );
        Ok(report)
    }
}

/// Fit and evaluate on an already-loaded dataset without touching disk.
pub fn fit_and_evaluate(dataset: &HousingDataset) -> TrainingReport {
    let (train_idx, test_idx) = split_indices(dataset.len(), TEST_FRACTION, SPLIT_SEED);

    let gather = |indexes: &[usize]| -> (Vec<FeatureVector>, Vec<f64>) {
        let records = dataset.records();
        indexes
            .iter()
            .map(|&index| (records[index].features(), records[index].price))
            .unzip()
    };
    let (train_features, train_targets) = gather(&train_idx);
    let (test_features, test_targets) = gather(&test_idx);

    let (coefficients, intercept) = fit_non_negative(&train_features, &train_targets);
    let model = PriceModel {
        coefficients,
        intercept,
        trained_at: Utc::now(),
    };

    let metrics = if test_targets.is_empty() {
        None
    } else {
        Some(evaluate(&model, &test_features, &test_targets))
    };

    TrainingReport {
        model,
        metrics,
        train_ranges: ranges_over(&train_features),
        rows: dataset.len(),
    }
}

/// Deterministic 70/30 shuffle split. The training side always keeps at
/// least one row.
pub fn split_indices(rows: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indexes: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indexes.shuffle(&mut rng);

    let test_rows = (((rows as f64) * test_fraction).ceil() as usize).min(rows.saturating_sub(1));
    let train = indexes.split_off(test_rows);
    (train, indexes)
}

/// Ordinary least squares with every coefficient constrained to be
/// non-negative; the intercept is left unconstrained. Solved by cyclic
/// coordinate descent on the normal equations, which for this box-constrained
/// convex problem converges to the constrained minimum.
fn fit_non_negative(features: &[FeatureVector], targets: &[f64]) -> ([f64; FEATURE_COUNT], f64) {
    // Column 0 is the intercept's all-ones column.
    const P: usize = FEATURE_COUNT + 1;

    let mut gram = [[0.0f64; P]; P];
    let mut moment = [0.0f64; P];
    for (row, target) in features.iter().zip(targets) {
        let mut design = [1.0f64; P];
        design[1..].copy_from_slice(row);
        for i in 0..P {
            for j in 0..P {
                gram[i][j] += design[i] * design[j];
            }
            moment[i] += design[i] * target;
        }
    }

    let mut weights = [0.0f64; P];
    for _ in 0..MAX_SWEEPS {
        let mut largest_step = 0.0f64;
        for j in 0..P {
            if gram[j][j] <= 0.0 {
                continue;
            }
            let mut residual = moment[j];
            for k in 0..P {
                if k != j {
                    residual -= gram[j][k] * weights[k];
                }
            }
            let mut updated = residual / gram[j][j];
            if j > 0 {
                updated = updated.max(0.0);
            }
            largest_step = largest_step.max((updated - weights[j]).abs() / (1.0 + updated.abs()));
            weights[j] = updated;
        }
        if largest_step <= CONVERGENCE_TOL {
            break;
        }
    }

    let mut coefficients = [0.0f64; FEATURE_COUNT];
    coefficients.copy_from_slice(&weights[1..]);
    (coefficients, weights[0])
}

/// Metrics on safeguarded predictions: model output clamped to zero and
/// rounded to a whole price, the same shape served to callers. Callers
/// guarantee a non-empty evaluation slice.
pub fn evaluate(model: &PriceModel, features: &[FeatureVector], targets: &[f64]) -> EvaluationMetrics {
    let predictions: Vec<f64> = features
        .iter()
        .map(|row| model.predict(row).max(0.0).round())
        .collect();

    let rows = targets.len() as f64;
    let mean_absolute_error = predictions
        .iter()
        .zip(targets)
        .map(|(predicted, actual)| (predicted - actual).abs())
        .sum::<f64>()
        / rows;
    let mean_squared_error = predictions
        .iter()
        .zip(targets)
        .map(|(predicted, actual)| (predicted - actual).powi(2))
        .sum::<f64>()
        / rows;

    let target_mean = targets.iter().sum::<f64>() / rows;
    let total_variance = targets
        .iter()
        .map(|actual| (actual - target_mean).powi(2))
        .sum::<f64>();
    let residual_variance = predictions
        .iter()
        .zip(targets)
        .map(|(predicted, actual)| (actual - predicted).powi(2))
        .sum::<f64>();
    let r_squared = if total_variance > 0.0 {
        1.0 - residual_variance / total_variance
    } else if residual_variance == 0.0 {
        1.0
    } else {
        0.0
    };

    EvaluationMetrics {
        r_squared,
        mean_absolute_error,
        mean_squared_error,
        root_mean_squared_error: mean_squared_error.sqrt(),
    }
}

fn ranges_over(vectors: &[FeatureVector]) -> [FeatureRange; FEATURE_COUNT] {
    let mut ranges = [FeatureRange {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    }; FEATURE_COUNT];
    for vector in vectors {
        for (range, value) in ranges.iter_mut().zip(vector) {
            range.min = range.min.min(*value);
            range.max = range.max.max(*value);
        }
    }
    ranges
}
