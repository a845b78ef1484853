//! Persistence for the trained artifacts: the model blob and the
//! human-readable metrics file the trainer leaves behind for the serving
//! process and its operators.

use super::model::PriceModel;
use super::training::EvaluationMetrics;
use super::{LoadError, ValuationError};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// One `key: value` line from the metrics file, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricLine {
    pub name: String,
    pub value: String,
}

/// Serialize the model before opening the output file, so a serialization
/// failure cannot truncate a previously persisted blob.
pub fn save_model(path: &Path, model: &PriceModel) -> Result<(), ValuationError> {
    let blob = serde_json::to_string_pretty(model).map_err(LoadError::Json)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(LoadError::Io)?;
        }
    }
    fs::write(path, blob).map_err(LoadError::Io)?;
    Ok(())
}

pub fn load_model(path: &Path) -> Result<PriceModel, ValuationError> {
    let blob = fs::read_to_string(path).map_err(LoadError::Io)?;
    let model = serde_json::from_str(&blob).map_err(LoadError::Json)?;
    Ok(model)
}

pub fn write_metrics(path: &Path, metrics: &EvaluationMetrics) -> Result<(), ValuationError> {
    let content = format!(
        "R2 Score: {:.4}\n\
         Mean Absolute Error: {:.2}\n\
         Mean Squared Error: {:.2}\n\
         Root Mean Squared Error: {:.2}\n",
        metrics.r_squared,
        metrics.mean_absolute_error,
        metrics.mean_squared_error,
        metrics.root_mean_squared_error,
    );
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(LoadError::Io)?;
        }
    }
    fs::write(path, content).map_err(LoadError::Io)?;
    Ok(())
}

/// Read the metrics file back as ordered `key: value` pairs. Lines without
/// a colon are skipped; keys and values are trimmed.
pub fn read_metrics(path: &Path) -> Result<Vec<MetricLine>, ValuationError> {
    let content = fs::read_to_string(path).map_err(LoadError::Io)?;
    Ok(content
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some(MetricLine {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect())
}
