pub mod artifacts;
pub mod dataset;
pub mod estimator;
pub mod model;
pub mod training;

pub use dataset::{FeatureRange, FeatureVector, HousingDataset, TrainingRecord, FEATURE_COUNT};
pub use estimator::{Comparable, Estimate, Estimator, MIN_AREA_INCOME};
pub use model::PriceModel;
pub use training::{EvaluationMetrics, Trainer, TrainingReport};

use std::fmt;

/// Failures surfaced by the trainer and the estimator.
#[derive(Debug)]
pub enum ValuationError {
    /// The dataset file extension is neither `.csv` nor `.xlsx`.
    UnsupportedFormat { extension: String },
    /// I/O or parse failure while loading the dataset or a persisted
    /// artifact. Terminal at startup: the estimator stays unavailable.
    Load(LoadError),
    /// A per-request validation failure, reported back to the caller.
    InvalidInput(InvalidInput),
    /// The service is running without a loaded model and dataset.
    ModelUnavailable,
}

impl fmt::Display for ValuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuationError::UnsupportedFormat { extension } => {
                write!(
                    f,
                    "unsupported dataset format '{extension}': provide a .csv or .xlsx file"
                )
            }
            ValuationError::Load(err) => write!(f, "failed to load valuation artifacts: {err}"),
            ValuationError::InvalidInput(reason) => write!(f, "{reason}"),
            ValuationError::ModelUnavailable => {
                write!(
                    f,
                    "valuation model is not available: train a model and restart the service"
                )
            }
        }
    }
}

impl std::error::Error for ValuationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValuationError::Load(err) => Some(err),
            ValuationError::UnsupportedFormat { .. }
            | ValuationError::InvalidInput(_)
            | ValuationError::ModelUnavailable => None,
        }
    }
}

impl From<LoadError> for ValuationError {
    fn from(value: LoadError) -> Self {
        Self::Load(value)
    }
}

impl From<InvalidInput> for ValuationError {
    fn from(value: InvalidInput) -> Self {
        Self::InvalidInput(value)
    }
}

/// The underlying cause of a dataset or artifact load failure.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Csv(csv::Error),
    Spreadsheet(calamine::XlsxError),
    Json(serde_json::Error),
    MissingColumn { name: String },
    EmptyDataset,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "io error: {err}"),
            LoadError::Csv(err) => write!(f, "csv parse error: {err}"),
            LoadError::Spreadsheet(err) => write!(f, "spreadsheet parse error: {err}"),
            LoadError::Json(err) => write!(f, "model blob parse error: {err}"),
            LoadError::MissingColumn { name } => write!(f, "missing required column '{name}'"),
            LoadError::EmptyDataset => write!(f, "dataset contains no usable rows"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(err) => Some(err),
            LoadError::Csv(err) => Some(err),
            LoadError::Spreadsheet(err) => Some(err),
            LoadError::Json(err) => Some(err),
            LoadError::MissingColumn { .. } | LoadError::EmptyDataset => None,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for LoadError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<calamine::XlsxError> for LoadError {
    fn from(value: calamine::XlsxError) -> Self {
        Self::Spreadsheet(value)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// A rejected estimate request. Recoverable: the caller fixes the input and
/// retries without affecting any shared state.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidInput {
    IncomeBelowFloor { income: f64 },
    NonPositiveFeature { name: &'static str, value: f64 },
    NotFinite { name: &'static str },
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidInput::IncomeBelowFloor { income } => {
                write!(
                    f,
                    "average area income must be at least NPR {:.0}, got {income:.0}",
                    MIN_AREA_INCOME
                )
            }
            InvalidInput::NonPositiveFeature { name, value } => {
                write!(f, "{name} must be a positive number, got {value}")
            }
            InvalidInput::NotFinite { name } => {
                write!(f, "{name} must be a finite number")
            }
        }
    }
}
