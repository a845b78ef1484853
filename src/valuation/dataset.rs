use super::{LoadError, ValuationError};
use calamine::{open_workbook, Data, Reader, Xlsx};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Number of ordered predictors in a query and in every training record.
pub const FEATURE_COUNT: usize = 8;

/// A query or record position in feature space, in column order.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Dataset column headers, in feature order. Headers are matched after
/// trimming surrounding whitespace.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "Avg. Area Income",
    "Avg. Area House Age",
    "Avg. Area Number of Rooms",
    "Avg. Area Number of Bedrooms",
    "Area Population",
    "Build-up Area",
    "Land Area",
    "Floor",
];

pub const PRICE_COLUMN: &str = "Price";
pub const ADDRESS_COLUMN: &str = "Address";

/// One cleaned historical sale. Numeric fields are whole numbers stored as
/// `f64`; rows that would carry a negative value never become records.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRecord {
    pub area_income: f64,
    pub house_age: f64,
    pub rooms: f64,
    pub bedrooms: f64,
    pub population: f64,
    pub buildup_area: f64,
    pub land_area: f64,
    pub floor: f64,
    pub price: f64,
    pub address: String,
}

impl TrainingRecord {
    /// The record's position in feature space, in column order.
    pub fn features(&self) -> FeatureVector {
        [
            self.area_income,
            self.house_age,
            self.rooms,
            self.bedrooms,
            self.population,
            self.buildup_area,
            self.land_area,
            self.floor,
        ]
    }
}

/// Closed interval of values a feature took across the cleaned dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    /// Restrict `value` to the interval. Values equal to a bound are in
    /// range and pass through unchanged.
    pub fn clamp(&self, value: f64) -> f64 {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// The cleaned training table together with its derived per-feature ranges.
/// Built once, immutable afterwards, shared read-only across requests.
#[derive(Debug, Clone)]
pub struct HousingDataset {
    records: Vec<TrainingRecord>,
    ranges: [FeatureRange; FEATURE_COUNT],
}

impl HousingDataset {
    /// Load and clean a dataset file, dispatching on its extension.
    /// Anything other than `.csv` or `.xlsx` is rejected.
    pub fn load(path: &Path) -> Result<Self, ValuationError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let records = match extension.as_str() {
            "csv" => {
                let file = std::fs::File::open(path).map_err(LoadError::Io)?;
                read_csv_records(file)?
            }
            "xlsx" => read_xlsx_records(path)?,
            _ => return Err(ValuationError::UnsupportedFormat { extension }),
        };

        let dataset = Self::from_records(records)?;
        info!(
            rows = dataset.records.len(),
            path = %path.display(),
            "housing dataset loaded"
        );
        Ok(dataset)
    }

    /// Parse CSV content from any reader. Used by `load` and by callers that
    /// already hold the bytes.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, ValuationError> {
        Self::from_records(read_csv_records(reader)?)
    }

    /// Build a dataset from already-cleaned records, deriving the feature
    /// ranges. Fails on an empty table: there is nothing to clamp against.
    pub fn from_records(records: Vec<TrainingRecord>) -> Result<Self, ValuationError> {
        if records.is_empty() {
            return Err(LoadError::EmptyDataset.into());
        }

        let mut ranges = [FeatureRange {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }; FEATURE_COUNT];
        for record in &records {
            for (range, value) in ranges.iter_mut().zip(record.features()) {
                range.min = range.min.min(value);
                range.max = range.max.max(value);
            }
        }

        Ok(Self { records, ranges })
    }

    pub fn records(&self) -> &[TrainingRecord] {
        &self.records
    }

    pub fn ranges(&self) -> &[FeatureRange; FEATURE_COUNT] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(rename = "Avg. Area Income", default)]
    area_income: Option<f64>,
    #[serde(rename = "Avg. Area House Age", default)]
    house_age: Option<f64>,
    #[serde(rename = "Avg. Area Number of Rooms", default)]
    rooms: Option<f64>,
    #[serde(rename = "Avg. Area Number of Bedrooms", default)]
    bedrooms: Option<f64>,
    #[serde(rename = "Area Population", default)]
    population: Option<f64>,
    #[serde(rename = "Build-up Area", default)]
    buildup_area: Option<f64>,
    #[serde(rename = "Land Area", default)]
    land_area: Option<f64>,
    #[serde(rename = "Floor", default)]
    floor: Option<f64>,
    #[serde(rename = "Price", default)]
    price: Option<f64>,
    #[serde(rename = "Address", default)]
    address: Option<String>,
}

impl ListingRow {
    /// Apply the cleaning rules: missing numerics become 0, everything is
    /// rounded to a whole number, and a row with any negative value is
    /// discarded.
    fn into_record(self) -> Option<TrainingRecord> {
        let values = [
            self.area_income,
            self.house_age,
            self.rooms,
            self.bedrooms,
            self.population,
            self.buildup_area,
            self.land_area,
            self.floor,
            self.price,
        ]
        .map(|value| value.unwrap_or(0.0).round());

        if values.iter().any(|value| *value < 0.0) {
            return None;
        }

        Some(TrainingRecord {
            area_income: values[0],
            house_age: values[1],
            rooms: values[2],
            bedrooms: values[3],
            population: values[4],
            buildup_area: values[5],
            land_area: values[6],
            floor: values[7],
            price: values[8],
            address: self.address.unwrap_or_default(),
        })
    }
}

fn read_csv_records<R: Read>(reader: R) -> Result<Vec<TrainingRecord>, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in csv_reader.deserialize::<ListingRow>() {
        if let Some(record) = row?.into_record() {
            records.push(record);
        }
    }
    Ok(records)
}

fn read_xlsx_records(path: &Path) -> Result<Vec<TrainingRecord>, LoadError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(LoadError::EmptyDataset)??;

    let mut rows = range.rows();
    let header = rows.next().ok_or(LoadError::EmptyDataset)?;
    let columns = resolve_columns(header)?;

    let mut records = Vec::new();
    for row in rows {
        let mut values = [None; FEATURE_COUNT + 1];
        for (slot, column) in values.iter_mut().zip(columns.numeric) {
            *slot = row.get(column).and_then(numeric_cell);
        }
        let address = columns
            .address
            .and_then(|column| row.get(column))
            .and_then(string_cell);

        let listing = ListingRow {
            area_income: values[0],
            house_age: values[1],
            rooms: values[2],
            bedrooms: values[3],
            population: values[4],
            buildup_area: values[5],
            land_area: values[6],
            floor: values[7],
            price: values[8],
            address,
        };
        if let Some(record) = listing.into_record() {
            records.push(record);
        }
    }
    Ok(records)
}

struct ColumnIndexes {
    /// The 8 feature columns followed by the price column.
    numeric: [usize; FEATURE_COUNT + 1],
    address: Option<usize>,
}

fn resolve_columns(header: &[Data]) -> Result<ColumnIndexes, LoadError> {
    let find = |name: &str| {
        header.iter().position(|cell| {
            string_cell(cell)
                .map(|value| value.trim() == name)
                .unwrap_or(false)
        })
    };

    let mut numeric = [0usize; FEATURE_COUNT + 1];
    for (slot, name) in numeric
        .iter_mut()
        .zip(FEATURE_COLUMNS.iter().copied().chain([PRICE_COLUMN]))
    {
        *slot = find(name).ok_or_else(|| LoadError::MissingColumn {
            name: name.to_string(),
        })?;
    }

    Ok(ColumnIndexes {
        numeric,
        address: find(ADDRESS_COLUMN),
    })
}

fn numeric_cell(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(value) => Some(*value),
        Data::Int(value) => Some(*value as f64),
        Data::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

fn string_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::String(value) => Some(value.clone()),
        Data::Float(value) => Some(value.to_string()),
        Data::Int(value) => Some(value.to_string()),
        _ => None,
    }
}
