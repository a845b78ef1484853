use super::dataset::{
    FeatureRange, FeatureVector, HousingDataset, TrainingRecord, FEATURE_COLUMNS, FEATURE_COUNT,
};
use super::model::PriceModel;
use super::{InvalidInput, ValuationError};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Minimum plausible average area income for the market. Queries below the
/// floor are rejected outright rather than clamped up into range.
pub const MIN_AREA_INCOME: f64 = 75_000.0;

/// How far a record's price may sit from the estimate and still count as a
/// comparable listing, as a fraction of the estimate.
pub const COMPARABLE_PRICE_MARGIN: f64 = 0.10;

/// Upper bound on the number of comparable listings returned.
pub const MAX_COMPARABLES: usize = 5;

/// Index of the floor-number feature, the only one rounded after clamping.
const FLOOR_FEATURE: usize = 7;

/// A historical listing priced within the comparable margin of an estimate,
/// carrying its own stored attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparable {
    pub price: f64,
    pub address: String,
    pub bedrooms: f64,
    pub rooms: f64,
    pub population: f64,
    pub buildup_area: f64,
    pub land_area: f64,
}

impl Comparable {
    fn from_record(record: &TrainingRecord) -> Self {
        Self {
            price: record.price,
            address: record.address.clone(),
            bedrooms: record.bedrooms,
            rooms: record.rooms,
            population: record.population,
            buildup_area: record.buildup_area,
            land_area: record.land_area,
        }
    }
}

/// The answer to one valuation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// Non-negative estimate rounded to two decimal places.
    pub price: f64,
    /// The query after clamping, echoed back so the caller sees what was
    /// actually priced.
    pub inputs: FeatureVector,
    /// Address of the historical record closest to the query in feature
    /// space.
    pub nearest_address: String,
    /// Up to five comparables, nearest first. Empty is a normal result.
    pub comparables: Vec<Comparable>,
}

/// Prices queries against an immutable snapshot of the training table and
/// the fitted model. Construct once at startup and share; every call is a
/// pure read.
#[derive(Debug, Clone)]
pub struct Estimator {
    dataset: Arc<HousingDataset>,
    model: Arc<PriceModel>,
}

impl Estimator {
    pub fn new(dataset: Arc<HousingDataset>, model: Arc<PriceModel>) -> Self {
        Self { dataset, model }
    }

    pub fn dataset(&self) -> &HousingDataset {
        &self.dataset
    }

    /// Validate, clamp, price, and rank comparables for one query.
    pub fn estimate(&self, query: &FeatureVector) -> Result<Estimate, ValuationError> {
        validate_query(query)?;

        let inputs = clamp_query(self.dataset.ranges(), query);

        let raw = self.model.predict(&inputs);
        let price = round_currency(raw.max(0.0));

        let records = self.dataset.records();
        let distances: Vec<f64> = records
            .iter()
            .map(|record| distance(&inputs, &record.features()))
            .collect();

        // Strict less-than keeps the earliest record on tied distances, and
        // the Vec preserves load order, so repeated calls agree.
        let mut nearest = 0usize;
        for (index, value) in distances.iter().enumerate() {
            if *value < distances[nearest] {
                nearest = index;
            }
        }

        let lower = price * (1.0 - COMPARABLE_PRICE_MARGIN);
        let upper = price * (1.0 + COMPARABLE_PRICE_MARGIN);
        let mut comparable_indexes: Vec<usize> = (0..records.len())
            .filter(|&index| records[index].price >= lower && records[index].price <= upper)
            .collect();
        comparable_indexes.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
        comparable_indexes.truncate(MAX_COMPARABLES);

        let comparables = comparable_indexes
            .into_iter()
            .map(|index| Comparable::from_record(&records[index]))
            .collect();

        debug!(price, nearest = %records[nearest].address, "estimate computed");

        Ok(Estimate {
            price,
            inputs,
            nearest_address: records[nearest].address.clone(),
            comparables,
        })
    }
}

fn validate_query(query: &FeatureVector) -> Result<(), InvalidInput> {
    // NaN compares false against every bound below and would also slide
    // through clamping untouched, so finiteness comes first.
    for (name, value) in FEATURE_COLUMNS.iter().copied().zip(query) {
        if !value.is_finite() {
            return Err(InvalidInput::NotFinite { name });
        }
    }
    if query[0] < MIN_AREA_INCOME {
        return Err(InvalidInput::IncomeBelowFloor { income: query[0] });
    }
    for (name, value) in FEATURE_COLUMNS.iter().copied().zip(query) {
        if *value <= 0.0 {
            return Err(InvalidInput::NonPositiveFeature {
                name,
                value: *value,
            });
        }
    }
    Ok(())
}

/// Restrict a query to the training distribution, feature by feature.
/// Values already in range pass through, so clamping is idempotent. The
/// floor number is rounded to the nearest whole floor afterwards.
pub fn clamp_query(
    ranges: &[FeatureRange; FEATURE_COUNT],
    query: &FeatureVector,
) -> FeatureVector {
    let mut clamped = *query;
    for (value, range) in clamped.iter_mut().zip(ranges) {
        *value = range.clamp(*value);
    }
    clamped[FLOOR_FEATURE] = clamped[FLOOR_FEATURE].round();
    clamped
}

fn distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(address: &str, features: FeatureVector, price: f64) -> TrainingRecord {
        TrainingRecord {
            area_income: features[0],
            house_age: features[1],
            rooms: features[2],
            bedrooms: features[3],
            population: features[4],
            buildup_area: features[5],
            land_area: features[6],
            floor: features[7],
            price,
            address: address.to_string(),
        }
    }

    fn base_features() -> FeatureVector {
        [80_000.0, 5.0, 6.0, 3.0, 30_000.0, 1_500.0, 2_000.0, 2.0]
    }

    fn flat_model(intercept: f64) -> Arc<PriceModel> {
        Arc::new(PriceModel {
            coefficients: [0.0; FEATURE_COUNT],
            intercept,
            trained_at: Utc::now(),
        })
    }

    fn single_record_estimator() -> Estimator {
        let dataset = HousingDataset::from_records(vec![record("A", base_features(), 5_000_000.0)])
            .expect("dataset builds");
        Estimator::new(Arc::new(dataset), flat_model(5_000_000.0))
    }

    #[test]
    fn single_record_query_matches_itself() {
        let estimator = single_record_estimator();
        let estimate = estimator.estimate(&base_features()).expect("estimate");

        // min == max per feature, so clamping is a no-op.
        assert_eq!(estimate.inputs, base_features());
        assert_eq!(estimate.price, 5_000_000.0);
        assert_eq!(estimate.nearest_address, "A");
        assert_eq!(estimate.comparables.len(), 1);
        assert_eq!(estimate.comparables[0].address, "A");
        assert_eq!(estimate.comparables[0].price, 5_000_000.0);
    }

    #[test]
    fn rejects_income_below_floor() {
        let estimator = single_record_estimator();
        let mut query = base_features();
        query[0] = MIN_AREA_INCOME - 1.0;

        let err = estimator.estimate(&query).expect_err("income too low");
        assert!(matches!(
            err,
            ValuationError::InvalidInput(InvalidInput::IncomeBelowFloor { income })
                if income == MIN_AREA_INCOME - 1.0
        ));
        let message = err.to_string();
        assert!(message.contains("75000"), "floor stated in '{message}'");
    }

    #[test]
    fn rejects_non_positive_features() {
        let estimator = single_record_estimator();
        let mut query = base_features();
        query[4] = 0.0;

        let err = estimator.estimate(&query).expect_err("population is zero");
        assert!(matches!(
            err,
            ValuationError::InvalidInput(InvalidInput::NonPositiveFeature {
                name: "Area Population",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_finite_features() {
        let estimator = single_record_estimator();

        // A NaN floor number would pass the floor and positivity checks
        // (both comparisons are false) and survive clamping; it must be
        // refused, not priced.
        let mut query = base_features();
        query[7] = "NaN".parse().expect("NaN parses as f64");
        let err = estimator.estimate(&query).expect_err("NaN is refused");
        assert!(matches!(
            err,
            ValuationError::InvalidInput(InvalidInput::NotFinite { name: "Floor" })
        ));

        let mut query = base_features();
        query[0] = f64::INFINITY;
        let err = estimator.estimate(&query).expect_err("infinity is refused");
        assert!(matches!(
            err,
            ValuationError::InvalidInput(InvalidInput::NotFinite { .. })
        ));
    }

    #[test]
    fn price_is_never_negative() {
        let dataset = HousingDataset::from_records(vec![record("A", base_features(), 100.0)])
            .expect("dataset builds");
        let estimator = Estimator::new(Arc::new(dataset), flat_model(-250_000.0));

        let estimate = estimator.estimate(&base_features()).expect("estimate");
        assert_eq!(estimate.price, 0.0);
        assert!(estimate.comparables.is_empty(), "no record prices near zero");
    }

    #[test]
    fn clamping_is_idempotent_and_keeps_boundary_values() {
        let dataset = HousingDataset::from_records(vec![
            record("A", base_features(), 5_000_000.0),
            record("B", [95_000.0, 9.0, 8.0, 4.0, 40_000.0, 1_800.0, 2_500.0, 4.0], 6_000_000.0),
        ])
        .expect("dataset builds");
        let ranges = dataset.ranges();

        let wild = [1_000_000.0, 1.0, 20.0, 1.0, 90_000.0, 100.0, 3_000.0, 9.4];
        let clamped = clamp_query(ranges, &wild);
        assert_eq!(clamp_query(ranges, &clamped), clamped);

        // A value exactly on the max bound is in range and left unchanged.
        let mut at_max = base_features();
        at_max[0] = ranges[0].max;
        assert_eq!(clamp_query(ranges, &at_max)[0], ranges[0].max);
    }

    #[test]
    fn floor_is_rounded_after_clamping() {
        let dataset = HousingDataset::from_records(vec![
            record("A", base_features(), 5_000_000.0),
            record("B", [95_000.0, 9.0, 8.0, 4.0, 40_000.0, 1_800.0, 2_500.0, 4.0], 6_000_000.0),
        ])
        .expect("dataset builds");

        let mut query = base_features();
        query[7] = 3.6;
        let clamped = clamp_query(dataset.ranges(), &query);
        assert_eq!(clamped[7], 4.0);
    }

    #[test]
    fn comparables_are_bounded_sorted_and_within_margin() {
        let mut records = Vec::new();
        // Seven records inside the ±10% band at increasing distances from
        // the query, plus two far outside the band.
        for step in 0..7 {
            let mut features = base_features();
            features[6] += (step * 100) as f64;
            records.push(record(
                &format!("band-{step}"),
                features,
                4_600_000.0 + (step * 100_000) as f64,
            ));
        }
        records.push(record("cheap", base_features(), 1_000_000.0));
        records.push(record("dear", base_features(), 9_000_000.0));

        let dataset = HousingDataset::from_records(records).expect("dataset builds");
        let estimator = Estimator::new(Arc::new(dataset), flat_model(5_000_000.0));

        let estimate = estimator.estimate(&base_features()).expect("estimate");

        assert_eq!(estimate.comparables.len(), MAX_COMPARABLES);
        let lower = estimate.price * 0.9;
        let upper = estimate.price * 1.1;
        for comparable in &estimate.comparables {
            assert!(comparable.price >= lower && comparable.price <= upper);
        }
        let addresses: Vec<&str> = estimate
            .comparables
            .iter()
            .map(|comparable| comparable.address.as_str())
            .collect();
        assert_eq!(addresses, ["band-0", "band-1", "band-2", "band-3", "band-4"]);
    }

    #[test]
    fn price_margin_bounds_are_inclusive() {
        let dataset = HousingDataset::from_records(vec![
            record("low-edge", base_features(), 4_500_000.0),
            record("high-edge", base_features(), 5_500_000.0),
        ])
        .expect("dataset builds");
        let estimator = Estimator::new(Arc::new(dataset), flat_model(5_000_000.0));

        let estimate = estimator.estimate(&base_features()).expect("estimate");
        assert_eq!(estimate.comparables.len(), 2);
    }

    #[test]
    fn tied_distances_keep_table_order() {
        let dataset = HousingDataset::from_records(vec![
            record("first", base_features(), 5_000_000.0),
            record("second", base_features(), 5_000_000.0),
        ])
        .expect("dataset builds");
        let estimator = Estimator::new(Arc::new(dataset), flat_model(5_000_000.0));

        let estimate = estimator.estimate(&base_features()).expect("estimate");
        assert_eq!(estimate.nearest_address, "first");
        assert_eq!(estimate.comparables[0].address, "first");
        assert_eq!(estimate.comparables[1].address, "second");
    }

    #[test]
    fn repeated_calls_are_identical() {
        let estimator = single_record_estimator();
        let first = estimator.estimate(&base_features()).expect("estimate");
        let second = estimator.estimate(&base_features()).expect("estimate");
        assert_eq!(first, second);
    }

    #[test]
    fn no_comparables_is_a_normal_result() {
        let dataset = HousingDataset::from_records(vec![record("A", base_features(), 100.0)])
            .expect("dataset builds");
        let estimator = Estimator::new(Arc::new(dataset), flat_model(5_000_000.0));

        let estimate = estimator.estimate(&base_features()).expect("estimate");
        assert!(estimate.comparables.is_empty());
        assert_eq!(estimate.nearest_address, "A");
    }
}
