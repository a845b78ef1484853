use house_valuer::valuation::{
    artifacts, Estimator, HousingDataset, Trainer, ValuationError,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

const HEADER: &str = "Avg. Area Income,Avg. Area House Age,Avg. Area Number of Rooms,Avg. Area Number of Bedrooms,Area Population,Build-up Area,Land Area,Floor,Price,Address";

fn sample_csv() -> String {
    let mut lines = vec![HEADER.to_string()];
    for i in 0..10u32 {
        let income = 80_000 + i * 1_000;
        let rooms = 5 + i % 3;
        let population = 30_000 + i * 500;
        let buildup = 1_400 + i * 50;
        let land = 1_900 + i * 60;
        let floor = 1 + i % 4;
        let price = 45 * income + 600 * buildup + 150_000 * rooms;
        lines.push(format!(
            "{income},5,{rooms},3,{population},{buildup},{land},{floor},{price},Tole {i}"
        ));
    }
    // One corrupt row the cleaner must drop.
    lines.push("85000,5,6,3,30000,1500,2000,2,-4000000,Negative Price".to_string());
    lines.join("\n")
}

struct TrainedFixture {
    _dir: tempfile::TempDir,
    dataset_path: PathBuf,
    model_path: PathBuf,
    metrics_path: PathBuf,
}

fn train_fixture() -> (TrainedFixture, house_valuer::valuation::TrainingReport) {
    let dir = tempfile::tempdir().expect("temp dir");
    let dataset_path = dir.path().join("listings.csv");
    let model_path = dir.path().join("artifacts").join("price_model.json");
    let metrics_path = dir.path().join("artifacts").join("model_evaluation.txt");
    fs::write(&dataset_path, sample_csv()).expect("dataset written");

    let trainer = Trainer::new(model_path.clone(), metrics_path.clone());
    let report = trainer.train(&dataset_path).expect("training succeeds");

    (
        TrainedFixture {
            _dir: dir,
            dataset_path,
            model_path,
            metrics_path,
        },
        report,
    )
}

#[test]
fn training_drops_the_negative_row_and_persists_artifacts() {
    let (fixture, report) = train_fixture();

    // 11 rows in the file, one with a negative price.
    assert_eq!(report.rows, 10);
    assert!(report.model.coefficients.iter().all(|c| *c >= 0.0));

    let loaded = artifacts::load_model(&fixture.model_path).expect("model blob loads");
    assert_eq!(loaded, report.model);

    let metrics = artifacts::read_metrics(&fixture.metrics_path).expect("metrics load");
    let names: Vec<&str> = metrics.iter().map(|line| line.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "R2 Score",
            "Mean Absolute Error",
            "Mean Squared Error",
            "Root Mean Squared Error"
        ]
    );
}

#[test]
fn training_is_reproducible_across_runs() {
    let (_fixture_a, report_a) = train_fixture();
    let (_fixture_b, report_b) = train_fixture();

    assert_eq!(report_a.model.coefficients, report_b.model.coefficients);
    assert_eq!(report_a.model.intercept, report_b.model.intercept);
    assert_eq!(report_a.metrics, report_b.metrics);
    assert!(report_a.metrics.is_some(), "ten rows leave a held-out split");
}

#[test]
fn single_row_training_persists_the_model_but_no_metrics() {
    let dir = tempfile::tempdir().expect("temp dir");
    let dataset_path = dir.path().join("listings.csv");
    let model_path = dir.path().join("price_model.json");
    let metrics_path = dir.path().join("model_evaluation.txt");
    fs::write(
        &dataset_path,
        format!("{HEADER}\n80000,5,6,3,30000,1500,2000,2,5000000,Solo\n"),
    )
    .expect("dataset written");

    let trainer = Trainer::new(model_path.clone(), metrics_path.clone());
    let report = trainer.train(&dataset_path).expect("training succeeds");

    assert_eq!(report.rows, 1);
    assert!(report.metrics.is_none());
    assert!(model_path.exists());
    // No held-out rows means no metrics file, rather than one full of NaN.
    assert!(!metrics_path.exists());
}

#[test]
fn trained_artifacts_serve_estimates() {
    let (fixture, _report) = train_fixture();

    let dataset = HousingDataset::load(&fixture.dataset_path).expect("dataset loads");
    let model = artifacts::load_model(&fixture.model_path).expect("model loads");
    let estimator = Estimator::new(Arc::new(dataset), Arc::new(model));

    let query = [84_000.0, 5.0, 6.0, 3.0, 32_000.0, 1_600.0, 2_100.0, 2.0];
    let estimate = estimator.estimate(&query).expect("estimate succeeds");

    assert!(estimate.price >= 0.0);
    assert!(estimate.comparables.len() <= 5);
    assert!(estimate.nearest_address.starts_with("Tole"));

    let lower = estimate.price * 0.9;
    let upper = estimate.price * 1.1;
    for comparable in &estimate.comparables {
        assert!(comparable.price >= lower && comparable.price <= upper);
    }

    // Same query, same snapshot, same answer.
    let again = estimator.estimate(&query).expect("estimate succeeds");
    assert_eq!(estimate, again);
}

#[test]
fn training_rejects_unknown_dataset_formats() {
    let dir = tempfile::tempdir().expect("temp dir");
    let dataset_path = dir.path().join("listings.parquet");
    fs::write(&dataset_path, "not a table").expect("file written");

    let trainer = Trainer::new(
        dir.path().join("price_model.json"),
        dir.path().join("model_evaluation.txt"),
    );
    let err = trainer.train(&dataset_path).expect_err("format refused");
    assert!(matches!(err, ValuationError::UnsupportedFormat { .. }));

    // Nothing was persisted on the failed run.
    assert!(!dir.path().join("price_model.json").exists());
    assert!(!dir.path().join("model_evaluation.txt").exists());
}

#[test]
fn training_reports_missing_dataset_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let trainer = Trainer::new(
        dir.path().join("price_model.json"),
        dir.path().join("model_evaluation.txt"),
    );

    let err = trainer
        .train(&dir.path().join("absent.csv"))
        .expect_err("missing file reported");
    assert!(matches!(err, ValuationError::Load(_)));
    assert!(!dir.path().join("price_model.json").exists());
}
