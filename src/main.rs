use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use house_valuer::config::{AppConfig, ArtifactConfig};
use house_valuer::error::AppError;
use house_valuer::telemetry;
use house_valuer::valuation::dataset::FEATURE_COLUMNS;
use house_valuer::valuation::{
    artifacts, Estimate, Estimator, FeatureVector, HousingDataset, Trainer, ValuationError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
    valuation: Arc<ValuationState>,
}

/// The immutable serving snapshot. `estimator` is `None` when the startup
/// load failed; requests are then refused instead of crashing the process.
struct ValuationState {
    estimator: Option<Estimator>,
    metrics_path: PathBuf,
}

#[derive(Parser, Debug)]
#[command(
    name = "House Valuer",
    about = "Estimate Kathmandu house sale prices and find comparable listings",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Fit the price model from a sales dataset and persist the artifacts
    Train(TrainArgs),
    /// Price a single query against the persisted artifacts
    Estimate(EstimateArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Historical sales table (.csv or .xlsx)
    #[arg(long)]
    dataset: PathBuf,
    /// Where to write the model blob (defaults to the configured path)
    #[arg(long)]
    model_out: Option<PathBuf>,
    /// Where to write the evaluation metrics (defaults to the configured path)
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EstimateArgs {
    #[arg(long)]
    area_income: f64,
    #[arg(long)]
    house_age: f64,
    #[arg(long)]
    rooms: f64,
    #[arg(long)]
    bedrooms: f64,
    #[arg(long)]
    population: f64,
    #[arg(long)]
    buildup_area: f64,
    #[arg(long)]
    land_area: f64,
    #[arg(long)]
    floor: f64,
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    #[serde(deserialize_with = "deserialize_feature")]
    area_income: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    house_age: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    rooms: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    bedrooms: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    population: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    buildup_area: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    land_area: f64,
    #[serde(deserialize_with = "deserialize_feature")]
    floor: f64,
}

impl EstimateRequest {
    fn query(&self) -> FeatureVector {
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

#[derive(Debug, Serialize)]
struct EstimateResponse {
    currency: &'static str,
    #[serde(flatten)]
    estimate: Estimate,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    available: bool,
    metrics: Vec<artifacts::MetricLine>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Train(args) => run_train(args),
        Command::Estimate(args) => run_estimate(args),
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let estimator = match load_estimator(&config.artifacts) {
        Ok(estimator) => {
            info!(
                records = estimator.dataset().len(),
                "valuation snapshot loaded"
            );
            Some(estimator)
        }
        Err(err) => {
            error!(%err, "valuation artifacts unavailable; estimate requests will be refused");
            None
        }
    };
    let valuation = Arc::new(ValuationState {
        estimator,
        metrics_path: config.artifacts.metrics_path.clone(),
    });

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
        valuation,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/valuation/estimate", post(estimate_endpoint))
        .route("/api/v1/valuation/metrics", get(evaluation_metrics_endpoint))
        .layer(prometheus_layer)
        .with_state(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "house valuation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Load the serving snapshot: the cleaned dataset (with its feature ranges)
/// and the persisted model blob.
fn load_estimator(artifacts_config: &ArtifactConfig) -> Result<Estimator, ValuationError> {
    let dataset = HousingDataset::load(&artifacts_config.dataset_path)?;
    let model = artifacts::load_model(&artifacts_config.model_path)?;
    Ok(Estimator::new(Arc::new(dataset), Arc::new(model)))
}

fn run_train(args: TrainArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let model_path = args.model_out.unwrap_or(config.artifacts.model_path);
    let metrics_path = args.metrics_out.unwrap_or(config.artifacts.metrics_path);

    let trainer = Trainer::new(model_path.clone(), metrics_path.clone());
    let report = trainer.train(&args.dataset)?;

    println!("Trained on {} cleaned rows", report.rows);
    println!("\nFeature min/max values in training data:");
    for (name, range) in FEATURE_COLUMNS.iter().zip(report.train_ranges) {
        println!("{name}: min={}, max={}", range.min, range.max);
    }

    match &report.metrics {
        Some(metrics) => {
            println!("\nEvaluation metrics (30% held-out split):");
            println!("R2 Score: {:.4}", metrics.r_squared);
            println!("Mean Absolute Error: NPR {:.2}", metrics.mean_absolute_error);
            println!("Mean Squared Error: NPR {:.2}", metrics.mean_squared_error);
            println!(
                "Root Mean Squared Error: NPR {:.2}",
                metrics.root_mean_squared_error
            );
        }
        None => {
            println!("\nDataset too small to hold out a test split; evaluation skipped");
        }
    }

    println!("\nModel saved to {}", model_path.display());
    if report.metrics.is_some() {
        println!("Metrics saved to {}", metrics_path.display());
    }
    Ok(())
}

fn run_estimate(args: EstimateArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let estimator = load_estimator(&config.artifacts)?;

    let query = [
        args.area_income,
        args.house_age,
        args.rooms,
        args.bedrooms,
        args.population,
        args.buildup_area,
        args.land_area,
        args.floor,
    ];
    let estimate = estimator.estimate(&query)?;

    println!("Estimated price: NPR {:.2}", estimate.price);
    println!("Nearest listing: {}", estimate.nearest_address);

    if estimate.comparables.is_empty() {
        println!("Comparable listings: none within ±10% of the estimate");
    } else {
        println!("Comparable listings:");
        for comparable in &estimate.comparables {
            println!(
                "- {} | NPR {:.2} | {} rooms, {} bedrooms, {} sq ft build-up",
                comparable.address,
                comparable.price,
                comparable.rooms,
                comparable.bedrooms,
                comparable.buildup_area
            );
        }
    }
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn estimate_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, AppError> {
    let estimate = run_estimate_request(&state.valuation, &payload)?;
    Ok(Json(EstimateResponse {
        currency: "NPR",
        estimate,
    }))
}

/// The per-request serving path, separated from the axum plumbing so it can
/// be exercised directly.
fn run_estimate_request(
    valuation: &ValuationState,
    payload: &EstimateRequest,
) -> Result<Estimate, AppError> {
    let estimator = valuation
        .estimator
        .as_ref()
        .ok_or(ValuationError::ModelUnavailable)?;
    Ok(estimator.estimate(&payload.query())?)
}

async fn evaluation_metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    match artifacts::read_metrics(&state.valuation.metrics_path) {
        Ok(metrics) => Json(MetricsResponse {
            available: true,
            metrics,
        }),
        Err(err) => {
            warn!(%err, "evaluation metrics unavailable");
            Json(MetricsResponse {
                available: false,
                metrics: Vec::new(),
            })
        }
    }
}

fn deserialize_feature<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(raw) => raw
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("'{raw}' is not a number"))),
    }
}
