//! HTTP entry point for the serverless variant.
//!
//! Each invocation runs one check instead of keeping a scheduler alive:
//! - `POST /` with `{"project_id": "...", "metrics": ["allocation"]}` checks one project
//! - `POST /` with an empty body checks every project in the config file
//! - `GET /health` - Basic health check

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::observability::metrics::ReadingSink;
use crate::projects::{load_projects, MetricKind};
use crate::quota::{CheckReport, QuotaChecker};

/// Function handler state.
#[derive(Clone)]
pub struct FunctionState {
    checker: Arc<QuotaChecker>,
    sink: Arc<dyn ReadingSink>,
    config_path: PathBuf,
}

impl FunctionState {
    pub fn new(checker: Arc<QuotaChecker>, sink: Arc<dyn ReadingSink>, config_path: PathBuf) -> Self {
        Self {
            checker,
            sink,
            config_path,
        }
    }
}

/// Body of a single-project invocation.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub project_id: String,
    /// Defaults to every metric kind.
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingSummary {
    pub metric_kind: String,
    pub quotas: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailureSummary {
    pub metric_kind: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckSummary {
    pub check_id: String,
    pub project_id: String,
    pub outcome: String,
    pub readings: Vec<ReadingSummary>,
    pub failures: Vec<FailureSummary>,
    pub limit_error: Option<String>,
    pub duration_ms: u64,
}

impl From<&CheckReport> for CheckSummary {
    fn from(report: &CheckReport) -> Self {
        Self {
            check_id: report.check_id.to_string(),
            project_id: report.project_id.clone(),
            outcome: report.outcome().as_str().to_string(),
            readings: report
                .readings
                .iter()
                .map(|r| ReadingSummary {
                    metric_kind: r.metric_kind.to_string(),
                    quotas: r.quotas.len(),
                })
                .collect(),
            failures: report
                .failures
                .iter()
                .map(|f| FailureSummary {
                    metric_kind: f.metric_kind.to_string(),
                    error: f.error.to_string(),
                })
                .collect(),
            limit_error: report.limit_failure.as_ref().map(ToString::to_string),
            duration_ms: report.duration.as_millis() as u64,
        }
    }
}

/// Response body of a check invocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub checks: Vec<CheckSummary>,
    pub export_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Create the function HTTP router.
pub fn create_router(state: FunctionState) -> Router {
    Router::new()
        .route("/", post(check_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Resolve the projects an invocation should check.
fn plan_checks(
    state: &FunctionState,
    body: &[u8],
) -> Result<Vec<(String, Vec<MetricKind>)>, axum::response::Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        let loaded = load_projects(&state.config_path)
            .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        for rejection in &loaded.rejected {
            tracing::warn!(
                line = rejection.line,
                error = %rejection.error,
                "Skipping invalid project row"
            );
        }
        if loaded.is_empty() {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no project configurations to monitor",
            ));
        }
        return Ok(loaded
            .projects
            .into_iter()
            .map(|p| (p.project_id, p.metrics))
            .collect());
    }

    let request: CheckRequest = serde_json::from_slice(body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))?;

    let project_id = request.project_id.trim().to_string();
    if project_id.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "project_id cannot be empty"));
    }

    let mut metrics = match request.metrics {
        None => MetricKind::ALL.to_vec(),
        Some(tokens) => tokens
            .iter()
            .map(|t| MetricKind::from_str(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?,
    };
    metrics.sort();
    metrics.dedup();
    if metrics.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "metrics cannot be empty"));
    }

    Ok(vec![(project_id, metrics)])
}

/// Handle POST / - run one check per requested project and export the readings.
async fn check_handler(State(state): State<FunctionState>, body: Bytes) -> axum::response::Response {
    let plan = match plan_checks(&state, &body) {
        Ok(plan) => plan,
        Err(response) => return response,
    };

    let checks = plan.iter().map(|(project_id, metrics)| {
        let checker = Arc::clone(&state.checker);
        async move { checker.check_metrics(project_id, metrics).await }
    });
    let reports = join_all(checks).await;

    let mut readings = Vec::new();
    for report in &reports {
        state.sink.record_check(report);
        readings.extend(report.readings.iter().cloned());
    }

    let export_error = match state.sink.emit(&readings).await {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to export quota readings");
            Some(e.to_string())
        }
    };

    let status = if export_error.is_some() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };

    let response = CheckResponse {
        checks: reports.iter().map(CheckSummary::from).collect(),
        export_error,
    };
    tracing::info!(projects = response.checks.len(), "Function invocation complete");

    (status, Json(response)).into_response()
}

/// Handle GET /health - Basic health check.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Run the function HTTP server.
///
/// # Arguments
///
/// * `addr` - Address to bind to
/// * `state` - Handler state
/// * `shutdown_rx` - Receiver for shutdown signal
pub async fn run_function_server(
    addr: SocketAddr,
    state: FunctionState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting quota function server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Function server shutting down");
        })
        .await?;

    Ok(())
}
