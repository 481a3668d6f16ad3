//! Test utilities shared by the integration tests.
//!
//! Provides:
//! - A scriptable in-memory quota source
//! - A reading sink that records everything it is given
//! - CSV project file fixtures

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quota_exporter::observability::metrics::{ExportError, ReadingSink};
use quota_exporter::observability::tracing::init_test_tracing;
use quota_exporter::projects::MetricKind;
use quota_exporter::quota::{
    CheckReport, QuotaApiError, QuotaChecker, QuotaReading, QuotaSample, QuotaSource,
};
use tempfile::TempDir;

fn api_error(project_id: &str) -> QuotaApiError {
    QuotaApiError::Status {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: format!("simulated outage for {project_id}"),
    }
}

/// In-memory quota source with per-project failure injection.
#[derive(Default)]
pub struct FakeSource {
    failing_projects: Mutex<HashSet<String>>,
    failing_kinds: Mutex<HashSet<MetricKind>>,
    failing_limits: Mutex<bool>,
    usage_calls: Mutex<HashMap<String, usize>>,
    limit_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every request for the given project.
    pub fn fail_project(&self, project_id: &str) {
        self.failing_projects
            .lock()
            .unwrap()
            .insert(project_id.to_string());
    }

    /// Fail usage requests for a metric kind in every project.
    pub fn fail_kind(&self, kind: MetricKind) {
        self.failing_kinds.lock().unwrap().insert(kind);
    }

    pub fn fail_limits(&self) {
        *self.failing_limits.lock().unwrap() = true;
    }

    /// Number of usage requests made for a project.
    pub fn usage_calls(&self, project_id: &str) -> usize {
        self.usage_calls
            .lock()
            .unwrap()
            .get(project_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn limit_calls(&self) -> usize {
        self.limit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotaSource for FakeSource {
    async fn usage(
        &self,
        project_id: &str,
        kind: MetricKind,
    ) -> Result<Vec<QuotaSample>, QuotaApiError> {
        *self
            .usage_calls
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default() += 1;

        if self.failing_projects.lock().unwrap().contains(project_id)
            || self.failing_kinds.lock().unwrap().contains(&kind)
        {
            return Err(api_error(project_id));
        }

        let quota_metric = match kind {
            MetricKind::Allocation => "compute.googleapis.com/cpus",
            MetricKind::Rate => "compute.googleapis.com/rate/read_requests",
        };
        Ok(vec![QuotaSample {
            quota_metric: quota_metric.to_string(),
            location: Some("us-central1".to_string()),
            value: 10.0,
        }])
    }

    async fn limits(&self, project_id: &str) -> Result<Vec<QuotaSample>, QuotaApiError> {
        self.limit_calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing_limits.lock().unwrap()
            || self.failing_projects.lock().unwrap().contains(project_id)
        {
            return Err(api_error(project_id));
        }

        Ok(vec![
            QuotaSample {
                quota_metric: "compute.googleapis.com/cpus".to_string(),
                location: Some("us-central1".to_string()),
                value: 40.0,
            },
            QuotaSample {
                quota_metric: "compute.googleapis.com/rate/read_requests".to_string(),
                location: Some("us-central1".to_string()),
                value: 100.0,
            },
        ])
    }
}

/// Sink that keeps every reading and check report it receives.
#[derive(Default)]
pub struct RecordingSink {
    readings: Mutex<Vec<QuotaReading>>,
    checks: Mutex<Vec<(String, usize)>>,
    fail_exports: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_exports(&self) {
        *self.fail_exports.lock().unwrap() = true;
    }

    pub fn readings(&self) -> Vec<QuotaReading> {
        self.readings.lock().unwrap().clone()
    }

    pub fn readings_for(&self, project_id: &str) -> usize {
        self.readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == project_id)
            .count()
    }

    /// Number of completed checks for a project.
    pub fn checks_for(&self, project_id: &str) -> usize {
        self.checks
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == project_id)
            .count()
    }
}

#[async_trait]
impl ReadingSink for RecordingSink {
    async fn emit(&self, readings: &[QuotaReading]) -> Result<(), ExportError> {
        if *self.fail_exports.lock().unwrap() {
            return Err(ExportError::Flush("simulated collector outage".into()));
        }
        self.readings.lock().unwrap().extend_from_slice(readings);
        Ok(())
    }

    fn record_check(&self, report: &CheckReport) {
        self.checks
            .lock()
            .unwrap()
            .push((report.project_id.clone(), report.readings.len()));
    }
}

pub fn checker(source: &Arc<FakeSource>) -> Arc<QuotaChecker> {
    init_test_tracing();
    let source: Arc<dyn QuotaSource> = source.clone();
    Arc::new(QuotaChecker::new(source))
}

/// Same rows as `projects.example.csv`.
pub const EXAMPLE_PROJECTS: &str = "\
project-alpha-12345,300,allocation,rate
project-beta-67890,900,allocation
project-gamma-11223,1800,rate
";

/// Temporary project file.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct ProjectsFile {
    _temp_dir: TempDir,
    pub path: PathBuf,
}

impl ProjectsFile {
    pub fn new(contents: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("projects.csv");
        std::fs::write(&path, contents).expect("failed to write projects file");
        Self {
            _temp_dir: temp_dir,
            path,
        }
    }
}
