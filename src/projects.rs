//! Project list loading from CSV.
//!
//! Each data row is `project_id,interval,metric1,metric2,...`:
//!
//! ```text
//! project-alpha-12345,300,allocation,rate
//! project-beta-67890,900,allocation
//! ```
//!
//! A `project_id,interval,metrics_to_check` header and a quoted metrics column
//! (`"allocation,rate"`) are accepted as well.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Usage metric type for allocation quotas.
pub const ALLOCATION_USAGE_METRIC: &str = "serviceruntime.googleapis.com/quota/allocation/usage";

/// Usage metric type for rate quotas.
pub const RATE_USAGE_METRIC: &str = "serviceruntime.googleapis.com/quota/rate/net_usage";

/// Limit metric type shared by both quota kinds.
pub const LIMIT_METRIC: &str = "serviceruntime.googleapis.com/quota/limit";

/// Error type for project configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read project config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expected at least 3 fields (project_id,interval,metric), found {0}")]
    TooFewFields(usize),

    #[error("project_id cannot be empty")]
    EmptyProjectId,

    #[error("interval must be a positive integer number of seconds, got {0:?}")]
    InvalidInterval(String),

    #[error("unknown metric {0:?} (expected allocation or rate)")]
    UnknownMetric(String),

    #[error("no metrics to check")]
    NoMetrics,
}

/// Kind of quota to check for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    Allocation,
    Rate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Allocation, MetricKind::Rate];

    /// Token used in the CSV file and in metric attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Rate => "rate",
        }
    }

    /// Monitoring API metric type holding usage for this kind.
    pub fn usage_metric_type(self) -> &'static str {
        match self {
            Self::Allocation => ALLOCATION_USAGE_METRIC,
            Self::Rate => RATE_USAGE_METRIC,
        }
    }

    /// Classify a quota metric name that only appears in limit data.
    pub fn classify_quota_metric(quota_metric: &str) -> Self {
        if quota_metric.contains("/rate/") {
            Self::Rate
        } else {
            Self::Allocation
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = clean_field(s);
        match token.to_ascii_lowercase().as_str() {
            "allocation" => Ok(Self::Allocation),
            "rate" => Ok(Self::Rate),
            _ => Err(ConfigError::UnknownMetric(token.to_string())),
        }
    }
}

/// Monitoring settings for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub project_id: String,
    pub interval: Duration,
    /// Sorted, deduplicated, never empty.
    pub metrics: Vec<MetricKind>,
}

impl ProjectConfig {
    /// Build a project config, enforcing the positive interval and non-empty metrics rules.
    pub fn new(
        project_id: impl Into<String>,
        interval_secs: u64,
        metrics: impl IntoIterator<Item = MetricKind>,
    ) -> Result<Self, ConfigError> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(ConfigError::EmptyProjectId);
        }
        if interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(interval_secs.to_string()));
        }

        let mut metrics: Vec<MetricKind> = metrics.into_iter().collect();
        metrics.sort();
        metrics.dedup();
        if metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        Ok(Self {
            project_id,
            interval: Duration::from_secs(interval_secs),
            metrics,
        })
    }
}

/// A CSV row that could not be turned into a project.
#[derive(Debug)]
pub struct RowRejection {
    /// 1-based line number in the source file.
    pub line: usize,
    pub error: ConfigError,
}

/// Result of parsing a project file.
#[derive(Debug, Default)]
pub struct LoadedProjects {
    /// Valid projects in file order. Duplicate ids keep the last row.
    pub projects: Vec<ProjectConfig>,
    pub rejected: Vec<RowRejection>,
}

impl LoadedProjects {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn get(&self, project_id: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

fn is_header(line: &str) -> bool {
    line.split(',')
        .next()
        .is_some_and(|f| clean_field(f).eq_ignore_ascii_case("project_id"))
}

/// Parse a single `project_id,interval,metric...` row.
pub fn parse_row(line: &str) -> Result<ProjectConfig, ConfigError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 3 {
        return Err(ConfigError::TooFewFields(fields.len()));
    }

    let project_id = clean_field(fields[0]);
    let raw_interval = clean_field(fields[1]);
    let interval_secs = raw_interval
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidInterval(raw_interval.to_string()))?;

    let metrics = fields[2..]
        .iter()
        .map(|f| clean_field(f))
        .filter(|f| !f.is_empty())
        .map(MetricKind::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    ProjectConfig::new(project_id, interval_secs, metrics)
}

/// Parse the contents of a project file.
///
/// Invalid rows are collected in [`LoadedProjects::rejected`] and do not stop
/// the remaining rows from loading.
pub fn parse_projects(text: &str) -> LoadedProjects {
    let mut loaded = LoadedProjects::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut first_row = true;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if std::mem::take(&mut first_row) && is_header(line) {
            continue;
        }

        match parse_row(line) {
            Ok(project) => match index.get(&project.project_id) {
                Some(&pos) => {
                    tracing::warn!(
                        project_id = %project.project_id,
                        line = i + 1,
                        "Duplicate project row, later row replaces earlier one"
                    );
                    loaded.projects[pos] = project;
                }
                None => {
                    index.insert(project.project_id.clone(), loaded.projects.len());
                    loaded.projects.push(project);
                }
            },
            Err(error) => loaded.rejected.push(RowRejection { line: i + 1, error }),
        }
    }

    loaded
}

/// Read and parse a project file.
pub fn load_projects<P: AsRef<Path>>(path: P) -> Result<LoadedProjects, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_projects(&text))
}
