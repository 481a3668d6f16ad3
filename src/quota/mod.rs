//! Quota data retrieval.
//!
//! Provides:
//! - [`QuotaSource`]: the seam between the checker and the quota API
//! - [`client`]: Cloud Monitoring `timeSeries.list` client
//! - [`token`]: OAuth access token sources
//! - [`checker`]: per-project checks producing [`QuotaReading`]s

pub mod checker;
pub mod client;
pub mod token;

pub use checker::{CheckOutcome, CheckReport, KindFailure, QuotaChecker};
pub use client::{MonitoringClient, MonitoringSettings, QuotaApiError};
pub use token::{AccessToken, TokenCache, TokenError, TokenSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::projects::MetricKind;

/// Latest value of one quota time series.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSample {
    pub quota_metric: String,
    /// Region or zone of the quota, `None` for global quotas.
    pub location: Option<String>,
    pub value: f64,
}

/// Usage and limit of a single quota.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaUsage {
    pub quota_metric: String,
    pub location: Option<String>,
    pub usage: Option<f64>,
    pub limit: Option<f64>,
}

impl QuotaUsage {
    /// Fraction of the limit in use, when both values are known and the limit is positive.
    pub fn utilization(&self) -> Option<f64> {
        match (self.usage, self.limit) {
            (Some(usage), Some(limit)) if limit > 0.0 => Some(usage / limit),
            _ => None,
        }
    }
}

/// Result of checking one metric kind for one project.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaReading {
    pub project_id: String,
    pub metric_kind: MetricKind,
    pub quotas: Vec<QuotaUsage>,
    pub timestamp: DateTime<Utc>,
}

/// Source of quota usage and limit data.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    /// Latest usage of every quota of the given kind.
    async fn usage(
        &self,
        project_id: &str,
        kind: MetricKind,
    ) -> Result<Vec<QuotaSample>, QuotaApiError>;

    /// Latest limit of every quota in the project.
    async fn limits(&self, project_id: &str) -> Result<Vec<QuotaSample>, QuotaApiError>;
}
