//! Cloud Monitoring API client.
//!
//! Reads quota usage and limits via `projects.timeSeries.list`:
//!
//! ```text
//! GET {endpoint}/v3/projects/{project}/timeSeries
//!     ?filter=metric.type = "serviceruntime.googleapis.com/quota/limit"
//!     &interval.startTime=...&interval.endTime=...
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::token::{TokenCache, TokenError, TokenSource};
use super::{QuotaSample, QuotaSource};
use crate::projects::{MetricKind, LIMIT_METRIC};

/// Default Cloud Monitoring API endpoint.
pub const DEFAULT_MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com";

/// Upper bound on pages fetched for one query.
const MAX_PAGES: usize = 100;

/// Error type for quota API calls.
#[derive(Debug, Error)]
pub enum QuotaApiError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("monitoring API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode monitoring API response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("failed to obtain access token: {0}")]
    Token(#[from] TokenError),

    #[error("unsupported point value in series {0}")]
    InvalidValue(String),

    #[error("too many result pages for {0}")]
    TooManyPages(String),

    #[error("lookback of {0:?} reaches before the earliest representable time")]
    InvalidLookback(Duration),
}

/// Monitoring API client settings.
#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub endpoint: String,
    pub request_timeout: Duration,
    /// How far back to look for usage points.
    pub usage_lookback: Duration,
    /// How far back to look for limit points.
    pub limit_lookback: Duration,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MONITORING_ENDPOINT.into(),
            request_timeout: Duration::from_secs(30),
            usage_lookback: Duration::from_secs(50_000),
            limit_lookback: Duration::from_secs(86_400),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct Labeled {
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    metric: Labeled,
    #[serde(default)]
    resource: Labeled,
    #[serde(default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct Point {
    interval: PointInterval,
    value: TypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointInterval {
    end_time: Option<DateTime<Utc>>,
}

/// `int64Value` is encoded as a JSON string by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    int64_value: Option<serde_json::Value>,
    double_value: Option<f64>,
}

impl TypedValue {
    fn as_f64(&self) -> Option<f64> {
        if let Some(v) = self.double_value {
            return Some(v);
        }
        match self.int64_value.as_ref()? {
            serde_json::Value::String(s) => s.parse::<i64>().ok().map(|v| v as f64),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl TimeSeries {
    /// Convert to a sample using the newest point.
    fn into_sample(self) -> Result<Option<QuotaSample>, QuotaApiError> {
        let quota_metric = self
            .metric
            .labels
            .get("quota_metric")
            .cloned()
            .unwrap_or_else(|| "N/A".to_string());

        let Some(point) = self.points.iter().max_by_key(|p| p.interval.end_time) else {
            return Ok(None);
        };
        let value = point
            .value
            .as_f64()
            .ok_or_else(|| QuotaApiError::InvalidValue(quota_metric.clone()))?;

        Ok(Some(QuotaSample {
            location: self.resource.labels.get("location").cloned(),
            quota_metric,
            value,
        }))
    }
}

/// Cloud Monitoring `timeSeries.list` client.
#[derive(Debug, Clone)]
pub struct MonitoringClient {
    http: reqwest::Client,
    settings: MonitoringSettings,
    token: Arc<TokenCache>,
}

impl MonitoringClient {
    /// Create a client with the given settings and token source.
    pub fn new(settings: MonitoringSettings, token: TokenSource) -> Result<Self, QuotaApiError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|source| QuotaApiError::Http {
                url: settings.endpoint.clone(),
                source,
            })?;

        Ok(Self {
            http,
            settings,
            token: Arc::new(TokenCache::new(token)),
        })
    }

    /// List the newest point of every series of `metric_type` in the project.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn list_time_series(
        &self,
        project_id: &str,
        metric_type: &str,
        lookback: Duration,
    ) -> Result<Vec<QuotaSample>, QuotaApiError> {
        let url = format!(
            "{}/v3/projects/{}/timeSeries",
            self.settings.endpoint.trim_end_matches('/'),
            project_id
        );
        let end = Utc::now();
        let start = i64::try_from(lookback.as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| end.checked_sub_signed(window))
            .ok_or(QuotaApiError::InvalidLookback(lookback))?;
        let token = self.token.get(&self.http).await?;

        let filter = format!("metric.type = \"{metric_type}\"");
        let start_time = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end_time = end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut samples = Vec::new();
        let mut page_token = String::new();

        for _ in 0..MAX_PAGES {
            let mut query: Vec<(&str, &str)> = vec![
                ("filter", filter.as_str()),
                ("interval.startTime", start_time.as_str()),
                ("interval.endTime", end_time.as_str()),
            ];
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.as_str()));
            }

            let mut request = self.http.get(&url).query(&query);
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|source| QuotaApiError::Http {
                url: url.clone(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(QuotaApiError::Status { status, body });
            }

            let page: ListTimeSeriesResponse =
                response.json().await.map_err(QuotaApiError::Decode)?;

            for series in page.time_series {
                if let Some(sample) = series.into_sample()? {
                    samples.push(sample);
                }
            }

            if page.next_page_token.is_empty() {
                tracing::debug!(count = samples.len(), "Listed quota time series");
                return Ok(samples);
            }
            page_token = page.next_page_token;
        }

        Err(QuotaApiError::TooManyPages(metric_type.to_string()))
    }
}

#[async_trait]
impl QuotaSource for MonitoringClient {
    async fn usage(
        &self,
        project_id: &str,
        kind: MetricKind,
    ) -> Result<Vec<QuotaSample>, QuotaApiError> {
        self.list_time_series(project_id, kind.usage_metric_type(), self.settings.usage_lookback)
            .await
    }

    async fn limits(&self, project_id: &str) -> Result<Vec<QuotaSample>, QuotaApiError> {
        self.list_time_series(project_id, LIMIT_METRIC, self.settings.limit_lookback)
            .await
    }
}
