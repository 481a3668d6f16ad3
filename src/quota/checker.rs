//! Per-project quota checks.
//!
//! One check issues a usage request per configured metric kind, then a single
//! limit request, and joins the two by `(quota_metric, location)`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use super::{QuotaApiError, QuotaReading, QuotaSample, QuotaSource, QuotaUsage};
use crate::projects::{MetricKind, ProjectConfig};

type QuotaKey = (String, Option<String>);

/// A usage request that failed during a check.
#[derive(Debug)]
pub struct KindFailure {
    pub metric_kind: MetricKind,
    pub error: QuotaApiError,
}

/// Overall result of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Every request succeeded.
    Success,
    /// Some readings were produced but at least one request failed.
    Partial,
    /// No readings were produced.
    Failed,
}

impl CheckOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Everything one check of one project produced.
#[derive(Debug)]
pub struct CheckReport {
    /// UUIDv7, time-sortable.
    pub check_id: Uuid,
    pub project_id: String,
    /// One reading per successfully fetched metric kind.
    pub readings: Vec<QuotaReading>,
    pub failures: Vec<KindFailure>,
    pub limit_failure: Option<QuotaApiError>,
    pub duration: Duration,
}

impl CheckReport {
    pub fn outcome(&self) -> CheckOutcome {
        if self.readings.is_empty() {
            CheckOutcome::Failed
        } else if self.failures.is_empty() && self.limit_failure.is_none() {
            CheckOutcome::Success
        } else {
            CheckOutcome::Partial
        }
    }
}

/// Runs quota checks against a [`QuotaSource`].
#[derive(Clone)]
pub struct QuotaChecker {
    source: Arc<dyn QuotaSource>,
}

impl QuotaChecker {
    pub fn new(source: Arc<dyn QuotaSource>) -> Self {
        Self { source }
    }

    /// Check every metric kind configured for the project.
    pub async fn check(&self, project: &ProjectConfig) -> CheckReport {
        self.check_metrics(&project.project_id, &project.metrics)
            .await
    }

    /// Check the given metric kinds for a project.
    ///
    /// API failures are logged and recorded in the report, never returned.
    #[tracing::instrument(skip(self, metrics), fields(check_id))]
    pub async fn check_metrics(&self, project_id: &str, metrics: &[MetricKind]) -> CheckReport {
        let start = Instant::now();
        let check_id = Uuid::now_v7();
        tracing::Span::current().record("check_id", tracing::field::display(check_id));

        let fetches = metrics.iter().map(|&kind| async move {
            (kind, self.source.usage(project_id, kind).await)
        });

        let mut usage: Vec<(MetricKind, Vec<QuotaSample>)> = Vec::with_capacity(metrics.len());
        let mut failures = Vec::new();
        for (kind, result) in join_all(fetches).await {
            match result {
                Ok(samples) => usage.push((kind, samples)),
                Err(error) => {
                    tracing::warn!(
                        metric_kind = %kind,
                        error = %error,
                        "Failed to fetch quota usage"
                    );
                    failures.push(KindFailure {
                        metric_kind: kind,
                        error,
                    });
                }
            }
        }

        let mut limit_failure = None;
        let limits = if usage.is_empty() {
            Vec::new()
        } else {
            match self.source.limits(project_id).await {
                Ok(limits) => limits,
                Err(error) => {
                    tracing::warn!(error = %error, "Failed to fetch quota limits");
                    limit_failure = Some(error);
                    Vec::new()
                }
            }
        };

        let readings = combine_usage_and_limits(project_id, usage, &limits);
        let duration = start.elapsed();

        tracing::debug!(
            readings = readings.len(),
            failures = failures.len(),
            duration_ms = duration.as_millis() as u64,
            "Quota check finished"
        );

        CheckReport {
            check_id,
            project_id: project_id.to_string(),
            readings,
            failures,
            limit_failure,
            duration,
        }
    }
}

/// Join usage samples with limit samples into one reading per metric kind.
///
/// A limit whose quota has no usage sample is attached to the kind its quota
/// metric name suggests, provided that kind was fetched.
pub fn combine_usage_and_limits(
    project_id: &str,
    usage: Vec<(MetricKind, Vec<QuotaSample>)>,
    limits: &[QuotaSample],
) -> Vec<QuotaReading> {
    let mut by_kind: Vec<(MetricKind, BTreeMap<QuotaKey, QuotaUsage>)> = usage
        .into_iter()
        .map(|(kind, samples)| {
            let quotas = samples
                .into_iter()
                .map(|s| {
                    let key = (s.quota_metric.clone(), s.location.clone());
                    let entry = QuotaUsage {
                        quota_metric: s.quota_metric,
                        location: s.location,
                        usage: Some(s.value),
                        limit: None,
                    };
                    (key, entry)
                })
                .collect();
            (kind, quotas)
        })
        .collect();

    for limit in limits {
        let key = (limit.quota_metric.clone(), limit.location.clone());
        let mut matched = false;
        for (_, quotas) in by_kind.iter_mut() {
            if let Some(entry) = quotas.get_mut(&key) {
                entry.limit = Some(limit.value);
                matched = true;
            }
        }
        if matched {
            continue;
        }

        let kind = MetricKind::classify_quota_metric(&limit.quota_metric);
        if let Some((_, quotas)) = by_kind.iter_mut().find(|(k, _)| *k == kind) {
            quotas.insert(
                key,
                QuotaUsage {
                    quota_metric: limit.quota_metric.clone(),
                    location: limit.location.clone(),
                    usage: None,
                    limit: Some(limit.value),
                },
            );
        }
    }

    let timestamp = Utc::now();
    by_kind
        .into_iter()
        .map(|(metric_kind, quotas)| QuotaReading {
            project_id: project_id.to_string(),
            metric_kind,
            quotas: quotas.into_values().collect(),
            timestamp,
        })
        .collect()
}
