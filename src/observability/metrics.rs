//! OTLP export of quota readings.
//!
//! Quota gauges:
//! - gcp_quota_current_usage: Latest usage per quota (0 when unknown)
//! - gcp_quota_limit: Latest limit per quota (-1 when unknown)
//! - gcp_quota_utilization: usage / limit when both are known
//!
//! Self-metrics:
//! - quota_exporter_checks_total: Counter of checks by outcome
//! - quota_exporter_api_errors_total: Counter of failed quota API calls
//! - quota_exporter_check_duration_seconds: Histogram of check latency

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::quota::{CheckReport, QuotaReading, QuotaUsage};

/// Default OTLP/HTTP metrics endpoint.
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/metrics";

/// Default OTLP/gRPC endpoint.
pub const DEFAULT_GRPC_ENDPOINT: &str = "http://localhost:4317";

/// Default `service.name` resource attribute.
pub const DEFAULT_SERVICE_NAME: &str = "gcp-quota-exporter";

/// Error type for metric export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to build OTLP pipeline: {0}")]
    Pipeline(String),

    #[error("failed to flush metrics: {0}")]
    Flush(String),

    #[error("failed to shut down meter provider: {0}")]
    Shutdown(String),
}

/// OTLP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OtlpProtocol {
    /// HTTP with protobuf payloads
    #[default]
    Http,
    /// gRPC
    Grpc,
}

impl OtlpProtocol {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Http => DEFAULT_HTTP_ENDPOINT,
            Self::Grpc => DEFAULT_GRPC_ENDPOINT,
        }
    }
}

/// Metric export settings.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Collector endpoint. `None` records metrics without exporting them.
    pub endpoint: Option<String>,
    pub protocol: OtlpProtocol,
    pub interval: Duration,
    pub timeout: Duration,
    pub service_name: String,
    /// Force a flush after every emit instead of waiting for the periodic reader.
    pub flush_on_emit: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            protocol: OtlpProtocol::Http,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            service_name: DEFAULT_SERVICE_NAME.into(),
            flush_on_emit: false,
        }
    }
}

/// Destination for quota readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Record the readings of one check.
    async fn emit(&self, readings: &[QuotaReading]) -> Result<(), ExportError>;

    /// Record check-level bookkeeping (outcome, latency, API failures).
    fn record_check(&self, _report: &CheckReport) {}
}

/// Instruments recorded by the exporter.
#[derive(Debug)]
struct Instruments {
    usage: Gauge<f64>,
    limit: Gauge<f64>,
    utilization: Gauge<f64>,
    checks_total: Counter<u64>,
    api_errors_total: Counter<u64>,
    check_duration: Histogram<f64>,
}

impl Instruments {
    fn new(meter: &Meter) -> Self {
        Self {
            usage: meter
                .f64_gauge("gcp_quota_current_usage")
                .with_description("Current usage of GCP quotas")
                .with_unit("1")
                .init(),
            limit: meter
                .f64_gauge("gcp_quota_limit")
                .with_description("Quota limit of GCP quotas")
                .with_unit("1")
                .init(),
            utilization: meter
                .f64_gauge("gcp_quota_utilization")
                .with_description("Fraction of the quota limit in use")
                .with_unit("1")
                .init(),
            checks_total: meter
                .u64_counter("quota_exporter_checks_total")
                .with_description("Total number of project quota checks")
                .with_unit("1")
                .init(),
            api_errors_total: meter
                .u64_counter("quota_exporter_api_errors_total")
                .with_description("Total number of failed quota API requests")
                .with_unit("1")
                .init(),
            check_duration: meter
                .f64_histogram("quota_exporter_check_duration_seconds")
                .with_description("Time taken by one project quota check")
                .with_unit("s")
                .init(),
        }
    }
}

/// Attributes attached to every quota data point.
pub fn quota_attributes(reading: &QuotaReading, quota: &QuotaUsage) -> [KeyValue; 4] {
    [
        KeyValue::new("project_id", reading.project_id.clone()),
        KeyValue::new("metric_kind", reading.metric_kind.as_str()),
        KeyValue::new("quota_metric", quota.quota_metric.clone()),
        KeyValue::new(
            "region",
            quota.location.clone().unwrap_or_else(|| "global".to_string()),
        ),
    ]
}

/// Records quota readings as OTLP gauges.
pub struct MetricsEmitter {
    provider: SdkMeterProvider,
    instruments: Instruments,
    flush_on_emit: bool,
}

impl MetricsEmitter {
    /// Build an emitter with an OTLP pipeline, or a non-exporting reader
    /// when no endpoint is configured.
    pub fn new(settings: &ExportSettings) -> Result<Self, ExportError> {
        let resource = Resource::new([KeyValue::new(
            "service.name",
            settings.service_name.clone(),
        )]);

        let provider = match settings.endpoint.as_deref() {
            Some(endpoint) => {
                let provider = build_otlp_provider(endpoint, settings, resource)?;
                install_error_handler();
                tracing::info!(
                    endpoint,
                    protocol = ?settings.protocol,
                    interval_secs = settings.interval.as_secs(),
                    "OTLP metrics exporter configured"
                );
                provider
            }
            None => {
                tracing::info!("No OTLP endpoint configured, metrics will not be exported");
                let reader = ManualReader::builder().build();
                SdkMeterProvider::builder()
                    .with_reader(reader)
                    .with_resource(resource)
                    .build()
            }
        };

        Ok(Self::from_provider(provider, settings.flush_on_emit))
    }

    fn from_provider(provider: SdkMeterProvider, flush_on_emit: bool) -> Self {
        let meter = provider.meter("quota-exporter");
        Self {
            instruments: Instruments::new(&meter),
            provider,
            flush_on_emit,
        }
    }

    /// Force the provider to export everything recorded so far.
    pub async fn flush(&self) -> Result<(), ExportError> {
        // The periodic reader blocks on its worker task while flushing.
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.force_flush())
            .await
            .map_err(|e| ExportError::Flush(e.to_string()))?
            .map_err(|e| ExportError::Flush(e.to_string()))
    }

    /// Flush remaining metrics and stop the exporter.
    pub async fn shutdown(&self) -> Result<(), ExportError> {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .map_err(|e| ExportError::Shutdown(e.to_string()))?
            .map_err(|e| ExportError::Shutdown(e.to_string()))
    }

    fn record(&self, readings: &[QuotaReading]) {
        for reading in readings {
            for quota in &reading.quotas {
                let attrs = quota_attributes(reading, quota);
                self.instruments
                    .usage
                    .record(quota.usage.unwrap_or(0.0), &attrs);
                self.instruments
                    .limit
                    .record(quota.limit.unwrap_or(-1.0), &attrs);
                if let Some(ratio) = quota.utilization() {
                    self.instruments.utilization.record(ratio, &attrs);
                }
            }
        }
    }
}

#[async_trait]
impl ReadingSink for MetricsEmitter {
    async fn emit(&self, readings: &[QuotaReading]) -> Result<(), ExportError> {
        self.record(readings);
        if self.flush_on_emit {
            self.flush().await?;
        }
        Ok(())
    }

    fn record_check(&self, report: &CheckReport) {
        let project = KeyValue::new("project_id", report.project_id.clone());

        self.instruments.checks_total.add(
            1,
            &[
                project.clone(),
                KeyValue::new("outcome", report.outcome().as_str()),
            ],
        );
        self.instruments
            .check_duration
            .record(report.duration.as_secs_f64(), &[project.clone()]);

        for failure in &report.failures {
            self.instruments.api_errors_total.add(
                1,
                &[
                    project.clone(),
                    KeyValue::new("metric_kind", failure.metric_kind.as_str()),
                ],
            );
        }
        if report.limit_failure.is_some() {
            self.instruments
                .api_errors_total
                .add(1, &[project, KeyValue::new("metric_kind", "limit")]);
        }
    }
}

fn build_otlp_provider(
    endpoint: &str,
    settings: &ExportSettings,
    resource: Resource,
) -> Result<SdkMeterProvider, ExportError> {
    use opentelemetry_otlp::{Protocol, WithExportConfig};

    let result = match settings.protocol {
        OtlpProtocol::Grpc => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc)
                .with_timeout(settings.timeout);

            opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_resource(resource)
                .with_period(settings.interval)
                .with_timeout(settings.timeout)
                .build()
        }
        OtlpProtocol::Http => {
            let exporter = opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::HttpBinary)
                .with_timeout(settings.timeout);

            opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_resource(resource)
                .with_period(settings.interval)
                .with_timeout(settings.timeout)
                .build()
        }
    };

    result.map_err(|e| ExportError::Pipeline(e.to_string()))
}

/// Route errors from the periodic reader into the log.
fn install_error_handler() {
    let installed = global::set_error_handler(|err| {
        tracing::warn!(error = %err, "OTLP metrics export failed");
    });
    if let Err(e) = installed {
        tracing::debug!(error = %e, "OpenTelemetry error handler already installed");
    }
}
