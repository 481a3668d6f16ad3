//! Configuration parsing for the exporter binaries.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for a local collector

use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::observability::metrics::{ExportSettings, OtlpProtocol, DEFAULT_SERVICE_NAME};
use crate::observability::tracing::LogFormat;
use crate::quota::client::DEFAULT_MONITORING_ENDPOINT;
use crate::quota::token::DEFAULT_METADATA_ENDPOINT;
use crate::quota::{MonitoringSettings, TokenSource};

/// Cloud Monitoring API options.
#[derive(Args, Debug, Clone)]
pub struct MonitoringArgs {
    /// Cloud Monitoring API endpoint
    #[arg(long, env = "QUOTA_MONITORING_ENDPOINT", default_value = DEFAULT_MONITORING_ENDPOINT)]
    pub monitoring_endpoint: String,

    /// OAuth access token (otherwise fetched from the metadata server)
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// GCE metadata server used to obtain access tokens
    #[arg(long, env = "GCE_METADATA_HOST_URL", default_value = DEFAULT_METADATA_ENDPOINT)]
    pub metadata_endpoint: String,

    /// Send API requests without credentials (emulators, proxies)
    #[arg(long, env = "QUOTA_NO_AUTH", conflicts_with = "access_token")]
    pub no_auth: bool,

    /// Timeout for a single API request, in seconds
    #[arg(long, env = "QUOTA_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How far back to search for usage points, in seconds
    #[arg(long, env = "QUOTA_USAGE_LOOKBACK_SECS", default_value_t = 50_000)]
    pub usage_lookback_secs: u64,

    /// How far back to search for limit points, in seconds
    #[arg(long, env = "QUOTA_LIMIT_LOOKBACK_SECS", default_value_t = 86_400)]
    pub limit_lookback_secs: u64,
}

impl MonitoringArgs {
    pub fn settings(&self) -> MonitoringSettings {
        MonitoringSettings {
            endpoint: self.monitoring_endpoint.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            usage_lookback: Duration::from_secs(self.usage_lookback_secs),
            limit_lookback: Duration::from_secs(self.limit_lookback_secs),
        }
    }

    pub fn token_source(&self) -> TokenSource {
        match (&self.access_token, self.no_auth) {
            (_, true) => TokenSource::Anonymous,
            (Some(token), false) => TokenSource::Static(token.clone()),
            (None, false) => TokenSource::Metadata {
                endpoint: self.metadata_endpoint.clone(),
            },
        }
    }
}

impl Default for MonitoringArgs {
    fn default() -> Self {
        Self {
            monitoring_endpoint: DEFAULT_MONITORING_ENDPOINT.into(),
            access_token: None,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.into(),
            no_auth: false,
            request_timeout_secs: 30,
            usage_lookback_secs: 50_000,
            limit_lookback_secs: 86_400,
        }
    }
}

/// OTLP export options.
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// OTLP collector endpoint (defaults to localhost for the chosen protocol)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// OTLP transport protocol
    #[arg(long, env = "QUOTA_OTLP_PROTOCOL", value_enum, default_value_t = OtlpProtocol::Http)]
    pub otlp_protocol: OtlpProtocol,

    /// Interval between periodic metric exports, in seconds
    #[arg(long, env = "QUOTA_EXPORT_INTERVAL_SECS", default_value_t = 5)]
    pub export_interval_secs: u64,

    /// Timeout for a single export, in seconds
    #[arg(long, env = "QUOTA_EXPORT_TIMEOUT_SECS", default_value_t = 10)]
    pub export_timeout_secs: u64,

    /// Value of the service.name resource attribute
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    /// Record metrics without exporting them
    #[arg(long, env = "QUOTA_DISABLE_EXPORT")]
    pub disable_export: bool,
}

impl ExportArgs {
    pub fn settings(&self, flush_on_emit: bool) -> ExportSettings {
        let endpoint = if self.disable_export {
            None
        } else {
            Some(
                self.otlp_endpoint
                    .clone()
                    .unwrap_or_else(|| self.otlp_protocol.default_endpoint().to_string()),
            )
        };

        ExportSettings {
            endpoint,
            protocol: self.otlp_protocol,
            interval: Duration::from_secs(self.export_interval_secs.max(1)),
            timeout: Duration::from_secs(self.export_timeout_secs.max(1)),
            service_name: self.service_name.clone(),
            flush_on_emit,
        }
    }
}

impl Default for ExportArgs {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            otlp_protocol: OtlpProtocol::Http,
            export_interval_secs: 5,
            export_timeout_secs: 10,
            service_name: DEFAULT_SERVICE_NAME.into(),
            disable_export: false,
        }
    }
}

/// Logging options.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "QUOTA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

/// GCP quota exporter: polls quota usage per project and exports it over OTLP.
#[derive(Parser, Debug, Clone)]
#[command(name = "quota-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the CSV project configuration
    #[arg(short, long, env = "QUOTA_EXPORTER_CONFIG", default_value = "projects.csv")]
    pub config: PathBuf,

    #[command(flatten)]
    pub monitoring: MonitoringArgs,

    #[command(flatten)]
    pub export: ExportArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config: PathBuf::from("projects.csv"),
            monitoring: MonitoringArgs::default(),
            export: ExportArgs::default(),
            log: LogArgs::default(),
        }
    }
}

/// GCP quota function: runs one quota check per HTTP invocation.
#[derive(Parser, Debug, Clone)]
#[command(name = "quota-function")]
#[command(author, version, about, long_about = None)]
pub struct FunctionConfig {
    /// Host address to bind to
    #[arg(long, env = "QUOTA_FUNCTION_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Path to the CSV project configuration used for empty invocations
    #[arg(short, long, env = "QUOTA_EXPORTER_CONFIG", default_value = "projects.csv")]
    pub config: PathBuf,

    #[command(flatten)]
    pub monitoring: MonitoringArgs,

    #[command(flatten)]
    pub export: ExportArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl FunctionConfig {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Config::command().debug_assert();
        FunctionConfig::command().debug_assert();
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.config, PathBuf::from("projects.csv"));
        assert_eq!(config.export.export_interval_secs, 5);
        assert_eq!(config.monitoring.usage_lookback_secs, 50_000);
    }

    #[test]
    fn test_config_flag() {
        let config = Config::try_parse_from(["quota-exporter", "--config", "/etc/quota/projects.csv"])
            .unwrap();
        assert_eq!(config.config, PathBuf::from("/etc/quota/projects.csv"));
    }

    #[test]
    fn test_export_settings_default_endpoint() {
        let http = ExportArgs::default().settings(false);
        assert_eq!(http.endpoint.as_deref(), Some("http://localhost:4318/v1/metrics"));

        let grpc = ExportArgs {
            otlp_protocol: OtlpProtocol::Grpc,
            ..ExportArgs::default()
        }
        .settings(true);
        assert_eq!(grpc.endpoint.as_deref(), Some("http://localhost:4317"));
        assert!(grpc.flush_on_emit);

        let disabled = ExportArgs {
            disable_export: true,
            ..ExportArgs::default()
        }
        .settings(false);
        assert!(disabled.endpoint.is_none());
    }

    #[test]
    fn test_token_source_selection() {
        let mut args = MonitoringArgs::default();
        assert!(matches!(args.token_source(), TokenSource::Metadata { .. }));

        args.access_token = Some("tok".into());
        assert_eq!(args.token_source(), TokenSource::Static("tok".into()));

        args.access_token = None;
        args.no_auth = true;
        assert_eq!(args.token_source(), TokenSource::Anonymous);
    }
}
