//! quota-exporter: GCP quota usage exporter.
//!
//! # Usage
//!
//! ```bash
//! quota-exporter --config projects.csv --otlp-endpoint http://localhost:4318/v1/metrics
//! ```
//!
//! Environment variables can also be used:
//! - `QUOTA_EXPORTER_CONFIG`: Path to the CSV project list
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `GOOGLE_OAUTH_ACCESS_TOKEN`: Access token (otherwise the metadata server is used)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use quota_exporter::config::Config;
use quota_exporter::observability::metrics::{MetricsEmitter, ReadingSink};
use quota_exporter::observability::tracing::init_tracing;
use quota_exporter::projects::load_projects;
use quota_exporter::quota::{MonitoringClient, QuotaChecker};
use quota_exporter::scheduler::Scheduler;
use quota_exporter::signal::spawn_shutdown_listener;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config, projects: usize, endpoint: Option<&str>) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  quota-exporter v{}

  Configuration:
    Projects:   {} (from {})
    OTLP:       {}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        projects,
        config.config.display(),
        endpoint.unwrap_or("disabled"),
        config.log.log_level
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse_args();

    init_tracing(&config.log.log_level, config.log.log_format);

    let loaded = load_projects(&config.config).context("failed to load project configuration")?;
    for rejection in &loaded.rejected {
        tracing::warn!(
            line = rejection.line,
            error = %rejection.error,
            "Skipping invalid project row"
        );
    }
    if loaded.is_empty() {
        bail!(
            "no project configurations to monitor in {}",
            config.config.display()
        );
    }

    let export = config.export.settings(false);
    let emitter = Arc::new(MetricsEmitter::new(&export).context("failed to initialize metrics")?);

    let client = MonitoringClient::new(config.monitoring.settings(), config.monitoring.token_source())
        .context("failed to create monitoring client")?;
    let checker = Arc::new(QuotaChecker::new(Arc::new(client)));

    print_banner(&config, loaded.projects.len(), export.endpoint.as_deref());

    let shutdown_rx = spawn_shutdown_listener();

    let sink: Arc<dyn ReadingSink> = emitter.clone();
    let mut scheduler = Scheduler::new(checker, sink);
    for project in loaded.projects {
        scheduler.schedule(project);
    }
    tracing::info!(
        projects = scheduler.active_count(),
        "Monitoring projects with individual schedules and metrics"
    );

    scheduler.run(shutdown_rx).await;

    if let Err(e) = emitter.shutdown().await {
        tracing::warn!(error = %e, "Meter provider shutdown failed");
    }

    tracing::info!("quota-exporter shutdown complete");
    Ok(())
}
