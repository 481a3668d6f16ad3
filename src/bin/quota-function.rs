//! quota-function: serverless quota check handler.
//!
//! Serves `POST /` and runs a single check per invocation; the platform
//! (Cloud Functions, Cloud Scheduler, ...) decides when to invoke it.
//!
//! ```bash
//! PORT=8080 quota-function --config projects.csv
//! curl -X POST localhost:8080/ -d '{"project_id":"my-project","metrics":["rate"]}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use quota_exporter::config::FunctionConfig;
use quota_exporter::function::{run_function_server, FunctionState};
use quota_exporter::observability::metrics::{MetricsEmitter, ReadingSink};
use quota_exporter::observability::tracing::init_tracing;
use quota_exporter::quota::{MonitoringClient, QuotaChecker};
use quota_exporter::signal::spawn_shutdown_listener;

#[tokio::main]
async fn main() -> Result<()> {
    let config = FunctionConfig::parse_args();

    init_tracing(&config.log.log_level, config.log.log_format);

    // Invocations may be the last thing the instance does, so export eagerly.
    let export = config.export.settings(true);
    let emitter = Arc::new(MetricsEmitter::new(&export).context("failed to initialize metrics")?);

    let client = MonitoringClient::new(config.monitoring.settings(), config.monitoring.token_source())
        .context("failed to create monitoring client")?;
    let checker = Arc::new(QuotaChecker::new(Arc::new(client)));

    let sink: Arc<dyn ReadingSink> = emitter.clone();
    let state = FunctionState::new(checker, sink, config.config.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen address")?;

    let shutdown_rx = spawn_shutdown_listener();
    run_function_server(addr, state, shutdown_rx)
        .await
        .map_err(|e| anyhow!("function server error: {e}"))?;

    if let Err(e) = emitter.shutdown().await {
        tracing::warn!(error = %e, "Meter provider shutdown failed");
    }

    tracing::info!("quota-function shutdown complete");
    Ok(())
}
