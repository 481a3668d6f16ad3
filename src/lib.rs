//! Quota exporter: GCP quota usage and limits as OTLP metrics.
//!
//! Reads a CSV list of projects, checks their allocation and rate quotas on a
//! per-project interval through the Cloud Monitoring API, and exports usage,
//! limits and utilization as OTLP gauges.
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`projects`]: CSV project list loading
//! - [`quota`]: Monitoring API client and quota checks
//! - [`scheduler`]: Per-project periodic checks
//! - [`observability`]: Logging and OTLP metric export
//! - [`function`]: HTTP entry point for serverless deployments
//! - [`signal`]: Shutdown signal handling

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // quota::QuotaChecker is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::cast_possible_truncation,   // Millisecond durations fit in u64
    clippy::cast_precision_loss         // Quota values are well within f64 range
)]

pub mod config;
pub mod function;
pub mod observability;
pub mod projects;
pub mod quota;
pub mod scheduler;
pub mod signal;
