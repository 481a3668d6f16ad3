//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Structured logging through `tracing`
//! - OTLP export of quota readings and exporter self-metrics

pub mod metrics;
pub mod tracing;
