//! Scheduler and checker behaviour against an in-memory quota source.
//!
//! Runs on a paused clock, so intervals of whole seconds elapse instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{checker, FakeSource, ProjectsFile, RecordingSink, EXAMPLE_PROJECTS};
use quota_exporter::observability::metrics::ReadingSink;
use quota_exporter::projects::{load_projects, parse_projects, MetricKind, ProjectConfig};
use quota_exporter::quota::CheckOutcome;
use quota_exporter::scheduler::{check_and_emit, Scheduler};
use tokio::sync::watch;

fn project(id: &str, interval_secs: u64, metrics: &[MetricKind]) -> ProjectConfig {
    ProjectConfig::new(id, interval_secs, metrics.iter().copied()).unwrap()
}

#[tokio::test]
async fn test_alpha_produces_one_reading_per_metric() {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let checker = checker(&source);

    let loaded = parse_projects(EXAMPLE_PROJECTS);
    let alpha = loaded.get("project-alpha-12345").unwrap();

    for tick in 1..=3 {
        let report = check_and_emit(&checker, sink.as_ref(), alpha).await;
        assert_eq!(report.outcome(), CheckOutcome::Success);
        assert_eq!(report.readings.len(), 2);
        assert_eq!(sink.readings_for("project-alpha-12345"), 2 * tick);
    }

    let kinds: Vec<MetricKind> = sink.readings()[..2].iter().map(|r| r.metric_kind).collect();
    assert_eq!(kinds, vec![MetricKind::Allocation, MetricKind::Rate]);

    let cpus = &sink.readings()[0].quotas[0];
    assert_eq!(cpus.usage, Some(10.0));
    assert_eq!(cpus.limit, Some(40.0));
}

#[tokio::test]
async fn test_one_usage_request_per_metric_and_one_limit_request() {
    let source = FakeSource::new();
    let checker = checker(&source);

    let report = checker
        .check(&project("p", 60, &[MetricKind::Allocation, MetricKind::Rate]))
        .await;
    assert_eq!(report.readings.len(), 2);
    assert_eq!(source.usage_calls("p"), 2);
    assert_eq!(source.limit_calls(), 1);

    checker.check(&project("q", 60, &[MetricKind::Rate])).await;
    assert_eq!(source.usage_calls("q"), 1);
    assert_eq!(source.limit_calls(), 2);
}

#[tokio::test]
async fn test_failed_kind_keeps_other_reading() {
    let source = FakeSource::new();
    source.fail_kind(MetricKind::Rate);
    let checker = checker(&source);

    let report = checker
        .check(&project("p", 60, &[MetricKind::Allocation, MetricKind::Rate]))
        .await;

    assert_eq!(report.outcome(), CheckOutcome::Partial);
    assert_eq!(report.readings.len(), 1);
    assert_eq!(report.readings[0].metric_kind, MetricKind::Allocation);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].metric_kind, MetricKind::Rate);
}

#[tokio::test]
async fn test_failed_limits_still_emit_usage() {
    let source = FakeSource::new();
    source.fail_limits();
    let checker = checker(&source);

    let report = checker.check(&project("p", 60, &[MetricKind::Allocation])).await;

    assert_eq!(report.outcome(), CheckOutcome::Partial);
    assert!(report.limit_failure.is_some());
    let quota = &report.readings[0].quotas[0];
    assert_eq!(quota.usage, Some(10.0));
    assert_eq!(quota.limit, None);
}

#[tokio::test]
async fn test_no_limit_request_when_all_usage_fails() {
    let source = FakeSource::new();
    source.fail_project("down");
    let checker = checker(&source);

    let report = checker
        .check(&project("down", 60, &[MetricKind::Allocation, MetricKind::Rate]))
        .await;

    assert_eq!(report.outcome(), CheckOutcome::Failed);
    assert!(report.readings.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(source.limit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_api_failure_does_not_stop_ticks() {
    let source = FakeSource::new();
    source.fail_project("broken");
    let sink = RecordingSink::new();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    scheduler.schedule(project("broken", 1, &[MetricKind::Allocation]));
    scheduler.schedule(project("healthy", 1, &[MetricKind::Rate]));
    assert_eq!(scheduler.active_count(), 2);

    tokio::time::sleep(Duration::from_millis(3_500)).await;

    // The failing project keeps being polled on schedule.
    assert!(source.usage_calls("broken") >= 3);
    assert!(sink.checks_for("broken") >= 3);
    assert_eq!(sink.readings_for("broken"), 0);

    // The healthy project is unaffected.
    assert!(sink.readings_for("healthy") >= 3);
    assert!(scheduler.is_scheduled("broken"));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_export_failure_does_not_stop_ticks() {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    sink.fail_exports();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    scheduler.schedule(project("p", 2, &[MetricKind::Allocation]));

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert!(sink.checks_for("p") >= 2);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_intervals_are_independent() {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    scheduler.schedule(project("fast", 1, &[MetricKind::Allocation]));
    scheduler.schedule(project("slow", 10, &[MetricKind::Allocation]));

    tokio::time::sleep(Duration::from_millis(5_500)).await;

    // First tick fires immediately for both.
    assert_eq!(sink.checks_for("slow"), 1);
    assert!(sink.checks_for("fast") >= 5);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_replaces_project() {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    scheduler.schedule(project("p", 1, &[MetricKind::Allocation]));
    scheduler.schedule(project("p", 100, &[MetricKind::Rate]));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.active_count(), 1);

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(sink.checks_for("p"), 1);
    assert!(sink
        .readings()
        .iter()
        .all(|r| r.metric_kind == MetricKind::Rate));

    assert!(scheduler.unschedule("p"));
    assert!(!scheduler.unschedule("p"));
    assert_eq!(scheduler.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_ticks() {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    scheduler.schedule(project("p", 1, &[MetricKind::Allocation]));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    shutdown_tx.send(true).unwrap();
    run.await.unwrap();

    let after_shutdown = sink.checks_for("p");
    assert!(after_shutdown >= 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.checks_for("p"), after_shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_schedules_every_project_in_file() {
    let file = ProjectsFile::new(&format!(
        "project_id,interval,metrics\n{EXAMPLE_PROJECTS}not-a-row\n"
    ));
    let loaded = load_projects(&file.path).unwrap();
    assert_eq!(loaded.rejected.len(), 1);

    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let sink_dyn: Arc<dyn ReadingSink> = sink.clone();

    let mut scheduler = Scheduler::new(checker(&source), sink_dyn);
    for project in loaded.projects {
        scheduler.schedule(project);
    }
    assert_eq!(scheduler.active_count(), 3);

    tokio::time::sleep(Duration::from_secs(301)).await;

    assert_eq!(sink.checks_for("project-alpha-12345"), 2);
    assert_eq!(sink.checks_for("project-beta-67890"), 1);
    assert_eq!(sink.checks_for("project-gamma-11223"), 1);

    scheduler.shutdown().await;
}
