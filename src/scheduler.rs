//! Per-project check scheduling.
//!
//! Every project gets its own task driven by a `tokio::time::interval`.
//! The first tick fires immediately; missed ticks are skipped rather than
//! replayed, so a slow check only delays that project's next tick.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::observability::metrics::ReadingSink;
use crate::projects::ProjectConfig;
use crate::quota::{CheckReport, QuotaChecker};

/// Run one check for a project and hand the readings to the sink.
///
/// Export failures are logged and do not fail the check.
pub async fn check_and_emit(
    checker: &QuotaChecker,
    sink: &dyn ReadingSink,
    project: &ProjectConfig,
) -> CheckReport {
    let report = checker.check(project).await;
    sink.record_check(&report);

    if !report.readings.is_empty() {
        if let Err(e) = sink.emit(&report.readings).await {
            tracing::warn!(
                project_id = %project.project_id,
                check_id = %report.check_id,
                error = %e,
                "Failed to export quota readings"
            );
        }
    }

    tracing::info!(
        project_id = %project.project_id,
        check_id = %report.check_id,
        outcome = report.outcome().as_str(),
        readings = report.readings.len(),
        "Processed project"
    );
    report
}

/// Owns the set of scheduled project tasks.
pub struct Scheduler {
    checker: Arc<QuotaChecker>,
    sink: Arc<dyn ReadingSink>,
    tasks: HashMap<String, JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(checker: Arc<QuotaChecker>, sink: Arc<dyn ReadingSink>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            checker,
            sink,
            tasks: HashMap::new(),
            stop_tx,
        }
    }

    /// Start checking a project on its interval.
    ///
    /// A project already scheduled under the same id is replaced.
    pub fn schedule(&mut self, project: ProjectConfig) {
        let project_id = project.project_id.clone();
        tracing::info!(
            project_id = %project_id,
            interval_secs = project.interval.as_secs(),
            metrics = ?project.metrics,
            "Scheduling project"
        );

        let handle = tokio::spawn(run_project(
            project,
            Arc::clone(&self.checker),
            Arc::clone(&self.sink),
            self.stop_tx.subscribe(),
        ));

        if let Some(old) = self.tasks.insert(project_id.clone(), handle) {
            tracing::info!(project_id = %project_id, "Replacing existing schedule");
            old.abort();
        }
    }

    /// Stop checking a project. Returns false if it was not scheduled.
    pub fn unschedule(&mut self, project_id: &str) -> bool {
        match self.tasks.remove(project_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, project_id: &str) -> bool {
        self.tasks
            .get(project_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|h| !h.is_finished()).count()
    }

    /// Run until `shutdown_rx` fires, then stop every project task.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let already_stopped = *shutdown_rx.borrow();
        if !already_stopped {
            let _ = shutdown_rx.changed().await;
        }
        tracing::info!("Shutdown signal received, stopping scheduler");
        self.shutdown().await;
    }

    /// Signal every project task to stop and wait for them.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        for (project_id, handle) in self.tasks.drain() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(project_id = %project_id, "Project task panicked");
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

async fn run_project(
    project: ProjectConfig,
    checker: Arc<QuotaChecker>,
    sink: Arc<dyn ReadingSink>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(project.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }

        // An in-flight check is abandoned on shutdown.
        tokio::select! {
            _ = check_and_emit(&checker, sink.as_ref(), &project) => {}
            _ = stop_rx.changed() => break,
        }
    }

    tracing::debug!(project_id = %project.project_id, "Project task stopped");
}
