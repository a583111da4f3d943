//! Ordered, idempotent session teardown.
//!
//! Steps run strictly one after another; a failing step is logged and
//! skipped so that, for example, a camera that refuses to close never keeps
//! the transport connection alive. Only the first `run` performs work;
//! concurrent and later callers wait for and receive the same report.

use crate::errors::SessionError;
use crate::observability::metrics;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    ReleaseScreen,
    UnpublishAll,
    ReleaseCamera,
    ReleaseMicrophone,
    LeaveTransport,
    ClearCredentials,
    ResetUi,
}

impl TeardownStep {
    /// Execution order.
    pub const SEQUENCE: [TeardownStep; 7] = [
        TeardownStep::ReleaseScreen,
        TeardownStep::UnpublishAll,
        TeardownStep::ReleaseCamera,
        TeardownStep::ReleaseMicrophone,
        TeardownStep::LeaveTransport,
        TeardownStep::ClearCredentials,
        TeardownStep::ResetUi,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::ReleaseScreen => "release_screen",
            TeardownStep::UnpublishAll => "unpublish_all",
            TeardownStep::ReleaseCamera => "release_camera",
            TeardownStep::ReleaseMicrophone => "release_microphone",
            TeardownStep::LeaveTransport => "leave_transport",
            TeardownStep::ClearCredentials => "clear_credentials",
            TeardownStep::ResetUi => "reset_ui",
        }
    }
}

/// Outcome of a teardown.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TeardownReport {
    pub completed: Vec<TeardownStep>,
    /// Failed steps with the error text.
    pub failed: Vec<(TeardownStep, String)>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn failed_steps(&self) -> Vec<TeardownStep> {
        self.failed.iter().map(|(step, _)| *step).collect()
    }
}

/// What a teardown operates on.
#[async_trait]
pub trait TeardownTarget: Send {
    async fn run_step(&mut self, step: TeardownStep) -> Result<(), SessionError>;
}

/// Runs the teardown sequence at most once.
#[derive(Debug)]
pub struct TeardownCoordinator {
    started: AtomicBool,
    completed: watch::Sender<Option<TeardownReport>>,
}

impl Default for TeardownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TeardownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (completed, _) = watch::channel(None);
        Self {
            started: AtomicBool::new(false),
            completed,
        }
    }

    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Report of the finished teardown, if it has finished.
    #[must_use]
    pub fn report(&self) -> Option<TeardownReport> {
        self.completed.borrow().clone()
    }

    /// Run the sequence against `target`, or wait for the run already in
    /// progress and return its report.
    #[instrument(skip_all, name = "classroom.lifecycle.teardown")]
    pub async fn run<T>(&self, target: &mut T) -> TeardownReport
    where
        T: TeardownTarget + ?Sized,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return self.wait().await;
        }

        let started_at = Instant::now();
        let mut report = TeardownReport::default();

        for step in TeardownStep::SEQUENCE {
            match target.run_step(step).await {
                Ok(()) => report.completed.push(step),
                Err(e) => {
                    warn!(
                        target: "classroom.lifecycle.teardown",
                        step = step.as_str(),
                        error = %e,
                        "Teardown step failed, continuing"
                    );
                    metrics::record_teardown_step_failure(step.as_str());
                    report.failed.push((step, e.to_string()));
                }
            }
        }

        let elapsed = started_at.elapsed();
        metrics::record_teardown_duration(elapsed);
        info!(
            target: "classroom.lifecycle.teardown",
            completed = report.completed.len(),
            failed = report.failed.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Teardown finished"
        );

        self.completed.send_replace(Some(report.clone()));
        report
    }

    async fn wait(&self) -> TeardownReport {
        let mut rx = self.completed.subscribe();
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => report.clone().unwrap_or_default(),
            Err(_) => TeardownReport::default(),
        };
        report
    }
}
