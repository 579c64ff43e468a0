//! Load test execution engine with a single-writer result sink and graceful
//! shutdown.
//!
//! [`LoadTestEngine`] is the top-level orchestrator that:
//! - Validates the plan and optionally persists its definition
//! - Opens the results log before anything is scheduled
//! - Runs the [`Scheduler`] and the [`ResultSink`] writer side by side
//! - Coordinates stopping via one [`CancellationToken`], fired by Ctrl+C,
//!   the optional duration limit, or a fatal sink error

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::executor::SampleResult;
use crate::loadtest::metrics::MetricsSnapshot;
use crate::loadtest::plan::TestPlan;
use crate::loadtest::scheduler::Scheduler;
use crate::loadtest::settings::RunSettings;
use crate::loadtest::sink::{ResultSink, SinkSummary};
use crate::loadtest::vu::ActiveVuCounter;

/// Compile-time Send bounds verification for channel-transported types.
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _check_send_bounds() {
    _assert_send::<SampleResult>();
    _assert_send::<MetricsSnapshot>();
}

/// Top-level load test engine configuration and entry point.
pub struct LoadTestEngine {
    plan: TestPlan,
    settings: RunSettings,
    handle_signals: bool,
}

impl LoadTestEngine {
    /// Creates a new engine for `plan` with explicit run settings.
    pub fn new(plan: TestPlan, settings: RunSettings) -> Self {
        Self {
            plan,
            settings,
            handle_signals: true,
        }
    }

    /// Stop the run after `limit`, even if loops remain (first limit wins).
    pub fn with_duration_limit(mut self, limit: Duration) -> Self {
        self.settings.duration_limit = Some(limit);
        self
    }

    /// Set the summariser cadence; `None` disables periodic summary lines.
    pub fn with_summariser_interval(mut self, interval: Option<Duration>) -> Self {
        self.settings = self.settings.with_summariser_interval(interval);
        self
    }

    /// Whether to install the Ctrl+C handler during [`LoadTestEngine::run`].
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Returns a reference to the engine's plan.
    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Returns a reference to the engine's run settings.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run the load test.
    ///
    /// Configuration and output-creation failures are returned before any
    /// virtual user is scheduled. Failed samples never make this return an
    /// error; a failing results log does, after the run has been stopped and
    /// drained.
    pub async fn run(&self) -> Result<LoadTestResult, LoadTestError> {
        self.plan.validate()?;

        if let Some(path) = &self.settings.plan_out {
            self.plan.save(path)?;
            tracing::info!(path = %path.display(), "plan definition saved");
        }

        let cancel = CancellationToken::new();
        let all_active = ActiveVuCounter::new();
        let (sink_handle, sink) = ResultSink::create(&self.settings, all_active.clone()).await?;

        let plan = Arc::new(self.plan.clone());
        let scheduler = Scheduler::new(plan, &self.settings);

        // Stop conditions other than natural completion; aborted once the run drains
        let ctrl_c = self
            .handle_signals
            .then(|| tokio::spawn(handle_ctrl_c(cancel.clone())));
        let limit = self
            .settings
            .duration_limit
            .map(|limit| tokio::spawn(stop_after(limit, cancel.clone())));

        tracing::info!(
            plan = %self.plan.name,
            groups = self.plan.thread_groups.len(),
            threads = self.plan.total_threads(),
            output = %self.settings.output.display(),
            "load test started"
        );
        let test_start = Instant::now();

        let ((), sink_result) = tokio::join!(
            scheduler.run(sink_handle, cancel.clone(), all_active),
            sink.run(cancel.clone()),
        );
        let elapsed = test_start.elapsed();

        if let Some(task) = ctrl_c {
            task.abort();
        }
        if let Some(task) = limit {
            task.abort();
        }

        let summary = sink_result?;
        let stopped_early = cancel.is_cancelled();
        tracing::info!(
            samples = summary.records_written,
            failures = summary.snapshot.failures,
            elapsed_secs = elapsed.as_secs_f64(),
            stopped_early,
            "load test finished"
        );

        Ok(LoadTestResult {
            stopped_early,
            ..LoadTestResult::from_summary(summary, elapsed)
        })
    }
}

/// Result of a completed load test run.
#[derive(Debug, Clone)]
pub struct LoadTestResult {
    /// Final aggregate over every written sample.
    pub snapshot: MetricsSnapshot,
    /// Total elapsed time of the run.
    pub elapsed: Duration,
    /// Records appended to the results log.
    pub records_written: u64,
    /// Results log path.
    pub output: std::path::PathBuf,
    /// The run was stopped by Ctrl+C or the duration limit before finishing its loops.
    pub stopped_early: bool,
}

impl LoadTestResult {
    /// Builds a result for a run that finished all of its loops.
    pub fn from_summary(summary: SinkSummary, elapsed: Duration) -> Self {
        Self {
            records_written: summary.records_written,
            snapshot: summary.snapshot,
            output: summary.path,
            elapsed,
            stopped_early: false,
        }
    }
}

async fn stop_after(limit: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(limit) => {
            tracing::info!(limit_secs = limit.as_secs_f64(), "duration limit reached, stopping");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C triggers a graceful stop via the cancellation token: no new
/// iterations start, in-flight requests complete and are recorded.
/// Second Ctrl+C performs a hard abort via `std::process::exit(1)`.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}
