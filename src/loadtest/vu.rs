//! Virtual user (VU) task loop.
//!
//! Each VU waits for its start offset on the ramp-up timeline, then runs its
//! thread group's controller: the ordered step sequence, once per iteration,
//! with a private [`VariableScope`]. Samples go to the result sink through a
//! [`SinkHandle`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::loadtest::executor::{RequestExecutor, ThreadInfo};
use crate::loadtest::plan::TestPlan;
use crate::loadtest::scheduler::iterations;
use crate::loadtest::scope::VariableScope;
use crate::loadtest::sink::SinkHandle;

/// Atomic counter tracking the number of currently active virtual users.
///
/// Lightweight wrapper around `Arc<AtomicU32>` for clone-friendly sharing
/// across VU tasks, the scheduler and the result sink.
#[derive(Debug, Clone)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    /// Increments the active VU count by one.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the active VU count by one.
    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current number of active VUs.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one virtual user needs. Built by the scheduler.
#[derive(Debug, Clone)]
pub struct VirtualUser {
    pub plan: Arc<TestPlan>,
    /// Index of the thread group in the plan (0-based).
    pub group_index: usize,
    /// Index of this thread within its group (0-based).
    pub thread_index: u32,
    /// Delay from the group's start before this VU begins.
    pub start_offset: Duration,
    pub executor: RequestExecutor,
    pub sink: SinkHandle,
    pub cancel: CancellationToken,
    pub group_active: ActiveVuCounter,
    pub all_active: ActiveVuCounter,
}

impl VirtualUser {
    /// Thread name as it appears in results: `"<group> <g>-<t>"`, 1-based.
    pub fn thread_name(&self) -> String {
        let group = &self.plan.thread_groups[self.group_index];
        format!(
            "{} {}-{}",
            group.name,
            self.group_index + 1,
            self.thread_index + 1
        )
    }
}

/// Main virtual user task.
///
/// 1. Sleeps until `start_offset` (returns early if the run is cancelled).
/// 2. Runs the controller's step sequence for the computed number of
///    iterations, or until cancelled when the loop is infinite.
/// 3. Checks the cancellation token before each iteration; an in-flight
///    request is never interrupted.
///
/// The active counters are incremented after the start delay and
/// decremented on every exit path after that.
pub async fn vu_loop(vu: VirtualUser) {
    tokio::select! {
        _ = tokio::time::sleep(vu.start_offset) => {}
        _ = vu.cancel.cancelled() => return,
    }

    vu.group_active.increment();
    vu.all_active.increment();

    let completed = vu_loop_inner(&vu).await;
    tracing::debug!(thread = %vu.thread_name(), iterations = completed, "virtual user finished");

    vu.group_active.decrement();
    vu.all_active.decrement();
}

/// Returns the number of completed iterations.
async fn vu_loop_inner(vu: &VirtualUser) -> u64 {
    let group = &vu.plan.thread_groups[vu.group_index];
    let limit = iterations(&group.controller);
    let thread_name = vu.thread_name();
    let mut scope = VariableScope::seeded(&vu.plan.variables);
    let mut completed = 0u64;

    loop {
        if vu.cancel.is_cancelled() {
            return completed;
        }
        if limit.is_some_and(|max| completed >= max) {
            return completed;
        }

        for step in &group.controller.steps {
            let thread = ThreadInfo {
                name: &thread_name,
                group_threads: vu.group_active.get(),
                all_threads: vu.all_active.get(),
            };
            let sample = vu.executor.execute(step, &mut scope, thread).await;
            if !vu.sink.record(sample).await {
                // Writer is gone after a fatal sink error
                return completed;
            }
        }
        completed += 1;
    }
}
