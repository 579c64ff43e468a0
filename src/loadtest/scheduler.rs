//! Thread-group scheduling on the ramp-up timeline.
//!
//! [`Scheduler::run`] spawns one virtual user task per thread on a
//! [`TaskTracker`]. Within a group, thread `i` of `N` starts at
//! `ramp_up * i / N` after the group starts. Groups start together unless
//! the plan serializes them, in which case each group starts when the
//! previous one has fully finished.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::loadtest::executor::RequestExecutor;
use crate::loadtest::plan::{Controller, ControllerKind, TestPlan};
use crate::loadtest::settings::RunSettings;
use crate::loadtest::sink::SinkHandle;
use crate::loadtest::vu::{vu_loop, ActiveVuCounter, VirtualUser};

/// Start offsets for `threads` threads spread evenly over `ramp_up`.
///
/// Offsets are non-decreasing, the first is zero and all lie in
/// `[0, ramp_up)` when `ramp_up` is non-zero.
pub fn start_offsets(threads: u32, ramp_up: Duration) -> Vec<Duration> {
    if threads == 0 {
        return Vec::new();
    }
    let ramp_nanos = ramp_up.as_nanos();
    (0..threads)
        .map(|i| {
            let nanos = ramp_nanos * u128::from(i) / u128::from(threads);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        })
        .collect()
}

/// Number of step-sequence invocations per thread: `loops`, plus one when
/// `run_first` is set. `None` for an infinite loop.
pub fn iterations(controller: &Controller) -> Option<u64> {
    match controller.kind {
        ControllerKind::Loop {
            infinite: true, ..
        } => None,
        ControllerKind::Loop {
            loops, run_first, ..
        } => Some(u64::from(loops) + u64::from(run_first)),
    }
}

/// Spawns and drives the virtual users of a plan.
pub struct Scheduler {
    plan: Arc<TestPlan>,
    executor: RequestExecutor,
}

impl Scheduler {
    pub fn new(plan: Arc<TestPlan>, settings: &RunSettings) -> Self {
        Self {
            plan,
            executor: RequestExecutor::new(settings.timeout),
        }
    }

    /// Run every thread group to completion or until `cancel` fires.
    ///
    /// Consumes `sink`; once this returns, every handle clone has been
    /// dropped and the sink writer can finish.
    pub async fn run(&self, sink: SinkHandle, cancel: CancellationToken, all_active: ActiveVuCounter) {
        if self.plan.serialize_thread_groups {
            for group_index in 0..self.plan.thread_groups.len() {
                if cancel.is_cancelled() {
                    break;
                }
                let tracker = TaskTracker::new();
                self.spawn_group(&tracker, group_index, &sink, &cancel, &all_active);
                tracker.close();
                tracker.wait().await;
            }
        } else {
            let tracker = TaskTracker::new();
            for group_index in 0..self.plan.thread_groups.len() {
                self.spawn_group(&tracker, group_index, &sink, &cancel, &all_active);
            }
            tracker.close();
            tracker.wait().await;
        }
    }

    fn spawn_group(
        &self,
        tracker: &TaskTracker,
        group_index: usize,
        sink: &SinkHandle,
        cancel: &CancellationToken,
        all_active: &ActiveVuCounter,
    ) {
        let group = &self.plan.thread_groups[group_index];
        let offsets = start_offsets(group.threads, Duration::from_secs(group.ramp_up_secs));
        let group_active = ActiveVuCounter::new();

        tracing::info!(
            group = %group.name,
            threads = group.threads,
            ramp_up_secs = group.ramp_up_secs,
            iterations = ?iterations(&group.controller),
            "starting thread group"
        );

        for (thread_index, start_offset) in (0u32..).zip(offsets) {
            tracker.spawn(vu_loop(VirtualUser {
                plan: self.plan.clone(),
                group_index,
                thread_index,
                start_offset,
                executor: self.executor.clone(),
                sink: sink.clone(),
                cancel: cancel.clone(),
                group_active: group_active.clone(),
                all_active: all_active.clone(),
            }));
        }
    }
}
