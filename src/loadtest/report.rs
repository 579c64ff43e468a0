//! JSON report serialization for load test results.
//!
//! Produces a schema-versioned JSON summary containing latency percentiles,
//! throughput, error classification and a per-label breakdown, alongside the
//! plan shape that produced them. Designed for CI/CD pipeline consumption.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::metrics::LabelSnapshot;
use crate::loadtest::plan::TestPlan;
use crate::loadtest::scheduler::iterations;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON report structure.
#[derive(Debug, Serialize)]
pub struct LoadTestReport {
    /// Report format version for parser compatibility.
    pub schema_version: String,
    /// RFC 3339 timestamp when the report was generated.
    pub timestamp: String,
    pub plan_name: String,
    /// Results log the samples were written to.
    pub results_file: String,
    /// Actual run duration in seconds.
    pub duration_secs: f64,
    pub stopped_early: bool,
    pub thread_groups: Vec<ReportThreadGroup>,
    pub metrics: ReportMetrics,
    /// Failure counts by category.
    pub errors: BTreeMap<String, u64>,
    /// Per-label metrics keyed by sampler name.
    pub per_label: BTreeMap<String, LabelReportMetrics>,
}

/// Shape of one thread group as it was scheduled.
#[derive(Debug, Serialize)]
pub struct ReportThreadGroup {
    pub name: String,
    pub threads: u32,
    pub ramp_up_secs: u64,
    /// Step-sequence invocations per thread; `None` when looping until stopped.
    pub iterations: Option<u64>,
    pub steps: Vec<String>,
}

/// Aggregate metrics in the report.
#[derive(Debug, Serialize)]
pub struct ReportMetrics {
    pub total_samples: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Error rate as a fraction (0.0..=1.0).
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub bytes_received: u64,
    pub latency: LatencyMetrics,
}

/// Latency metrics in milliseconds.
#[derive(Debug, Serialize)]
pub struct LatencyMetrics {
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Per-label metrics for JSON report output.
#[derive(Debug, Serialize)]
pub struct LabelReportMetrics {
    pub total_samples: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub latency: LatencyMetrics,
    pub errors: BTreeMap<String, u64>,
}

impl LatencyMetrics {
    fn from_label(label: &LabelSnapshot) -> Self {
        Self {
            mean_ms: label.mean,
            min_ms: label.min,
            max_ms: label.max,
            p50_ms: label.p50,
            p90_ms: label.p90,
            p95_ms: label.p95,
            p99_ms: label.p99,
        }
    }
}

impl LoadTestReport {
    /// Build a report from a finished run and the plan that produced it.
    pub fn from_result(result: &LoadTestResult, plan: &TestPlan) -> Self {
        let snap = &result.snapshot;
        let elapsed_secs = result.elapsed.as_secs_f64();

        let thread_groups = plan
            .thread_groups
            .iter()
            .map(|group| ReportThreadGroup {
                name: group.name.clone(),
                threads: group.threads,
                ramp_up_secs: group.ramp_up_secs,
                iterations: iterations(&group.controller),
                steps: group
                    .controller
                    .steps
                    .iter()
                    .map(|s| s.name().to_owned())
                    .collect(),
            })
            .collect();

        let per_label = snap
            .per_label
            .iter()
            .map(|label| {
                (
                    label.label.clone(),
                    LabelReportMetrics {
                        total_samples: label.total,
                        success_count: label.total - label.failures,
                        error_count: label.failures,
                        error_rate: label.error_rate,
                        throughput_rps: if elapsed_secs > 0.0 {
                            label.total as f64 / elapsed_secs
                        } else {
                            0.0
                        },
                        latency: LatencyMetrics::from_label(label),
                        errors: label.error_categories.clone(),
                    },
                )
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            plan_name: plan.name.clone(),
            results_file: result.output.display().to_string(),
            duration_secs: elapsed_secs,
            stopped_early: result.stopped_early,
            thread_groups,
            metrics: ReportMetrics {
                total_samples: snap.total,
                success_count: snap.total - snap.failures,
                error_count: snap.failures,
                error_rate: snap.error_rate,
                throughput_rps: snap.throughput(elapsed_secs),
                bytes_received: snap.bytes,
                latency: LatencyMetrics {
                    mean_ms: snap.mean,
                    min_ms: snap.min,
                    max_ms: snap.max,
                    p50_ms: snap.p50,
                    p90_ms: snap.p90,
                    p95_ms: snap.p95,
                    p99_ms: snap.p99,
                },
            },
            errors: snap.error_category_counts.clone(),
            per_label,
        }
    }
}

/// Write the report as pretty-printed JSON to `path`, creating parent
/// directories as needed.
pub fn write_report(report: &LoadTestReport, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
