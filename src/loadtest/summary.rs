//! Terminal summary renderer for load test results.
//!
//! Produces a colorized, human-readable summary with:
//! - A header describing the plan that ran
//! - Dotted-line metric rows (metric.........: value)
//! - Error classification breakdown
//! - A per-label table
//!
//! [`render_summary`] is a pure function returning a [`String`]. Color
//! coding goes through the `colored` crate, which respects the global
//! override set by [`colored::control::set_override(false)`] when
//! `--no-color` is active or stdout is piped.

use colored::Colorize;

use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::plan::TestPlan;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 40;

/// Widest label shown in the per-label table before truncation.
const LABEL_WIDTH: usize = 30;

/// Render the end-of-run summary.
///
/// # Layout
///
/// ```text
///           /\      |  loadplan run
///          /  \     |
///     /\  /    \    |  plan:      Test Plan
///    /  \/      \   |  groups:    1
///   /    \       \  |  threads:   2
///  /      \       \ |  results:   results.jtl
///
///   http_req_duration.......................: avg=45.0ms  min=3ms  max=210ms
///   http_req_percentiles....................: p50=40ms  p90=120ms  p95=150ms  p99=200ms
///   samples.................................: 22
///   ...
/// ```
pub fn render_summary(result: &LoadTestResult, plan: &TestPlan) -> String {
    let snap = &result.snapshot;
    let elapsed_secs = result.elapsed.as_secs_f64();
    let mut lines = Vec::new();

    lines.push(render_header(
        &plan.name,
        plan.thread_groups.len(),
        plan.total_threads(),
        &result.output.display().to_string(),
    ));

    let duration_value = format!(
        "avg={:.1}ms  min={}ms  max={}ms",
        snap.mean, snap.min, snap.max
    );
    lines.push(format_metric_row("http_req_duration", &duration_value, PAD_WIDTH));

    let percentile_value = format!(
        "p50={}ms  p90={}ms  p95={}ms  p99={}ms",
        snap.p50, snap.p90, snap.p95, snap.p99
    );
    let percentile_colored = if snap.p99 < 1000 {
        percentile_value.green().to_string()
    } else {
        percentile_value.yellow().to_string()
    };
    lines.push(format_metric_row(
        "http_req_percentiles",
        &percentile_colored,
        PAD_WIDTH,
    ));

    lines.push(format_metric_row("samples", &snap.total.to_string(), PAD_WIDTH));

    let passed = snap.total - snap.failures;
    lines.push(format_metric_row(
        "samples_passed",
        &passed.to_string().green().to_string(),
        PAD_WIDTH,
    ));

    let failed_str = if snap.failures > 0 {
        snap.failures.to_string().red().to_string()
    } else {
        snap.failures.to_string()
    };
    lines.push(format_metric_row("samples_failed", &failed_str, PAD_WIDTH));

    lines.push(format_metric_row(
        "error_rate",
        &colored_rate(snap.error_rate * 100.0),
        PAD_WIDTH,
    ));

    let throughput = snap.throughput(elapsed_secs);
    lines.push(format_metric_row(
        "throughput",
        &format!("{throughput:.1} req/s").green().to_string(),
        PAD_WIDTH,
    ));

    lines.push(format_metric_row(
        "data_received",
        &format_bytes(snap.bytes),
        PAD_WIDTH,
    ));

    let mut elapsed_value = format!("{elapsed_secs:.1}s");
    if result.stopped_early {
        elapsed_value.push_str(&" (stopped early)".yellow().to_string());
    }
    lines.push(format_metric_row("elapsed", &elapsed_value, PAD_WIDTH));

    if !snap.error_category_counts.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut categories: Vec<_> = snap.error_category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("    {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    if !snap.per_label.is_empty() {
        lines.push(String::new());
        lines.push("  per-label metrics:".to_string());
        lines.push(String::new());
        lines.push(format!(
            "  {:<30} {:>7} {:>9} {:>7} {:>8} {:>7} {:>7}",
            "label", "samples", "rate", "err%", "avg", "p90", "p99"
        ));
        lines.push(format!("  {}", "\u{2500}".repeat(81)));

        for label in &snap.per_label {
            let rate = label.total as f64 / elapsed_secs.max(f64::EPSILON);
            let display_name = if label.label.chars().count() > LABEL_WIDTH {
                let head: String = label.label.chars().take(LABEL_WIDTH - 3).collect();
                format!("{head}...")
            } else {
                label.label.clone()
            };

            let p99_str = format!("{}ms", label.p99);
            let p99_colored = if label.p99 > 1000 {
                p99_str.yellow().to_string()
            } else {
                p99_str.green().to_string()
            };

            lines.push(format!(
                "  {:<30} {:>7} {:>9} {:>7} {:>8} {:>7} {:>7}",
                display_name,
                label.total,
                format!("{rate:.1}/s"),
                colored_rate(label.error_rate * 100.0),
                format!("{:.1}ms", label.mean),
                format!("{}ms", label.p90),
                p99_colored,
            ));
        }
    }

    lines.join("\n")
}

/// Render the ASCII art header with plan details.
fn render_header(plan_name: &str, groups: usize, threads: u32, output: &str) -> String {
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  plan:      {}
   /  \/      \   |  groups:    {}
  /    \       \  |  threads:   {}
 /      \       \ |  results:   {}
"#,
        "loadplan run".bold(),
        plan_name,
        groups,
        threads,
        output,
    )
}

/// Error percentage colored green up to 1%, yellow up to 5%, red above.
fn colored_rate(pct: f64) -> String {
    let text = format!("{pct:.1}%");
    if pct > 5.0 {
        text.red().to_string()
    } else if pct > 1.0 {
        text.yellow().to_string()
    } else {
        text.green().to_string()
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}
