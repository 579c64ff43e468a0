//! HdrHistogram-based aggregate metrics over recorded samples.
//!
//! Provides [`MetricsRecorder`] for folding [`SampleResult`]s into running
//! totals, a latency histogram and a per-label breakdown.
//!
//! # Design
//!
//! - **Single-owner**: No `Arc<Mutex>`. The result sink's writer task owns
//!   the recorder and is the only thing that feeds it.
//! - **All samples in one histogram**: elapsed times of passed and failed
//!   samples are aggregated together, as the results log reports them.
//! - **Millisecond resolution**: matches the `elapsed` column of the log.

use std::collections::BTreeMap;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::loadtest::executor::SampleResult;

/// Latency and error aggregates for one label (or for the whole run).
struct LabelMetrics {
    histogram: Histogram<u64>,
    total: u64,
    failures: u64,
    bytes: u64,
    error_category_counts: BTreeMap<String, u64>,
}

impl LabelMetrics {
    fn new() -> Self {
        let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
        histogram.auto(true);

        Self {
            histogram,
            total: 0,
            failures: 0,
            bytes: 0,
            error_category_counts: BTreeMap::new(),
        }
    }

    fn record(&mut self, sample: &SampleResult) {
        let _ = self.histogram.record(sample.elapsed_ms());
        self.total += 1;
        self.bytes += sample.bytes;
        if !sample.success {
            self.failures += 1;
            let category = sample.error_category.unwrap_or("unknown");
            *self
                .error_category_counts
                .entry(category.to_owned())
                .or_insert(0) += 1;
        }
    }

    fn quantile(&self, q: f64) -> u64 {
        if self.histogram.is_empty() {
            return 0;
        }
        self.histogram.value_at_quantile(q)
    }

    fn snapshot(&self, label: &str) -> LabelSnapshot {
        let empty = self.histogram.is_empty();
        LabelSnapshot {
            label: label.to_owned(),
            total: self.total,
            failures: self.failures,
            error_rate: ratio(self.failures, self.total),
            mean: if empty { 0.0 } else { self.histogram.mean() },
            min: if empty { 0 } else { self.histogram.min() },
            max: if empty { 0 } else { self.histogram.max() },
            p50: self.quantile(0.50),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
            bytes: self.bytes,
            error_categories: self.error_category_counts.clone(),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Aggregates for a single label. All latency values are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelSnapshot {
    pub label: String,
    pub total: u64,
    pub failures: u64,
    /// Fraction of failed samples (0.0..=1.0).
    pub error_rate: f64,
    pub mean: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub bytes: u64,
    pub error_categories: BTreeMap<String, u64>,
}

/// Point-in-time snapshot of all metrics state.
///
/// Captured via [`MetricsRecorder::snapshot`]. All latency values are in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Total samples recorded.
    pub total: u64,
    /// Samples with `success == false`.
    pub failures: u64,
    /// Fraction of failed samples (0.0..=1.0).
    pub error_rate: f64,
    pub mean: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    /// Total response bytes received.
    pub bytes: u64,
    /// Failure counts by category (timeout, connection, request, http, assertion).
    pub error_category_counts: BTreeMap<String, u64>,
    /// Per-label aggregates, sorted by label.
    pub per_label: Vec<LabelSnapshot>,
}

impl MetricsSnapshot {
    /// Samples per second over `elapsed_secs`.
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs > 0.0 {
            self.total as f64 / elapsed_secs
        } else {
            0.0
        }
    }
}

/// HdrHistogram-backed running aggregate of [`SampleResult`]s.
///
/// Designed for single-owner usage; no internal locking.
///
/// # Example
///
/// ```
/// use loadplan::loadtest::metrics::MetricsRecorder;
///
/// let recorder = MetricsRecorder::new();
/// assert_eq!(recorder.total(), 0);
/// assert_eq!(recorder.snapshot().p50, 0);
/// ```
pub struct MetricsRecorder {
    overall: LabelMetrics,
    per_label: BTreeMap<String, LabelMetrics>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Create an empty recorder. Histograms use 3 significant figures and
    /// auto-resize.
    pub fn new() -> Self {
        Self {
            overall: LabelMetrics::new(),
            per_label: BTreeMap::new(),
        }
    }

    /// Fold one sample into the overall and per-label aggregates.
    pub fn record(&mut self, sample: &SampleResult) {
        self.overall.record(sample);
        match self.per_label.get_mut(&sample.label) {
            Some(label) => label.record(sample),
            None => {
                let mut label = LabelMetrics::new();
                label.record(sample);
                self.per_label.insert(sample.label.clone(), label);
            },
        }
    }

    /// Total number of samples recorded.
    pub fn total(&self) -> u64 {
        self.overall.total
    }

    /// Number of failed samples recorded.
    pub fn failures(&self) -> u64 {
        self.overall.failures
    }

    /// Failure fraction (0.0..=1.0). Returns 0.0 if nothing was recorded.
    pub fn error_rate(&self) -> f64 {
        ratio(self.overall.failures, self.overall.total)
    }

    /// Mean elapsed time in milliseconds. Returns 0.0 if nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.overall.histogram.is_empty() {
            return 0.0;
        }
        self.overall.histogram.mean()
    }

    /// Latency P50 in milliseconds. Returns 0 if no samples recorded.
    pub fn p50(&self) -> u64 {
        self.overall.quantile(0.50)
    }

    /// Latency P90 in milliseconds. Returns 0 if no samples recorded.
    pub fn p90(&self) -> u64 {
        self.overall.quantile(0.90)
    }

    /// Latency P95 in milliseconds. Returns 0 if no samples recorded.
    pub fn p95(&self) -> u64 {
        self.overall.quantile(0.95)
    }

    /// Latency P99 in milliseconds. Returns 0 if no samples recorded.
    pub fn p99(&self) -> u64 {
        self.overall.quantile(0.99)
    }

    /// Samples recorded under `label`.
    pub fn label_count(&self, label: &str) -> u64 {
        self.per_label.get(label).map_or(0, |m| m.total)
    }

    /// Capture a point-in-time snapshot of all metrics.
    ///
    /// The snapshot is a self-contained value that can be sent across threads
    /// or serialized without holding a reference to the recorder.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let overall = self.overall.snapshot("");
        let per_label = self
            .per_label
            .iter()
            .map(|(label, metrics)| metrics.snapshot(label))
            .collect();

        MetricsSnapshot {
            total: overall.total,
            failures: overall.failures,
            error_rate: overall.error_rate,
            mean: overall.mean,
            min: overall.min,
            max: overall.max,
            p50: overall.p50,
            p90: overall.p90,
            p95: overall.p95,
            p99: overall.p99,
            bytes: overall.bytes,
            error_category_counts: overall.error_categories,
            per_label,
        }
    }
}
