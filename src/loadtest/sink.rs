//! Result sink: the single writer of the results log.
//!
//! Virtual users hold cloned [`SinkHandle`]s and push [`SampleResult`]s into a
//! bounded mpsc channel. One [`ResultSink`] task owns the output file and the
//! running [`MetricsRecorder`]; it formats each sample into one line and
//! writes it whole, so records never interleave.
//!
//! The sink also acts as the summariser: every `summariser_interval` it logs
//! a `summary +` line for the samples since the previous tick and a
//! `summary =` line for the whole run so far.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::executor::SampleResult;
use crate::loadtest::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::loadtest::settings::{ResultFormat, RunSettings};
use crate::loadtest::vu::ActiveVuCounter;

/// Header row of the CSV results log.
pub const CSV_HEADER: &str =
    "timeStamp,elapsed,label,responseCode,threadName,success,failureMessage,bytes,grpThreads,allThreads,URL";

/// Producer side of the sink. Cheap to clone; one per virtual user.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SampleResult>,
}

impl SinkHandle {
    /// Hand a sample to the writer, waiting for channel capacity.
    ///
    /// Returns `false` if the writer has stopped (after a write failure).
    pub async fn record(&self, sample: SampleResult) -> bool {
        self.tx.send(sample).await.is_ok()
    }
}

/// What the sink wrote, returned once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub records_written: u64,
    pub snapshot: MetricsSnapshot,
}

/// Consumer side of the sink. Owns the results log.
pub struct ResultSink {
    rx: mpsc::Receiver<SampleResult>,
    writer: BufWriter<File>,
    path: PathBuf,
    format: ResultFormat,
    summariser_interval: Option<Duration>,
    active_threads: ActiveVuCounter,
}

impl ResultSink {
    /// Open (truncate) the results log and write its header.
    ///
    /// Fails with [`LoadTestError::Sink`] if the file cannot be created; the
    /// engine calls this before any virtual user is scheduled.
    pub async fn create(
        settings: &RunSettings,
        active_threads: ActiveVuCounter,
    ) -> Result<(SinkHandle, ResultSink), LoadTestError> {
        let path = settings.output.clone();
        let sink_error = |source| LoadTestError::Sink {
            source,
            path: path.display().to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(sink_error)?;
        }
        let file = File::create(&path).await.map_err(sink_error)?;
        let mut writer = BufWriter::new(file);
        if settings.format == ResultFormat::Csv {
            writer
                .write_all(format!("{CSV_HEADER}\n").as_bytes())
                .await
                .map_err(sink_error)?;
        }

        let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
        tracing::debug!(path = %path.display(), format = %settings.format, "result sink opened");

        Ok((
            SinkHandle { tx },
            ResultSink {
                rx,
                writer,
                path,
                format: settings.format,
                summariser_interval: settings.summariser_interval,
                active_threads,
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write samples until every [`SinkHandle`] is dropped, then flush.
    ///
    /// On a write failure the run is stopped through `cancel`, whatever is
    /// buffered is flushed on a best-effort basis, and the error is returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SinkSummary, LoadTestError> {
        let mut total = MetricsRecorder::new();
        let mut delta = MetricsRecorder::new();
        let run_start = Instant::now();
        let mut window_start = run_start;
        let mut records_written = 0u64;

        let period = self.summariser_interval.unwrap_or(Duration::from_secs(3600));
        let mut tick = tokio::time::interval_at(run_start + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = tick.tick(), if self.summariser_interval.is_some() => {
                    let now = Instant::now();
                    self.log_summary(&delta, now - window_start, &total, now - run_start);
                    delta = MetricsRecorder::new();
                    window_start = now;
                }
                received = self.rx.recv() => {
                    let Some(sample) = received else { break };
                    if let Err(source) = self.write_record(&sample).await {
                        tracing::error!(path = %self.path.display(), error = %source, "result sink write failed, stopping run");
                        cancel.cancel();
                        self.rx.close();
                        let _ = self.writer.flush().await;
                        return Err(self.error(source));
                    }
                    records_written += 1;
                    total.record(&sample);
                    delta.record(&sample);
                }
            }
        }

        if let Err(source) = self.writer.flush().await {
            cancel.cancel();
            return Err(self.error(source));
        }

        if self.summariser_interval.is_some() && delta.total() > 0 {
            let now = Instant::now();
            self.log_summary(&delta, now - window_start, &total, now - run_start);
        }
        tracing::debug!(records_written, path = %self.path.display(), "result sink closed");

        Ok(SinkSummary {
            path: self.path,
            records_written,
            snapshot: total.snapshot(),
        })
    }

    async fn write_record(&mut self, sample: &SampleResult) -> std::io::Result<()> {
        let line = match self.format {
            ResultFormat::Csv => format_csv_line(sample),
            ResultFormat::Jsonl => format_json_line(sample)?,
        };
        self.writer.write_all(line.as_bytes()).await
    }

    fn log_summary(
        &self,
        delta: &MetricsRecorder,
        delta_window: Duration,
        total: &MetricsRecorder,
        total_window: Duration,
    ) {
        let active = self.active_threads.get();
        if delta.total() > 0 {
            tracing::info!(
                target: "loadplan::summariser",
                "{}",
                summariser_line('+', &delta.snapshot(), delta_window, active)
            );
        }
        tracing::info!(
            target: "loadplan::summariser",
            "{}",
            summariser_line('=', &total.snapshot(), total_window, active)
        );
    }

    fn error(&self, source: std::io::Error) -> LoadTestError {
        LoadTestError::Sink {
            source,
            path: self.path.display().to_string(),
        }
    }
}

/// One CSV record, newline-terminated.
pub fn format_csv_line(sample: &SampleResult) -> String {
    let response_code = sample
        .response_code
        .map(|c| c.to_string())
        .unwrap_or_default();
    format!(
        "{},{},{},{},{},{},{},{},{},{},{}\n",
        sample.timestamp.timestamp_millis(),
        sample.elapsed_ms(),
        csv_escape(&sample.label),
        response_code,
        csv_escape(&sample.thread_name),
        sample.success,
        csv_escape(sample.failure_message.as_deref().unwrap_or("")),
        sample.bytes,
        sample.group_threads,
        sample.all_threads,
        csv_escape(&sample.url),
    )
}

/// One JSON object, newline-terminated.
pub fn format_json_line(sample: &SampleResult) -> std::io::Result<String> {
    let mut line = serde_json::to_string(sample).map_err(std::io::Error::other)?;
    line.push('\n');
    Ok(line)
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Render a summariser line, e.g.
/// `summary +     20 in 00:00:05 =    4.0/s Avg:    12 Min:     3 Max:    40 Err:     0 (0.00%) Active: 2`.
pub fn summariser_line(sign: char, snap: &MetricsSnapshot, window: Duration, active: u32) -> String {
    let secs = window.as_secs();
    format!(
        "summary {sign} {:>6} in {:02}:{:02}:{:02} = {:>6.1}/s Avg: {:>5} Min: {:>5} Max: {:>5} Err: {:>5} ({:.2}%) Active: {active}",
        snap.total,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        snap.throughput(window.as_secs_f64()),
        snap.mean.round() as u64,
        snap.min,
        snap.max,
        snap.failures,
        snap.error_rate * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn sample(label: &str, success: bool) -> SampleResult {
        SampleResult {
            label: label.to_string(),
            thread_name: "Group 1-1".to_string(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            elapsed: Duration::from_millis(42),
            response_code: Some(if success { 200 } else { 500 }),
            success,
            failure_message: (!success).then(|| "HTTP 500".to_string()),
            error_category: (!success).then_some("http"),
            extracted: BTreeMap::new(),
            url: "http://localhost/a".to_string(),
            bytes: 12,
            group_threads: 2,
            all_threads: 3,
        }
    }

    #[test]
    fn test_csv_line_layout() {
        let line = format_csv_line(&sample("home", true));
        assert_eq!(
            line,
            "1700000000123,42,home,200,Group 1-1,true,,12,2,3,http://localhost/a\n"
        );
    }

    #[test]
    fn test_csv_line_escapes_fields() {
        let mut s = sample("a, \"quoted\" label", false);
        s.failure_message = Some("line one\nline two".to_string());
        s.response_code = None;
        let line = format_csv_line(&s);
        assert!(line.contains("\"a, \"\"quoted\"\" label\""), "{line}");
        assert!(line.contains("\"line one\nline two\""), "{line}");
        assert!(line.contains(",,Group 1-1,false,"), "{line}");
    }

    #[test]
    fn test_json_line_is_single_object() {
        let line = format_json_line(&sample("home", false)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["label"], "home");
        assert_eq!(value["success"], false);
        assert_eq!(value["error_category"], "http");
    }

    #[test]
    fn test_summariser_line_format() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&sample("a", true));
        recorder.record(&sample("a", false));
        let line = summariser_line('+', &recorder.snapshot(), Duration::from_secs(65), 4);
        assert!(line.starts_with("summary +      2 in 00:01:05 ="), "{line}");
        assert!(line.contains("Err:     1 (50.00%)"), "{line}");
        assert!(line.ends_with("Active: 4"), "{line}");
    }

    #[tokio::test]
    async fn test_sink_writes_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RunSettings::new(dir.path().join("nested/results.jtl"));
        let (handle, sink) = ResultSink::create(&settings, ActiveVuCounter::new())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(sink.run(cancel.clone()));

        for i in 0..5 {
            assert!(handle.record(sample(&format!("s{i}"), i % 2 == 0)).await);
        }
        drop(handle);

        let summary = writer.await.unwrap().unwrap();
        assert_eq!(summary.records_written, 5);
        assert_eq!(summary.snapshot.total, 5);
        assert_eq!(summary.snapshot.failures, 2);
        assert!(!cancel.is_cancelled());

        let content = std::fs::read_to_string(&summary.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_sink_jsonl_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            RunSettings::new(dir.path().join("results.jsonl")).with_format(ResultFormat::Jsonl);
        let (handle, sink) = ResultSink::create(&settings, ActiveVuCounter::new())
            .await
            .unwrap();
        let writer = tokio::spawn(sink.run(CancellationToken::new()));
        handle.record(sample("a", true)).await;
        drop(handle);

        let summary = writer.await.unwrap().unwrap();
        let content = std::fs::read_to_string(&summary.path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with('{'));
    }

    #[tokio::test]
    async fn test_create_fails_for_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let settings = RunSettings::new(blocker.join("results.jtl"));
        let err = ResultSink::create(&settings, ActiveVuCounter::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LoadTestError::Sink { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_write_failure_cancels_run() {
        let settings = RunSettings::new("/dev/full");
        let (handle, sink) = ResultSink::create(&settings, ActiveVuCounter::new())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(sink.run(cancel.clone()));
        handle.record(sample("a", true)).await;
        drop(handle);

        let err = writer.await.unwrap().unwrap_err();
        assert!(matches!(err, LoadTestError::Sink { .. }));
        assert!(cancel.is_cancelled());
    }
}
