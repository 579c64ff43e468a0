//! Run settings passed explicitly to the engine.
//!
//! Everything that shapes a run but is not part of the plan itself lives
//! here: request timeout, results log location and format, channel sizing,
//! summariser cadence and the optional duration limit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between `summary +` / `summary =` log lines.
pub const DEFAULT_SUMMARISER_INTERVAL: Duration = Duration::from_secs(30);

/// Default capacity of the sample channel feeding the result sink.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Layout of the results log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResultFormat {
    /// Comma-separated values with a JTL-style header row.
    #[default]
    Csv,
    /// One JSON object per line.
    Jsonl,
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        })
    }
}

/// Settings for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Results log path.
    pub output: PathBuf,
    pub format: ResultFormat,
    /// Per-request timeout, covering connect through body read.
    pub timeout: Duration,
    /// Bounded capacity of the sample channel.
    pub channel_capacity: usize,
    /// Cadence of the periodic summariser; `None` disables it.
    pub summariser_interval: Option<Duration>,
    /// Where to persist the plan definition before the run, if anywhere.
    pub plan_out: Option<PathBuf>,
    /// Stop the run after this long even if loops remain.
    pub duration_limit: Option<Duration>,
}

impl RunSettings {
    /// Settings writing results to `output`, with every other field at its default.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            format: ResultFormat::default(),
            timeout: DEFAULT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            summariser_interval: Some(DEFAULT_SUMMARISER_INTERVAL),
            plan_out: None,
            duration_limit: None,
        }
    }

    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Channel capacity is clamped to at least 1.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_summariser_interval(mut self, interval: Option<Duration>) -> Self {
        self.summariser_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_plan_out(mut self, path: Option<PathBuf>) -> Self {
        self.plan_out = path;
        self
    }

    pub fn with_duration_limit(mut self, limit: Option<Duration>) -> Self {
        self.duration_limit = limit;
        self
    }
}

/// Default location of the persisted plan for a given results log:
/// `results.jtl` becomes `results.jtl.plan.toml`.
pub fn default_plan_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".plan.toml");
    PathBuf::from(name)
}
