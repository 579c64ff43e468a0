//! Error types for the load testing engine.
//!
//! Defines [`LoadTestError`] for failures that stop a run (bad plan, unwritable
//! output) and [`SampleError`] for per-request failures that are recorded as
//! data on a sample and never abort the run.

/// Errors that prevent a load test from starting or force it to stop.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the plan file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse plan TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// JSON parse failure for plans stored as `.json`.
    #[error("Failed to parse plan JSON: {source}")]
    ConfigJson {
        #[from]
        source: serde_json::Error,
    },

    /// Semantic validation failure -- the plan parsed successfully but
    /// contains invalid values (e.g., zero threads, malformed URL).
    #[error("Plan validation error: {message}")]
    ConfigValidation { message: String },

    /// The plan could not be rendered to TOML or JSON.
    #[error("Failed to serialize plan: {message}")]
    ConfigSerialize { message: String },

    /// File I/O failure while reading or persisting a plan.
    #[error("Failed to access plan file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The result sink could not write to its output.
    #[error("Failed to write results to '{path}': {source}")]
    Sink {
        source: std::io::Error,
        path: String,
    },
}

impl LoadTestError {
    /// Shorthand for a [`LoadTestError::ConfigValidation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Returns `true` for the configuration variants, which are always
    /// raised before any virtual user is scheduled.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::ConfigJson { .. }
                | Self::ConfigValidation { .. }
                | Self::ConfigSerialize { .. }
                | Self::ConfigIo { .. }
        )
    }
}

/// Per-sample failure recorded on a [`SampleResult`](crate::loadtest::executor::SampleResult).
///
/// Each variant represents a distinct category that the metrics pipeline
/// counts and reports separately.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    /// The request exceeded the configured per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Any other transport failure (invalid URL after substitution, body read).
    #[error("Request error: {message}")]
    Request { message: String },

    /// The server answered with a status outside 200..=399.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// A response assertion did not hold.
    #[error("Assertion failed: {message}")]
    Assertion { message: String },
}

impl SampleError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"timeout"`, `"connection"`, `"request"`, `"http"`, `"assertion"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Request { .. } => "request",
            Self::Http { .. } => "http",
            Self::Assertion { .. } => "assertion",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`SampleError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Request {
                message: err.to_string(),
            }
        }
    }
}
