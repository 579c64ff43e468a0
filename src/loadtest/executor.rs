//! HTTP request executor.
//!
//! [`RequestExecutor::execute`] turns one [`RequestStep`] into exactly one
//! [`SampleResult`]. Transport failures, bad statuses and failed assertions
//! are all recorded on the sample; nothing here returns an error to the
//! virtual user driving it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::{Serialize, Serializer};

use crate::loadtest::error::SampleError;
use crate::loadtest::plan::RequestStep;
use crate::loadtest::postprocess::{self, ResponseView};
use crate::loadtest::scope::VariableScope;

/// Outcome of one executed request step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    /// Sampler name.
    pub label: String,
    /// `"<group> <g>-<t>"`, 1-based.
    pub thread_name: String,
    /// Wall-clock time the request started.
    pub timestamp: DateTime<Utc>,
    /// Time from sending the request to reading the full response.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Absent when no response was received.
    pub response_code: Option<u16>,
    pub success: bool,
    pub failure_message: Option<String>,
    /// Category of the first failure (`timeout`, `connection`, `request`, `http`, `assertion`).
    pub error_category: Option<&'static str>,
    /// Variables bound by extractors on this step.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extracted: BTreeMap<String, String>,
    /// Request URL after placeholder substitution.
    pub url: String,
    /// Response body size.
    pub bytes: u64,
    /// Active threads in this sample's thread group.
    pub group_threads: u32,
    /// Active threads across all groups.
    pub all_threads: u32,
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl SampleResult {
    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Identity and concurrency figures of the virtual user issuing a request.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo<'a> {
    pub name: &'a str,
    pub group_threads: u32,
    pub all_threads: u32,
}

/// Issues requests for request steps with a shared connection pool.
///
/// Cloning is cheap; all clones share the underlying [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Client,
    timeout: Duration,
}

impl RequestExecutor {
    /// Creates an executor with its own client and the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// Execute `step` once.
    ///
    /// Placeholders in the URL, header values and body are resolved against
    /// `scope` first. When a response arrives, the step's post-processors run
    /// in order; extractors write back into `scope`.
    pub async fn execute(
        &self,
        step: &RequestStep,
        scope: &mut VariableScope,
        thread: ThreadInfo<'_>,
    ) -> SampleResult {
        let sampler = &step.sampler;
        let url = sampler.url(scope);
        let timestamp = Utc::now();
        let start = Instant::now();

        let mut sample = SampleResult {
            label: sampler.name.clone(),
            thread_name: thread.name.to_owned(),
            timestamp,
            elapsed: Duration::ZERO,
            response_code: None,
            success: true,
            failure_message: None,
            error_category: None,
            extracted: BTreeMap::new(),
            url,
            bytes: 0,
            group_threads: thread.group_threads,
            all_threads: thread.all_threads,
        };

        let method = match Method::from_bytes(sampler.method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                record_failure(
                    &mut sample,
                    SampleError::Request {
                        message: format!("invalid method '{}': {e}", sampler.method),
                    },
                );
                return sample;
            },
        };

        let mut request = self
            .client
            .request(method, sample.url.as_str())
            .timeout(self.timeout);
        for (name, value) in &sampler.headers {
            request = request.header(name.as_str(), scope.resolve(value));
        }
        if let Some(body) = &sampler.body {
            request = request.body(scope.resolve(body));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                sample.elapsed = start.elapsed();
                let error = SampleError::classify_reqwest(&e);
                tracing::debug!(label = %sample.label, url = %sample.url, error = %e, "request failed");
                record_failure(&mut sample, error);
                return sample;
            },
        };

        let status = response.status().as_u16();
        sample.response_code = Some(status);
        let headers = render_headers(response.headers());
        let raw = match response.bytes().await {
            Ok(raw) => raw,
            Err(e) => {
                sample.elapsed = start.elapsed();
                record_failure(&mut sample, SampleError::classify_reqwest(&e));
                return sample;
            },
        };
        sample.elapsed = start.elapsed();
        sample.bytes = raw.len() as u64;
        let body = String::from_utf8_lossy(&raw);

        if !(200..=399).contains(&status) && !step.ignores_status() {
            record_failure(&mut sample, SampleError::Http { status });
        }

        let view = ResponseView {
            status,
            body: &body,
            headers: &headers,
        };
        for post_processor in &step.post_processors {
            if let Some(error) = postprocess::apply(post_processor, &view, scope, &mut sample.extracted)
            {
                record_failure(&mut sample, error);
            }
        }

        tracing::trace!(
            label = %sample.label,
            status,
            elapsed_ms = sample.elapsed_ms(),
            success = sample.success,
            "sample complete"
        );
        sample
    }
}

/// Mark `sample` failed. The first failure sets the category; messages accumulate.
fn record_failure(sample: &mut SampleResult, error: SampleError) {
    sample.success = false;
    if sample.error_category.is_none() {
        sample.error_category = Some(error.error_category());
    }
    let message = error.to_string();
    sample.failure_message = Some(match sample.failure_message.take() {
        Some(existing) => format!("{existing}; {message}"),
        None => message,
    });
}

fn render_headers(headers: &reqwest::header::HeaderMap) -> String {
    let mut rendered = String::new();
    for (name, value) in headers {
        rendered.push_str(name.as_str());
        rendered.push_str(": ");
        rendered.push_str(&String::from_utf8_lossy(value.as_bytes()));
        rendered.push('\n');
    }
    rendered
}
