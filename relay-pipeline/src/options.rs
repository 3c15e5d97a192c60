//! Per-call request options.
//!
//! [`RequestOptions`] tune one pipeline run without touching the shared
//! pipeline configuration: response streaming, a call deadline, a retry
//! override, extra headers, and a cancellation token.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::policy::retry::RetryConfig;
use crate::PipelineError;

/// Options for a single pipeline run.
///
/// # Example
///
/// ```
/// use relay_pipeline::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .stream(true)
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Return the response body as a lazy chunk stream instead of
    /// buffering it.
    pub stream: bool,
    /// Deadline for the whole logical call, including retries.
    pub timeout: Option<Duration>,
    /// Retry configuration override for this call only.
    pub retry: Option<RetryConfig>,
    /// Extra headers merged into the request (request wins on conflict).
    pub headers: HeaderMap,
    /// Cancellation token observed at every suspension point.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a streaming response body.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry configuration for this call.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Disable retries for this call.
    pub fn no_retry(mut self) -> Self {
        self.retry = Some(RetryConfig::no_retry());
        self
    }

    /// Add a header to merge into the request.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, PipelineError> {
        let name: HeaderName = name
            .parse()
            .map_err(|_| PipelineError::InvalidHeader(format!("invalid header name: {name}")))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| PipelineError::InvalidHeader(format!("invalid header value: {value}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Attach a cancellation token.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
