//! Per-call pipeline context.
//!
//! One [`Context`] is created for every `Pipeline::run` and threaded by
//! mutable reference through the whole chain. It is the only per-call
//! mutable state in the pipeline: policies themselves stay stateless and
//! shareable across concurrent calls.

use http::Extensions;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::policy::retry::RetryConfig;

/// Mutable per-call state shared by reference across all policies for one
/// logical call. Never shared across concurrent calls.
#[derive(Debug)]
pub struct Context {
    /// Number of retry attempts performed so far (0 on the first attempt).
    pub retry_count: u32,
    /// Absolute deadline for the whole logical call, including retries.
    pub deadline: Option<Instant>,
    /// Caller-supplied cancellation signal, observed at every suspension
    /// point (backoff sleeps and transport I/O).
    pub cancel: CancellationToken,
    /// Whether the transport should return a streaming body instead of
    /// buffering it.
    pub stream: bool,
    /// Per-call retry configuration override.
    pub retry_override: Option<RetryConfig>,
    /// Open-ended cross-cutting metadata (tracing ids and similar).
    extensions: Extensions,
}

impl Context {
    /// Create a fresh context with no deadline and a detached cancel token.
    pub fn new() -> Self {
        Self {
            retry_count: 0,
            deadline: None,
            cancel: CancellationToken::new(),
            stream: false,
            retry_override: None,
            extensions: Extensions::new(),
        }
    }

    /// Whether the deadline has already passed.
    pub fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Extensible metadata bag.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the metadata bag.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
