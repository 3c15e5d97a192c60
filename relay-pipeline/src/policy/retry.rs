//! Retry policy with exponential or linear backoff.
//!
//! The retry system consists of:
//! - [`RetryConfig`]: retry behavior (attempt budget, backoff shape,
//!   total-timeout ceiling, retryable statuses, idempotency override)
//! - [`should_retry`]: the explicit decision function mapping one attempt
//!   outcome to a [`RetryDecision`]
//! - [`RetryPolicy`]: the pipeline policy driving the reattempt loop
//!
//! # Retryable outcomes
//!
//! Transport errors (connection failures, resets, DNS) and the retryable
//! status set (408, 429, 500, 502, 503, 504 by default) are retried.
//! Everything else (auth failures, cancellation, deadline expiry,
//! non-retryable statuses) is surfaced immediately.
//!
//! Non-idempotent methods (POST, PATCH) are never retried unless the
//! request carries an explicit idempotency override or the config opts
//! in. Requests with streaming bodies cannot be replayed and are sent
//! exactly once.
//!
//! When the budget runs out the LAST outcome is returned unchanged (a
//! 503 stays a 503); exhaustion is not an error of its own. The attempt
//! count is exposed via [`Response::retries`].

use std::time::Duration;

use http::{Method, StatusCode};
use tokio::time::Instant;

use crate::context::Context;
use crate::policy::{BoxFuture, Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// Default retry configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default maximum number of retry attempts (not counting the initial
    /// request).
    pub const MAX_RETRIES: u32 = 3;

    /// Default delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_millis(800);

    /// Default maximum delay between retries.
    pub const MAX_DELAY: Duration = Duration::from_secs(60);

    /// Default jitter factor (0.2 means +/- 20%).
    pub const JITTER: f64 = 0.2;

    /// Default retryable status codes.
    pub const RETRY_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];
}

/// Backoff shape between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// `base * 2^attempt`, clamped to `max_delay`.
    #[default]
    Exponential,
    /// `base * (attempt + 1)`, clamped to `max_delay`.
    Linear,
}

/// Configuration for retry behavior.
///
/// # Example
///
/// ```
/// use relay_pipeline::policy::retry::{RetryConfig, RetryMode};
/// use std::time::Duration;
///
/// let config = RetryConfig::new()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(100))
///     .mode(RetryMode::Linear)
///     .total_timeout(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Ceiling on the whole logical call including backoff sleeps. A
    /// retry that would begin after the ceiling is skipped, even when
    /// attempts remain.
    pub total_timeout: Option<Duration>,
    /// Backoff shape.
    pub mode: RetryMode,
    /// Jitter factor between 0.0 and 1.0.
    pub jitter: f64,
    /// Status codes retried when the method allows it.
    pub retry_statuses: Vec<StatusCode>,
    /// Retry non-idempotent methods (POST, PATCH) even without a per-
    /// request override.
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: defaults::BASE_DELAY,
            max_delay: defaults::MAX_DELAY,
            total_timeout: None,
            mode: RetryMode::Exponential,
            jitter: defaults::JITTER,
            retry_statuses: defaults::RETRY_STATUSES
                .iter()
                .filter_map(|&code| StatusCode::from_u16(code).ok())
                .collect(),
            retry_non_idempotent: false,
        }
    }
}

impl RetryConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the maximum number of retry attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the total-timeout ceiling for the whole logical call.
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Set the backoff shape.
    pub fn mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the retryable status set.
    pub fn retry_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.retry_statuses = statuses;
        self
    }

    /// Opt non-idempotent methods into retries.
    pub fn retry_non_idempotent(mut self, retry: bool) -> Self {
        self.retry_non_idempotent = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Whether the status is in the retryable set.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before retry number `attempt` (0-based), with jitter applied
    /// and clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = match self.mode {
            RetryMode::Exponential => base * 2f64.powi(attempt.min(30) as i32),
            RetryMode::Linear => base * (attempt as f64 + 1.0),
        };
        let max = self.max_delay.as_secs_f64();
        let clamped = raw.min(max);

        // Apply jitter: delay * (1 + jitter * random(-1, 1))
        let jittered = if self.jitter > 0.0 {
            let random_factor = rand::random::<f64>() * (self.jitter * 2.0) - self.jitter;
            clamped * (1.0 + random_factor)
        } else {
            clamped
        };

        Duration::from_secs_f64(jittered.min(max).max(0.0))
    }
}

/// Verdict for one attempt outcome.
#[derive(Debug)]
pub enum RetryDecision {
    /// Transient outcome with budget remaining: sleep, then reattempt.
    Retry(Duration),
    /// Transient outcome but the budget (attempts or total timeout) is
    /// spent: return the last outcome as-is.
    GiveUp,
    /// Outcome is not retryable: return it immediately.
    Fail,
}

/// Decide what to do with one attempt outcome.
///
/// `attempt` is the number of retries already performed; `elapsed` the
/// time since the first attempt started.
pub fn should_retry(
    outcome: &Result<Response, PipelineError>,
    attempt: u32,
    elapsed: Duration,
    config: &RetryConfig,
) -> RetryDecision {
    let transient = match outcome {
        Ok(response) => config.is_retryable_status(response.status()),
        Err(error) => error.is_retryable(),
    };
    if !transient {
        return RetryDecision::Fail;
    }
    if attempt >= config.max_retries {
        return RetryDecision::GiveUp;
    }

    let delay = config.delay_for(attempt);
    if let Some(total) = config.total_timeout {
        // The reattempt would begin past the ceiling.
        if elapsed + delay >= total {
            return RetryDecision::GiveUp;
        }
    }
    RetryDecision::Retry(delay)
}

/// Pipeline policy that reissues transient failures with backoff.
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a retry policy with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The configured defaults (overridable per call via
    /// `RequestOptions::retry`).
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

fn method_allows_retry(request: &Request, config: &RetryConfig) -> bool {
    if let Some(explicit) = request.idempotent_override() {
        return explicit;
    }
    if config.retry_non_idempotent {
        return true;
    }
    let m = request.method();
    m == Method::GET
        || m == Method::HEAD
        || m == Method::PUT
        || m == Method::DELETE
        || m == Method::OPTIONS
        || m == Method::TRACE
}

fn annotate(
    outcome: Result<Response, PipelineError>,
    retries: u32,
) -> Result<Response, PipelineError> {
    outcome.map(|mut response| {
        response.set_retries(retries);
        response
    })
}

impl Policy for RetryPolicy {
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            let config = match ctx.retry_override.take() {
                Some(config) => config,
                None => self.config.clone(),
            };
            config
                .validate()
                .map_err(|msg| PipelineError::Config(msg.into()))?;

            let retryable_method = method_allows_retry(&request, &config);
            let started = Instant::now();
            let mut attempt: u32 = 0;
            let mut current = request;

            loop {
                let replay = current.try_clone();
                let outcome = next.run(current, ctx).await;

                // Streaming bodies are forwarded exactly once.
                let decision = if retryable_method && replay.is_some() {
                    should_retry(&outcome, attempt, started.elapsed(), &config)
                } else {
                    RetryDecision::Fail
                };

                let delay = match decision {
                    RetryDecision::Retry(delay) => delay,
                    RetryDecision::GiveUp | RetryDecision::Fail => {
                        return annotate(outcome, attempt);
                    }
                };

                // Skip the reattempt when the per-call deadline would pass
                // before it begins.
                if let Some(deadline) = ctx.deadline {
                    if Instant::now() + delay >= deadline {
                        return annotate(outcome, attempt);
                    }
                }

                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
                ctx.retry_count = attempt;
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient outcome"
                );

                match replay {
                    Some(request) => current = request,
                    // Unreachable: decision is Fail when replay is None.
                    None => return annotate(outcome, attempt),
                }
            }
        })
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config)
    }
}
