//! Pipeline assembly.
//!
//! [`PipelineBuilder`] wires the canonical policy order:
//!
//! ```text
//! user-agent -> custom... -> redirect -> retry -> credential -> transport
//! ```
//!
//! The credential policy sits innermost so every retry and redirect hop
//! re-attaches a fresh token.

use std::sync::Arc;

use crate::pipeline::Pipeline;
use crate::policy::auth::{Credential, CredentialPolicy};
use crate::policy::redirect::RedirectPolicy;
use crate::policy::retry::{RetryConfig, RetryPolicy};
use crate::policy::user_agent::UserAgentPolicy;
use crate::policy::Policy;
use crate::transport::{HyperTransport, Transport};
use crate::PipelineError;

/// Builder assembling a [`Pipeline`] in the canonical order.
///
/// # Example
///
/// ```ignore
/// use relay_pipeline::{Pipeline, RetryConfig};
///
/// let pipeline = Pipeline::builder()
///     .user_agent("my-service/1.2")
///     .retry(RetryConfig::new().max_retries(5))
///     .build()?;
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    user_agent: Option<String>,
    custom: Vec<Arc<dyn Policy>>,
    credential: Option<Arc<dyn Credential>>,
    retry: Option<RetryConfig>,
    max_redirects: Option<u32>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user-agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Append a custom policy, placed after user-agent decoration and
    /// before redirect handling. Repeatable; insertion order preserved.
    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.custom.push(policy);
        self
    }

    /// Attach a credential for bearer-token auth.
    pub fn credential(mut self, credential: Arc<dyn Credential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the default retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Cap redirect hops. Zero returns every redirect raw.
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Replace the default hyper transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the pipeline.
    ///
    /// Fails on invalid configuration (bad user-agent value, bad retry
    /// parameters, TLS setup failure for the default transport).
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let retry = self.retry.unwrap_or_default();
        retry
            .validate()
            .map_err(|msg| PipelineError::Config(msg.into()))?;

        let user_agent = match self.user_agent {
            Some(value) => UserAgentPolicy::new(&value)?,
            None => UserAgentPolicy::default(),
        };
        let redirect = match self.max_redirects {
            Some(max) => RedirectPolicy::new(max),
            None => RedirectPolicy::default(),
        };

        let mut policies: Vec<Arc<dyn Policy>> = Vec::with_capacity(self.custom.len() + 4);
        policies.push(Arc::new(user_agent));
        policies.extend(self.custom);
        policies.push(Arc::new(redirect));
        policies.push(Arc::new(RetryPolicy::new(retry)));
        if let Some(credential) = self.credential {
            policies.push(Arc::new(CredentialPolicy::new(credential)));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };
        Ok(Pipeline::new(policies, transport))
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("user_agent", &self.user_agent)
            .field("custom_policies", &self.custom.len())
            .field("credential", &self.credential.is_some())
            .field("retry", &self.retry)
            .field("max_redirects", &self.max_redirects)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
