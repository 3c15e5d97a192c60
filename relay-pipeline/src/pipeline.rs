//! The chain runner.
//!
//! A [`Pipeline`] holds an ordered policy list and a terminal transport,
//! both fixed at construction. Each `run` threads the request down the
//! chain in construction order and the response back up in reverse
//! order, with a fresh [`Context`] per call. The pipeline is cheap to
//! clone and safe to share across tasks: all shared state is immutable,
//! per-call state lives in the context.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::options::RequestOptions;
use crate::policy::{Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use crate::PipelineError;

/// An immutable policy chain terminated by a transport.
///
/// # Example
///
/// ```ignore
/// use relay_pipeline::{Pipeline, Request};
/// use http::Method;
///
/// let pipeline = Pipeline::builder().build()?;
/// let request = Request::new(Method::GET, "https://example.com/".parse()?);
/// let mut response = pipeline.run(request).await?;
/// println!("{}", response.text().await?);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Assemble a pipeline from an explicit policy list and transport.
    ///
    /// Policies run in list order on the way down; most callers want
    /// [`crate::builder::PipelineBuilder`] instead, which assembles the
    /// canonical order.
    pub fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policies: policies.into(),
            transport,
        }
    }

    /// Builder with the canonical policy ordering.
    pub fn builder() -> crate::builder::PipelineBuilder {
        crate::builder::PipelineBuilder::new()
    }

    /// Run one request with default options.
    pub async fn run(&self, request: Request) -> Result<Response, PipelineError> {
        self.run_with_options(request, RequestOptions::default())
            .await
    }

    /// Run one request with per-call options.
    pub async fn run_with_options(
        &self,
        mut request: Request,
        options: RequestOptions,
    ) -> Result<Response, PipelineError> {
        // Option headers fill gaps; headers already on the request win.
        for (name, value) in options.headers.iter() {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }

        let mut ctx = Context::new();
        ctx.stream = options.stream;
        ctx.deadline = options.timeout.map(|t| Instant::now() + t);
        ctx.cancel = options.cancel.unwrap_or_else(CancellationToken::new);
        ctx.retry_override = options.retry;

        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            stream = ctx.stream,
            "pipeline run"
        );
        Next::new(&self.policies, self.transport.as_ref())
            .run(request, &mut ctx)
            .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies.len())
            .finish_non_exhaustive()
    }
}
