//! Blocking facade over [`Pipeline`].
//!
//! Enabled with the `blocking` feature. [`BlockingPipeline`] owns a
//! current-thread tokio runtime and drives the async pipeline to
//! completion on the calling thread. Policy ordering and semantics are
//! identical to the async path.

use crate::options::RequestOptions;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// A pipeline whose `run` blocks the calling thread.
///
/// Must not be used from within an async runtime; use [`Pipeline`]
/// there instead.
#[derive(Debug)]
pub struct BlockingPipeline {
    inner: Pipeline,
    runtime: tokio::runtime::Runtime,
}

impl BlockingPipeline {
    /// Wrap an async pipeline with its own current-thread runtime.
    pub fn new(inner: Pipeline) -> Result<Self, PipelineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    /// Run one request with default options, blocking until done.
    pub fn run(&self, request: Request) -> Result<Response, PipelineError> {
        self.runtime.block_on(self.inner.run(request))
    }

    /// Run one request with per-call options, blocking until done.
    pub fn run_with_options(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Response, PipelineError> {
        self.runtime
            .block_on(self.inner.run_with_options(request, options))
    }

    /// Drive an arbitrary future on this pipeline's runtime. Body
    /// access on a [`Response`] is async; blocking callers read it here.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// The wrapped async pipeline.
    pub fn inner(&self) -> &Pipeline {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use std::sync::Arc;

    #[test]
    fn test_blocking_run() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK, "ok"));
        let pipeline =
            BlockingPipeline::new(Pipeline::new(Vec::new(), transport.clone())).unwrap();

        let request = Request::new(Method::GET, "https://example.com/".parse().unwrap());
        let mut response = pipeline.run(request).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = pipeline.block_on(response.body()).unwrap();
        assert_eq!(body, Bytes::from("ok"));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_blocking_with_options() {
        let transport = Arc::new(MockTransport::status(StatusCode::OK, "ok"));
        let pipeline = BlockingPipeline::new(Pipeline::new(Vec::new(), transport)).unwrap();

        let request = Request::new(Method::GET, "https://example.com/".parse().unwrap());
        let options = RequestOptions::new().timeout(std::time::Duration::from_secs(5));
        let response = pipeline.run_with_options(request, options).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
