//! Programmable in-memory transport for tests.
//!
//! Not gated behind `cfg(test)` so integration tests and downstream
//! crates can drive a pipeline without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::context::Context;
use crate::policy::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use crate::PipelineError;

type Outcome = Box<dyn FnOnce() -> Result<Response, PipelineError> + Send>;
type Fallback = Box<dyn Fn() -> Result<Response, PipelineError> + Send + Sync>;

/// What the mock saw for one attempt.
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// A transport driven by a queue of scripted outcomes.
///
/// Queued outcomes are consumed in order; once the queue is empty every
/// further attempt gets the fallback outcome. Each attempt's method,
/// URI, and headers are recorded for assertions.
///
/// # Example
///
/// ```
/// use relay_pipeline::transport::MockTransport;
/// use http::StatusCode;
///
/// let transport = MockTransport::status(StatusCode::OK, "ok")
///     .then_status(StatusCode::SERVICE_UNAVAILABLE, "");
/// ```
pub struct MockTransport {
    queue: Mutex<VecDeque<Outcome>>,
    fallback: Fallback,
    calls: AtomicU32,
    seen: Mutex<Vec<SeenRequest>>,
}

impl MockTransport {
    /// A mock whose every attempt produces the fallback outcome.
    pub fn returning<F>(fallback: F) -> Self
    where
        F: Fn() -> Result<Response, PipelineError> + Send + Sync + 'static,
    {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Box::new(fallback),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A mock answering every attempt with the given status and body.
    pub fn status(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::returning(move || Ok(Response::new(status, HeaderMap::new(), body.clone())))
    }

    /// A mock answering every attempt with a connection-refused transport
    /// error.
    pub fn connection_refused() -> Self {
        Self::returning(|| Err(PipelineError::transport_msg("connection refused")))
    }

    /// Queue one scripted outcome ahead of the fallback.
    pub fn then<F>(self, outcome: F) -> Self
    where
        F: FnOnce() -> Result<Response, PipelineError> + Send + 'static,
    {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(outcome));
        self
    }

    /// Queue one scripted response ahead of the fallback.
    pub fn then_status(self, status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.then(move || Ok(Response::new(status, HeaderMap::new(), body)))
    }

    /// Queue one scripted response with headers ahead of the fallback.
    pub fn then_response(self, status: StatusCode, headers: HeaderMap) -> Self {
        self.then(move || Ok(Response::new(status, headers, Bytes::new())))
    }

    /// Number of attempts this mock has served.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshots of every attempt, in order.
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Snapshot of the most recent attempt.
    pub fn last_seen(&self) -> Option<SeenRequest> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        request: Request,
        _ctx: &'a mut Context,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SeenRequest {
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            });
        let scripted = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome(),
            None => (self.fallback)(),
        };
        Box::pin(async move { outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let transport = MockTransport::status(StatusCode::OK, "fallback")
            .then_status(StatusCode::SERVICE_UNAVAILABLE, "first");
        let mut ctx = Context::new();

        let req = || Request::new(Method::GET, "https://example.com/".parse().unwrap());

        let first = transport.send(req(), &mut ctx).await.unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let mut second = transport.send(req(), &mut ctx).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.body().await.unwrap(), Bytes::from("fallback"));

        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let transport = MockTransport::connection_refused();
        let mut ctx = Context::new();
        let err = transport
            .send(
                Request::new(Method::GET, "https://example.com/".parse().unwrap()),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
