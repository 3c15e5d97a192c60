//! Hyper-based transport: pooled client with rustls.
//!
//! [`HyperTransport`] terminates the pipeline with hyper_util's legacy
//! client. The connection pool is owned by the transport and shared
//! across concurrent calls; pool sizing is explicit at construction.
//! HTTP/1.1 and HTTP/2 are both supported, negotiated via ALPN.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::StreamExt;
use http_body_util::{BodyDataStream, BodyExt};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use super::connector::build_https_connector;
use crate::context::Context;
use crate::policy::BoxFuture;
use crate::request::{Body, Request};
use crate::response::Response;
use crate::transport::Transport;
use crate::PipelineError;

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Pooled hyper transport.
///
/// Cloning is cheap and shares the underlying pool.
///
/// # Example
///
/// ```ignore
/// use relay_pipeline::transport::HyperTransport;
/// use std::time::Duration;
///
/// let transport = HyperTransport::builder()
///     .pool_idle_timeout(Duration::from_secs(60))
///     .pool_max_idle_per_host(8)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    http2_only: bool,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("http2_only", &self.http2_only)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a transport with default settings.
    pub fn new() -> Result<Self, PipelineError> {
        Self::builder().build()
    }

    /// Whether HTTP/2-only mode is enabled.
    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }

    async fn perform(
        &self,
        request: Request,
        streaming: bool,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> Result<Response, PipelineError> {
        if request.uri().scheme().is_none() {
            return Err(PipelineError::Config(format!(
                "request uri must be absolute: {}",
                request.uri()
            )));
        }

        let http_request = into_http_request(request)?;
        let raw = guarded(
            self.client.request(http_request),
            deadline,
            &cancel,
            "request failed",
        )
        .await?;

        let (parts, incoming) = raw.into_parts();
        if streaming {
            let chunks = BodyDataStream::new(incoming).map(|chunk| {
                chunk.map_err(|e| PipelineError::Stream(format!("body read failed: {e}")))
            });
            Ok(Response::streaming(parts.status, parts.headers, chunks))
        } else {
            let collected = guarded(
                incoming.collect(),
                deadline,
                &cancel,
                "reading response body failed",
            )
            .await?;
            Ok(Response::new(
                parts.status,
                parts.headers,
                collected.to_bytes(),
            ))
        }
    }
}

fn into_http_request(request: Request) -> Result<http::Request<Body>, PipelineError> {
    let mut request = request;
    let headers = request.headers().clone();
    let body = request.take_body();
    let mut http_request = http::Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .body(body)
        .map_err(|e| PipelineError::Config(format!("invalid request: {e}")))?;
    *http_request.headers_mut() = headers;
    Ok(http_request)
}

/// Run `fut` under the per-call deadline and cancellation token.
/// Deadline expiry and cancellation map to distinct error kinds.
async fn guarded<F, T, E>(
    fut: F,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    what: &'static str,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let io = async {
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => return Err(PipelineError::DeadlineExceeded),
            },
            None => fut.await,
        };
        result.map_err(|e| PipelineError::transport(what, e))
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = io => result,
    }
}

impl Transport for HyperTransport {
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        let streaming = ctx.stream;
        let deadline = ctx.deadline;
        let cancel = ctx.cancel.clone();
        Box::pin(self.perform(request, streaming, deadline, cancel))
    }
}

/// Builder for [`HyperTransport`].
pub struct HyperTransportBuilder {
    tls_config: Option<ClientConfig>,
    http2_only: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    pub fn new() -> Self {
        Self {
            tls_config: None,
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }

    /// Set a custom TLS configuration (custom roots, mTLS).
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Use HTTP/2 without the HTTP/1.1 upgrade handshake.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Close pooled connections idle for longer than this.
    ///
    /// Default: 90 seconds.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Keep idle connections open indefinitely.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Maximum idle connections kept per host.
    ///
    /// Default: 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HyperTransport, PipelineError> {
        let https_connector = build_https_connector(self.tls_config)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // The pool timer is required for pool_idle_timeout to take effect.
        builder.pool_timer(TokioTimer::new());
        if let Some(timeout) = self.pool_idle_timeout {
            builder.pool_idle_timeout(timeout);
        }
        builder.pool_max_idle_per_host(self.pool_max_idle_per_host);
        if self.http2_only {
            builder.http2_only(true);
        }

        Ok(HyperTransport {
            client: builder.build(https_connector),
            http2_only: self.http2_only,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("http2_only", &self.http2_only)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .finish()
    }
}

impl Service<http::Request<Body>> for HyperTransport {
    type Response = http::Response<Incoming>;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        // The legacy client is always ready.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            client
                .request(request)
                .await
                .map_err(|e| PipelineError::transport("request failed", e))
        })
    }
}
