//! Response envelope and streaming body access.
//!
//! A [`Response`] exposes its body in two modes selected per call:
//!
//! - buffered: [`Response::body`] / [`Response::text`] return the whole
//!   payload (collecting a streaming body on first access);
//! - streaming: [`Response::into_stream`] yields a forward-only sequence
//!   of chunks, read once, front to back.
//!
//! A streaming body holds the underlying connection until it is exhausted
//! or dropped; dropping the stream releases the connection.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};

use crate::PipelineError;

/// An HTTP response travelling back up the pipeline.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    retries: u32,
}

impl Response {
    /// Create a response with a fully buffered body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(body.into()),
            retries: 0,
        }
    }

    /// Create a response whose body is consumed lazily from a stream.
    pub fn streaming<S>(status: StatusCode, headers: HeaderMap, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, PipelineError>> + Send + 'static,
    {
        Self {
            status,
            headers,
            body: ResponseBody::Streaming(ResponseStream::new(stream)),
            retries: 0,
        }
    }

    /// Response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical reason phrase for the status code, when defined.
    pub fn reason(&self) -> Option<&'static str> {
        self.status.canonical_reason()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Number of retry attempts the pipeline performed before this
    /// response was returned. Set by the retry policy; 0 otherwise.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    /// Whether the body is still streaming (not yet buffered or consumed).
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Streaming(_))
    }

    /// Return the full response body.
    ///
    /// In buffered mode this is immediate and repeatable. A streaming body
    /// is collected on first call and buffered afterwards. Fails with
    /// [`PipelineError::StreamConsumed`] if the stream was already taken
    /// via [`Response::into_stream`] or a previous collection failed
    /// midway.
    pub async fn body(&mut self) -> Result<Bytes, PipelineError> {
        match &mut self.body {
            ResponseBody::Buffered(data) => Ok(data.clone()),
            ResponseBody::Streaming(_) => {
                let ResponseBody::Streaming(stream) =
                    std::mem::replace(&mut self.body, ResponseBody::Consumed)
                else {
                    unreachable!("matched streaming above")
                };
                let data = stream.collect_bytes().await?;
                self.body = ResponseBody::Buffered(data.clone());
                Ok(data)
            }
            ResponseBody::Consumed => Err(PipelineError::StreamConsumed),
        }
    }

    /// Return the body decoded as UTF-8 text.
    pub async fn text(&mut self) -> Result<String, PipelineError> {
        let data = self.body().await?;
        String::from_utf8(data.to_vec())
            .map_err(|e| PipelineError::Stream(format!("body is not valid utf-8: {e}")))
    }

    /// Take the body as a forward-only chunk stream.
    ///
    /// The stream must be read in order, once, front to back. The
    /// underlying connection is released when the stream is exhausted or
    /// dropped. Fails with [`PipelineError::StreamConsumed`] if the body
    /// was already taken.
    pub fn into_stream(self) -> Result<ResponseStream, PipelineError> {
        match self.body {
            ResponseBody::Buffered(data) => {
                Ok(ResponseStream::new(futures::stream::iter(vec![Ok(data)])))
            }
            ResponseBody::Streaming(stream) => Ok(stream),
            ResponseBody::Consumed => Err(PipelineError::StreamConsumed),
        }
    }
}

/// Internal body state.
enum ResponseBody {
    Buffered(Bytes),
    Streaming(ResponseStream),
    Consumed,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Buffered(data) => f
                .debug_struct("ResponseBody::Buffered")
                .field("len", &data.len())
                .finish(),
            ResponseBody::Streaming(_) => write!(f, "ResponseBody::Streaming"),
            ResponseBody::Consumed => write!(f, "ResponseBody::Consumed"),
        }
    }
}

/// Forward-only chunk stream over a response body.
///
/// Dropping the stream before exhaustion closes the underlying
/// connection (best-effort release; the transport's pool reclaims it).
pub struct ResponseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, PipelineError>> + Send>>,
}

impl ResponseStream {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, PipelineError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Collect the remaining chunks into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, PipelineError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, PipelineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResponseStream")
    }
}
