//! Request envelope and request body types.
//!
//! A [`Request`] carries everything a transport needs for one attempt:
//! method, URL, headers, and a [`Body`]. The body doubles as hyper's
//! request body via its [`http_body::Body`] implementation.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use http_body::Frame;
use pin_project_lite::pin_project;

use crate::PipelineError;

/// An HTTP request travelling down the pipeline.
///
/// Created once per logical call; the pipeline may clone it for retries
/// and redirects when the body is replayable (empty or fully buffered).
///
/// # Example
///
/// ```
/// use relay_pipeline::Request;
/// use http::Method;
///
/// let request = Request::new(Method::GET, "https://example.com/items".parse().unwrap());
/// assert_eq!(request.method(), &Method::GET);
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
    /// Caller override for retry eligibility of non-idempotent methods.
    idempotent: Option<bool>,
}

impl Request {
    /// Create a new request with an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::empty(),
            idempotent: None,
        }
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Replace the request URI (used by the redirect policy).
    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Replace the request method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Request headers (ordered, case-insensitive keys).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Insert a header, replacing any previous value.
    ///
    /// Returns an error if the name or value is not valid HTTP.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<(), PipelineError> {
        let name: HeaderName = name
            .parse()
            .map_err(|_| PipelineError::InvalidHeader(format!("invalid header name: {name}")))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| PipelineError::InvalidHeader(format!("invalid header value: {value}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Set the request body.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Mark this request as safe (or unsafe) to retry regardless of its
    /// method. Non-idempotent methods (POST, PATCH) are never retried
    /// unless this is set to `true`.
    pub fn set_idempotent(&mut self, idempotent: bool) {
        self.idempotent = Some(idempotent);
    }

    /// Builder-style idempotency override.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Caller override for retry eligibility, if any.
    pub fn idempotent_override(&self) -> Option<bool> {
        self.idempotent
    }

    /// Take the body out of the request, leaving an empty one.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Body reference.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Clone this request if its body is replayable.
    ///
    /// Streaming bodies cannot be replayed, so requests carrying one
    /// return `None`; retry and redirect policies forward such requests
    /// exactly once.
    pub fn try_clone(&self) -> Option<Request> {
        let body = self.body.try_clone()?;
        Some(Request {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body,
            idempotent: self.idempotent,
        })
    }
}

pin_project! {
    /// A request body.
    ///
    /// Can represent:
    /// - an empty body (GET/HEAD and friends),
    /// - a fully buffered body (replayable across retries),
    /// - a streaming body (consumed at most once).
    #[project = BodyProj]
    pub enum Body {
        /// Empty request body.
        Empty,
        /// Fully buffered request body.
        Full {
            data: Option<Bytes>,
        },
        /// Streaming request body from an async stream.
        Streaming {
            #[pin]
            stream: Pin<Box<dyn Stream<Item = Result<Bytes, PipelineError>> + Send>>,
        },
    }
}

impl Body {
    /// Create an empty body.
    pub fn empty() -> Self {
        Body::Empty
    }

    /// Create a body with the given data.
    pub fn full(data: impl Into<Bytes>) -> Self {
        Body::Full {
            data: Some(data.into()),
        }
    }

    /// Create a streaming body from the given stream.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, PipelineError>> + Send + 'static,
    {
        Body::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// Clone the body if it is replayable.
    pub fn try_clone(&self) -> Option<Body> {
        match self {
            Body::Empty => Some(Body::Empty),
            Body::Full { data } => Some(Body::Full { data: data.clone() }),
            Body::Streaming { .. } => None,
        }
    }

    /// Whether this body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Body::Streaming { .. })
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = PipelineError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            BodyProj::Empty => Poll::Ready(None),
            BodyProj::Full { data } => {
                let result = data.take().map(|d| Ok(Frame::data(d)));
                Poll::Ready(result)
            }
            BodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full { data } => data.is_none(),
            Body::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Body::Empty => http_body::SizeHint::with_exact(0),
            Body::Full { data } => {
                http_body::SizeHint::with_exact(data.as_ref().map(|d| d.len()).unwrap_or(0) as u64)
            }
            Body::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Full { data } => f
                .debug_struct("Body::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            Body::Streaming { .. } => write!(f, "Body::Streaming"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Body::full(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::full(Bytes::from(data))
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Body::full(Bytes::from_static(data.as_bytes()))
    }
}
