//! End-to-end pipeline tests against stub transports.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::header::{LOCATION, USER_AGENT};
use http::{HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;

use relay_pipeline::policy::BoxFuture;
use relay_pipeline::transport::MockTransport;
use relay_pipeline::{
    AccessToken, AuthErrorKind, Body, Context, Credential, Next, Pipeline, PipelineError, Policy,
    Request, RequestOptions, Response, RetryConfig, Transport,
};

fn get(uri: &str) -> Request {
    Request::new(Method::GET, uri.parse().unwrap())
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .max_retries(max_retries)
        .base_delay(Duration::ZERO)
        .jitter(0.0)
}

#[tokio::test]
async fn bare_get_returns_body() {
    let transport = Arc::new(MockTransport::status(StatusCode::OK, "ok"));
    let pipeline = Pipeline::new(Vec::new(), transport);

    let mut response = pipeline.run(get("https://example.com/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().await.unwrap(), Bytes::from("ok"));
}

#[tokio::test]
async fn user_agent_and_retry_against_refused_connection() {
    let transport = Arc::new(MockTransport::connection_refused());
    let pipeline = Pipeline::builder()
        .user_agent("relay-test/0.1")
        .retry(fast_retry(2))
        .transport(transport.clone())
        .build()
        .unwrap();

    let err = pipeline.run(get("https://example.com/")).await.unwrap_err();

    // Initial attempt + 2 retries, then the transport error resurfaces.
    assert_eq!(transport.calls(), 3);
    assert!(matches!(err, PipelineError::Transport { .. }));
    for seen in transport.seen() {
        assert_eq!(seen.headers.get(USER_AGENT).unwrap(), "relay-test/0.1");
    }
}

#[tokio::test]
async fn retry_exhaustion_returns_last_response_annotated() {
    let transport = Arc::new(MockTransport::status(StatusCode::SERVICE_UNAVAILABLE, "busy"));
    let pipeline = Pipeline::builder()
        .retry(fast_retry(2))
        .transport(transport.clone())
        .build()
        .unwrap();

    let mut response = pipeline.run(get("https://example.com/")).await.unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.retries(), 2);
    assert_eq!(response.body().await.unwrap(), Bytes::from("busy"));
}

#[tokio::test]
async fn redirect_302_post_returned_raw() {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, "https://example.com/other".parse().unwrap());
    let transport = Arc::new(
        MockTransport::status(StatusCode::OK, "").then_response(StatusCode::FOUND, headers),
    );
    let pipeline = Pipeline::builder()
        .transport(transport.clone())
        .build()
        .unwrap();

    let request = Request::new(Method::POST, "https://example.com/submit".parse().unwrap())
        .with_body(Body::full("payload"));
    let response = pipeline.run(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn redirect_302_get_followed() {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, "https://example.com/new".parse().unwrap());
    let transport = Arc::new(
        MockTransport::status(StatusCode::OK, "found it")
            .then_response(StatusCode::FOUND, headers),
    );
    let pipeline = Pipeline::builder()
        .transport(transport.clone())
        .build()
        .unwrap();

    let mut response = pipeline.run(get("https://example.com/old")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().await.unwrap(), Bytes::from("found it"));
    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.last_seen().unwrap().uri.path(), "/new");
}

#[tokio::test]
async fn redirect_to_other_host_drops_bearer_token() {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, "https://evil.example.net/new".parse().unwrap());
    let transport = Arc::new(
        MockTransport::status(StatusCode::OK, "").then_response(StatusCode::FOUND, headers),
    );
    let pipeline = Pipeline::builder()
        .credential(Arc::new(relay_pipeline::StaticCredential::new("secret-token")))
        .transport(transport.clone())
        .build()
        .unwrap();

    pipeline.run(get("https://example.com/old")).await.unwrap();

    assert_eq!(transport.calls(), 2);
    let seen = transport.seen();
    assert!(seen[0].headers.contains_key(http::header::AUTHORIZATION));
    assert_eq!(seen[1].uri.host(), Some("evil.example.net"));
    assert!(
        !seen[1].headers.contains_key(http::header::AUTHORIZATION),
        "bearer token must not follow the call to another host"
    );
}

#[tokio::test]
async fn redirect_within_host_keeps_bearer_token() {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, "https://example.com/new".parse().unwrap());
    let transport = Arc::new(
        MockTransport::status(StatusCode::OK, "").then_response(StatusCode::FOUND, headers),
    );
    let pipeline = Pipeline::builder()
        .credential(Arc::new(relay_pipeline::StaticCredential::new("secret-token")))
        .transport(transport.clone())
        .build()
        .unwrap();

    pipeline.run(get("https://example.com/old")).await.unwrap();

    assert_eq!(transport.calls(), 2);
    let seen = transport.seen();
    assert_eq!(
        seen[1].headers.get(http::header::AUTHORIZATION).unwrap(),
        "Bearer secret-token"
    );
}

#[tokio::test]
async fn cancellation_during_backoff_stops_retrying() {
    let transport = Arc::new(MockTransport::connection_refused());
    let pipeline = Pipeline::builder()
        .retry(
            RetryConfig::new()
                .max_retries(5)
                .base_delay(Duration::from_secs(3600))
                .max_delay(Duration::from_secs(3600))
                .jitter(0.0),
        )
        .transport(transport.clone())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let options = RequestOptions::new().cancel(token);

    let err = pipeline
        .run_with_options(get("https://example.com/"), options)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(transport.calls(), 1);
}

/// Credential handing out "stale" until refreshed.
struct CountingCredential {
    refreshes: AtomicU32,
}

impl Credential for CountingCredential {
    fn token(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>> {
        let secret = if self.refreshes.load(Ordering::SeqCst) == 0 {
            "stale"
        } else {
            "fresh"
        };
        Box::pin(async move { Ok(AccessToken::new(secret)) })
    }

    fn refresh(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.token()
    }
}

#[tokio::test]
async fn expired_token_refreshed_exactly_once() {
    let credential = Arc::new(CountingCredential {
        refreshes: AtomicU32::new(0),
    });
    let transport = Arc::new(
        MockTransport::status(StatusCode::OK, "ok").then_status(StatusCode::UNAUTHORIZED, ""),
    );
    let pipeline = Pipeline::builder()
        .credential(credential.clone())
        .transport(transport.clone())
        .build()
        .unwrap();

    let response = pipeline.run(get("https://example.com/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(credential.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn persistent_rejection_surfaces_refresh_failed() {
    let credential = Arc::new(CountingCredential {
        refreshes: AtomicU32::new(0),
    });
    let transport = Arc::new(MockTransport::status(StatusCode::UNAUTHORIZED, ""));
    let pipeline = Pipeline::builder()
        .credential(credential.clone())
        .transport(transport.clone())
        .build()
        .unwrap();

    let err = pipeline.run(get("https://example.com/")).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Auth {
            kind: AuthErrorKind::RefreshFailed,
            ..
        }
    ));
    assert_eq!(credential.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn streaming_body_concatenates_once_then_consumed() {
    let transport = Arc::new(MockTransport::returning(|| {
        Ok(Response::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            futures::stream::iter(vec![
                Ok(Bytes::from("abc")),
                Ok(Bytes::from("defg")),
                Ok(Bytes::from("h")),
            ]),
        ))
    }));
    let pipeline = Pipeline::new(Vec::new(), transport);

    let response = pipeline
        .run_with_options(get("https://example.com/"), RequestOptions::new().stream(true))
        .await
        .unwrap();
    assert!(response.is_streaming());

    let mut stream = response.into_stream().unwrap();
    let mut total = Vec::new();
    while let Some(chunk) = stream.next().await {
        total.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(total, b"abcdefgh");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn failed_stream_collection_marks_body_consumed() {
    let transport = Arc::new(MockTransport::returning(|| {
        Ok(Response::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            futures::stream::iter(vec![
                Ok(Bytes::from("partial")),
                Err(PipelineError::Stream("connection reset mid-body".into())),
            ]),
        ))
    }));
    let pipeline = Pipeline::new(Vec::new(), transport);

    let mut response = pipeline
        .run_with_options(get("https://example.com/"), RequestOptions::new().stream(true))
        .await
        .unwrap();

    let first = response.body().await.unwrap_err();
    assert!(matches!(first, PipelineError::Stream(_)));

    let second = response.body().await.unwrap_err();
    assert!(matches!(second, PipelineError::StreamConsumed));
}

/// Transport that honors the per-call deadline around a fixed delay.
struct SlowTransport {
    delay: Duration,
}

impl Transport for SlowTransport {
    fn send<'a>(
        &'a self,
        _request: Request,
        ctx: &'a mut Context,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        let deadline = ctx.deadline;
        let delay = self.delay;
        Box::pin(async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, tokio::time::sleep(delay))
                    .await
                    .map_err(|_| PipelineError::DeadlineExceeded)?,
                None => tokio::time::sleep(delay).await,
            }
            Ok(Response::new(StatusCode::OK, HeaderMap::new(), Bytes::new()))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_surfaces_deadline_exceeded() {
    let pipeline = Pipeline::new(
        Vec::new(),
        Arc::new(SlowTransport {
            delay: Duration::from_secs(10),
        }),
    );

    let options = RequestOptions::new().timeout(Duration::from_secs(1));
    let err = pipeline
        .run_with_options(get("https://example.com/"), options)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DeadlineExceeded));
}

/// Records traversal order on the way down and the way up.
struct TracingPolicy {
    tag: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

impl Policy for TracingPolicy {
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            self.trace
                .lock()
                .unwrap()
                .push(format!("{}-down", self.tag));
            let result = next.run(request, ctx).await;
            self.trace.lock().unwrap().push(format!("{}-up", self.tag));
            result
        })
    }
}

#[tokio::test]
async fn custom_policies_run_in_insertion_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .policy(Arc::new(TracingPolicy {
            tag: "first",
            trace: trace.clone(),
        }))
        .policy(Arc::new(TracingPolicy {
            tag: "second",
            trace: trace.clone(),
        }))
        .transport(Arc::new(MockTransport::status(StatusCode::OK, "")))
        .build()
        .unwrap();

    pipeline.run(get("https://example.com/")).await.unwrap();

    assert_eq!(
        *trace.lock().unwrap(),
        vec!["first-down", "second-down", "second-up", "first-up"]
    );
}

#[tokio::test]
async fn per_call_retry_override_beats_pipeline_default() {
    let transport = Arc::new(MockTransport::connection_refused());
    let pipeline = Pipeline::builder()
        .retry(fast_retry(5))
        .transport(transport.clone())
        .build()
        .unwrap();

    let options = RequestOptions::new().retry(fast_retry(1));
    let _ = pipeline
        .run_with_options(get("https://example.com/"), options)
        .await;

    assert_eq!(transport.calls(), 2);
}
