//! Redirect policy with HTTP-spec method semantics.
//!
//! Follows redirects only where HTTP semantics allow an automatic
//! follow:
//!
//! - 301/302 with GET/HEAD: followed, method preserved. With any other
//!   method the raw 3xx is returned to the caller, not followed and
//!   not an error.
//! - 303: followed as GET with the body dropped (HEAD stays HEAD).
//! - 307/308: followed with method and body preserved, but only when
//!   the body is replayable; a streaming body returns the raw 3xx.
//!
//! At most `max_redirects` hops are followed; past the cap the raw 3xx
//! surfaces. The `Authorization` header is stripped when a hop changes
//! host.

use http::header::{AUTHORIZATION, CONTENT_LENGTH, LOCATION};
use http::{Method, StatusCode, Uri};

use crate::context::Context;
use crate::policy::{BoxFuture, Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// Default maximum number of redirect hops.
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Pipeline policy following redirects per HTTP method semantics.
#[derive(Clone, Debug)]
pub struct RedirectPolicy {
    max_redirects: u32,
}

impl RedirectPolicy {
    pub fn new(max_redirects: u32) -> Self {
        Self { max_redirects }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDIRECTS)
    }
}

enum Action {
    /// Follow with the given method; `drop_body` for 303-style rewrites.
    Follow { method: Method, drop_body: bool },
    /// Hand the 3xx (or non-redirect) response to the caller.
    ReturnRaw,
}

fn classify(status: StatusCode, method: &Method, replayable: bool) -> Action {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            if (method == Method::GET || method == Method::HEAD) && replayable {
                Action::Follow {
                    method: method.clone(),
                    drop_body: false,
                }
            } else {
                Action::ReturnRaw
            }
        }
        StatusCode::SEE_OTHER => {
            let method = if method == Method::HEAD {
                Method::HEAD
            } else {
                Method::GET
            };
            Action::Follow {
                method,
                drop_body: true,
            }
        }
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
            if replayable {
                Action::Follow {
                    method: method.clone(),
                    drop_body: false,
                }
            } else {
                Action::ReturnRaw
            }
        }
        _ => Action::ReturnRaw,
    }
}

/// Resolve a `Location` value against the request URI. Absolute
/// locations are taken as-is; relative ones replace the path and query.
fn resolve_location(base: &Uri, location: &str) -> Result<Uri, PipelineError> {
    let uri: Uri = location
        .parse()
        .map_err(|_| PipelineError::InvalidHeader(format!("invalid location: {location}")))?;
    if uri.scheme().is_some() {
        return Ok(uri);
    }
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(
        location
            .parse()
            .map_err(|_| PipelineError::InvalidHeader(format!("invalid location: {location}")))?,
    );
    Uri::from_parts(parts)
        .map_err(|e| PipelineError::InvalidHeader(format!("invalid location: {e}")))
}

impl Policy for RedirectPolicy {
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            let mut hops: u32 = 0;
            let mut current = request;

            loop {
                let replay = current.try_clone();
                let method = current.method().clone();
                let uri = current.uri().clone();
                let headers = current.headers().clone();

                let response = next.run(current, ctx).await?;

                let action = classify(response.status(), &method, replay.is_some());
                let (follow_method, drop_body) = match action {
                    Action::Follow { method, drop_body } => (method, drop_body),
                    Action::ReturnRaw => return Ok(response),
                };
                if hops >= self.max_redirects {
                    return Ok(response);
                }
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Ok(response);
                };
                let target = resolve_location(&uri, location)?;

                // A 303 rewrite drops the body, so it never needs the
                // replay clone; the other follows do.
                let mut follow = if drop_body {
                    let mut rewritten = Request::new(follow_method, target.clone());
                    *rewritten.headers_mut() = headers;
                    rewritten.headers_mut().remove(CONTENT_LENGTH);
                    rewritten
                } else {
                    match replay {
                        Some(mut request) => {
                            request.set_method(follow_method);
                            request.set_uri(target.clone());
                            request
                        }
                        // Unreachable: classify returns ReturnRaw when a
                        // body-preserving follow is not replayable.
                        None => return Ok(response),
                    }
                };
                if target.host() != uri.host() {
                    follow.headers_mut().remove(AUTHORIZATION);
                }

                hops += 1;
                tracing::debug!(
                    hop = hops,
                    status = response.status().as_u16(),
                    location,
                    "following redirect"
                );
                current = follow;
            }
        })
    }
}
