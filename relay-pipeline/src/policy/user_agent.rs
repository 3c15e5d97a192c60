//! User-agent decoration.

use http::header::USER_AGENT;
use http::HeaderValue;

use crate::context::Context;
use crate::policy::{BoxFuture, Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// Default user-agent string: `relay-pipeline/<crate version>`.
pub fn default_user_agent() -> String {
    format!("relay-pipeline/{}", env!("CARGO_PKG_VERSION"))
}

/// Sets the `User-Agent` header unless the caller already provided one.
/// Never alters request semantics.
#[derive(Clone, Debug)]
pub struct UserAgentPolicy {
    value: HeaderValue,
}

impl UserAgentPolicy {
    pub fn new(user_agent: &str) -> Result<Self, PipelineError> {
        let value = HeaderValue::from_str(user_agent).map_err(|_| {
            PipelineError::InvalidHeader(format!("invalid user-agent: {user_agent}"))
        })?;
        Ok(Self { value })
    }
}

impl Default for UserAgentPolicy {
    fn default() -> Self {
        Self {
            // The crate version is always a valid header value.
            value: HeaderValue::from_str(&default_user_agent())
                .unwrap_or_else(|_| HeaderValue::from_static("relay-pipeline")),
        }
    }
}

impl Policy for UserAgentPolicy {
    fn send<'a>(
        &'a self,
        mut request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        if !request.headers().contains_key(USER_AGENT) {
            request.headers_mut().insert(USER_AGENT, self.value.clone());
        }
        Box::pin(next.run(request, ctx))
    }
}
