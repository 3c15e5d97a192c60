//! The policy capability and the explicit continuation.
//!
//! A [`Policy`] is one unit of cross-cutting behavior (auth injection,
//! retry, redirect handling, header decoration). Policies receive the
//! request, the per-call [`Context`], and a [`Next`] continuation; they
//! may mutate the request before forwarding, and may retry, transform,
//! or replace the response coming back.
//!
//! The continuation is an index into the pipeline's immutable policy
//! slice rather than a mutable `next` pointer wired into each policy, so
//! policy instances stay shareable across concurrent calls.
//!
//! # Example
//!
//! ```ignore
//! struct RequestIdPolicy;
//!
//! impl Policy for RequestIdPolicy {
//!     fn send<'a>(
//!         &'a self,
//!         mut request: Request,
//!         ctx: &'a mut Context,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Result<Response, PipelineError>> {
//!         Box::pin(async move {
//!             request.insert_header("x-request-id", "abc-123")?;
//!             next.run(request, ctx).await
//!         })
//!     }
//! }
//! ```

pub mod auth;
pub mod redirect;
pub mod retry;
pub mod user_agent;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use crate::PipelineError;

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of cross-cutting behavior in the pipeline.
///
/// Implementations must be stateless with respect to individual calls:
/// per-call mutable state belongs in the [`Context`], shared immutable
/// configuration in the policy itself.
pub trait Policy: Send + Sync {
    /// Process one request, forwarding it via `next.run(..)`.
    ///
    /// Calling the continuation zero times short-circuits the chain;
    /// calling it more than once re-issues the call (retry).
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>>;
}

/// The rest of the chain: the policies not yet traversed plus the
/// terminal transport.
///
/// `Next` is `Copy`, so a policy can invoke the downstream chain several
/// times (the retry policy does exactly that).
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Invoke the next policy in construction order, or the transport if
    /// every policy has been traversed.
    pub async fn run(
        self,
        request: Request,
        ctx: &mut Context,
    ) -> Result<Response, PipelineError> {
        match self.policies.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    policies: rest,
                    transport: self.transport,
                };
                head.send(request, ctx, next).await
            }
            None => self.transport.send(request, ctx).await,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.policies.len())
            .finish()
    }
}
