//! Transport capability: the terminal sender at the end of the chain.
//!
//! The pipeline is transport-agnostic; anything implementing
//! [`Transport`] can terminate the chain. The default is
//! [`HyperTransport`], a pooled hyper client with rustls. Tests use
//! [`MockTransport`], a programmable in-memory sender.

mod connector;
pub mod hyper;
pub mod mock;

pub use hyper::{HyperTransport, HyperTransportBuilder};
pub use mock::MockTransport;

use crate::context::Context;
use crate::policy::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// Terminal sender invoked after the last policy.
///
/// Implementations must be safe for concurrent `send` calls; any shared
/// long-lived resource (a connection pool) belongs to the transport
/// itself, never to per-thread state.
pub trait Transport: Send + Sync {
    /// Perform one request attempt.
    ///
    /// The transport honors `ctx.deadline` and `ctx.cancel`, mapping them
    /// to [`PipelineError::DeadlineExceeded`] and
    /// [`PipelineError::Cancelled`] respectively, and selects a buffered
    /// or streaming response body from `ctx.stream`.
    fn send<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut Context,
    ) -> BoxFuture<'a, Result<Response, PipelineError>>;
}
