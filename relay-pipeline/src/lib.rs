//! Composable HTTP request pipeline.
//!
//! A [`Pipeline`] threads each request through an ordered chain of
//! [`Policy`] implementations (user-agent decoration, redirect
//! handling, retry with backoff, bearer-token auth) terminated by a
//! pluggable [`Transport`] (hyper with rustls by default). Policies run
//! in construction order on the way down and reverse order on the way
//! up; per-call state lives in a [`Context`] so the pipeline itself is
//! shareable across tasks.
//!
//! Response bodies come back buffered or as a forward-only chunk
//! stream, selected per call via [`RequestOptions`]. Deadlines and
//! cancellation tokens are observed at every suspension point.
//!
//! # Example
//!
//! ```ignore
//! use relay_pipeline::{Pipeline, Request, RetryConfig};
//! use http::Method;
//!
//! let pipeline = Pipeline::builder()
//!     .user_agent("my-service/1.2")
//!     .retry(RetryConfig::new().max_retries(5))
//!     .build()?;
//!
//! let request = Request::new(Method::GET, "https://example.com/items".parse()?);
//! let mut response = pipeline.run(request).await?;
//! println!("{} {}", response.status(), response.text().await?);
//! ```
//!
//! # Feature flags
//!
//! - `blocking`: [`blocking::BlockingPipeline`], a synchronous facade
//!   owning its own runtime.

pub mod builder;
pub mod context;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod response;
pub mod transport;

#[cfg(feature = "blocking")]
pub mod blocking;

pub use builder::PipelineBuilder;
pub use context::Context;
pub use error::{AuthErrorKind, BoxError, PipelineError};
pub use options::RequestOptions;
pub use pipeline::Pipeline;
pub use policy::auth::{AccessToken, Credential, CredentialPolicy, StaticCredential};
pub use policy::redirect::RedirectPolicy;
pub use policy::retry::{RetryConfig, RetryDecision, RetryMode, RetryPolicy};
pub use policy::user_agent::UserAgentPolicy;
pub use policy::{BoxFuture, Next, Policy};
pub use request::{Body, Request};
pub use response::{Response, ResponseStream};
pub use transport::{HyperTransport, HyperTransportBuilder, MockTransport, Transport};
