//! Credential policy: bearer-token injection with a single refresh cycle.
//!
//! [`CredentialPolicy`] attaches `Authorization: Bearer <token>` to every
//! request. When the token is rejected as expired (a 401 response or an
//! [`AuthErrorKind::TokenExpired`] error from downstream), the policy
//! refreshes the credential exactly once and reissues the request. A
//! second rejection, or a failed refresh, surfaces the terminal
//! [`AuthErrorKind::RefreshFailed`]; the policy never loops.
//!
//! The token is scoped to the host of the first request in the call:
//! when an outer policy redirects the call to a different host, the
//! bearer token is not attached there.

use std::sync::Arc;
use std::time::SystemTime;

use http::header::AUTHORIZATION;
use http::{HeaderValue, StatusCode};

use crate::context::Context;
use crate::error::AuthErrorKind;
use crate::policy::{BoxFuture, Next, Policy};
use crate::request::Request;
use crate::response::Response;
use crate::PipelineError;

/// A bearer token with an optional expiry.
#[derive(Clone, Debug)]
pub struct AccessToken {
    /// The token value, attached as `Bearer <secret>`.
    pub secret: String,
    /// Expiry instant, when the issuer provides one.
    pub expires_on: Option<SystemTime>,
}

impl AccessToken {
    /// Create a token without an expiry.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_on: None,
        }
    }

    /// Whether the token's expiry (if any) has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_on
            .is_some_and(|expiry| SystemTime::now() >= expiry)
    }
}

/// Source of bearer tokens for the credential policy.
pub trait Credential: Send + Sync {
    /// Current token, fetching one if none is cached.
    fn token(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>>;

    /// Force-refresh after the current token was rejected.
    fn refresh(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>>;
}

/// A credential wrapping a fixed token. Refreshing returns the same
/// token; useful for API keys and tests.
#[derive(Clone, Debug)]
pub struct StaticCredential {
    token: AccessToken,
}

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret),
        }
    }
}

impl Credential for StaticCredential {
    fn token(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn refresh(&self) -> BoxFuture<'_, Result<AccessToken, PipelineError>> {
        self.token()
    }
}

/// Pipeline policy attaching bearer tokens, with one refresh-and-retry
/// on expiry.
pub struct CredentialPolicy {
    credential: Arc<dyn Credential>,
}

impl CredentialPolicy {
    pub fn new(credential: Arc<dyn Credential>) -> Self {
        Self { credential }
    }
}

/// Host the bearer token belongs to, recorded in the call context on the
/// first attempt.
#[derive(Clone, Debug)]
struct AuthorizedHost(String);

fn attach_token(request: &mut Request, token: &AccessToken) -> Result<(), PipelineError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.secret)).map_err(|_| {
        PipelineError::InvalidHeader("token is not a valid authorization header value".into())
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Whether the outcome signals a token rejected as expired.
fn token_expired(outcome: &Result<Response, PipelineError>) -> bool {
    match outcome {
        Ok(response) => response.status() == StatusCode::UNAUTHORIZED,
        Err(PipelineError::Auth {
            kind: AuthErrorKind::TokenExpired,
            ..
        }) => true,
        Err(_) => false,
    }
}

impl Policy for CredentialPolicy {
    fn send<'a>(
        &'a self,
        mut request: Request,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            let host = request.uri().host().map(str::to_owned);
            let cross_host = match (&host, ctx.extensions().get::<AuthorizedHost>()) {
                (Some(host), Some(original)) => original.0 != *host,
                _ => false,
            };
            if cross_host {
                // Redirected off the original host: the token stays home.
                tracing::debug!(
                    host = host.as_deref().unwrap_or(""),
                    "cross-host request, bearer token not attached"
                );
                return next.run(request, ctx).await;
            }
            if let Some(host) = host {
                if ctx.extensions().get::<AuthorizedHost>().is_none() {
                    ctx.extensions_mut().insert(AuthorizedHost(host));
                }
            }

            let token = self.credential.token().await?;
            attach_token(&mut request, &token)?;

            // A streaming body cannot be replayed after a rejection.
            let replay = request.try_clone();
            let outcome = next.run(request, ctx).await;
            if !token_expired(&outcome) {
                return outcome;
            }
            let Some(mut request) = replay else {
                return outcome;
            };

            tracing::warn!("bearer token rejected as expired, refreshing once");
            let token = self
                .credential
                .refresh()
                .await
                .map_err(|e| PipelineError::auth_caused_by(AuthErrorKind::RefreshFailed, e))?;
            attach_token(&mut request, &token)?;

            let outcome = next.run(request, ctx).await;
            if token_expired(&outcome) {
                return Err(PipelineError::auth(AuthErrorKind::RefreshFailed));
            }
            outcome
        })
    }
}
