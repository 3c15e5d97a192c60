//! Pipeline error types.
//!
//! This module provides [`PipelineError`], the closed error taxonomy for
//! pipeline operations. Policies handle only the error classes they own
//! (the retry policy retries transport errors, the credential policy
//! absorbs exactly one auth failure); everything else passes through the
//! chain unchanged.

/// Boxed error source preserved across wrapping.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the pipeline, its policies, and the transport.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport-level failure (connection refused, DNS, TLS, socket
    /// timeout). Retryable by default.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Credential rejected or expired.
    #[error("authentication error: {kind}")]
    Auth {
        kind: AuthErrorKind,
        #[source]
        source: Option<BoxError>,
    },

    /// The per-call deadline or the retry policy's total timeout ceiling
    /// was reached. Distinct from [`PipelineError::Cancelled`].
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller's cancellation token fired at a suspension point.
    /// A cancelled call is never retried.
    #[error("call cancelled")]
    Cancelled,

    /// A streaming response body was consumed more than once.
    #[error("response body already consumed")]
    StreamConsumed,

    /// Failure while reading a streaming response body.
    #[error("stream error: {0}")]
    Stream(String),

    /// A header produced by a policy or option was not a valid HTTP
    /// header.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Construction-time misconfiguration (bad retry parameters, bad
    /// endpoint, ...).
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Create a transport error with a cause.
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error without a cause.
    pub fn transport_msg(message: impl Into<String>) -> Self {
        PipelineError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create an auth error without a cause.
    pub fn auth(kind: AuthErrorKind) -> Self {
        PipelineError::Auth { kind, source: None }
    }

    /// Create an auth error preserving its cause.
    pub fn auth_caused_by<E>(kind: AuthErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::Auth {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Returns whether this error indicates a transient condition that may
    /// be resolved by retrying.
    ///
    /// Only transport errors are transient. Auth errors have their own
    /// single refresh cycle in the credential policy; deadline and
    /// cancellation outcomes are terminal by definition.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_pipeline::PipelineError;
    ///
    /// assert!(PipelineError::transport_msg("connection reset").is_retryable());
    /// assert!(!PipelineError::Cancelled.is_retryable());
    /// assert!(!PipelineError::DeadlineExceeded.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transport { .. })
    }
}

/// The auth failure sub-taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The attached token was rejected as expired; the credential policy
    /// will attempt exactly one refresh.
    TokenExpired,
    /// The refreshed credential was also rejected. Terminal.
    RefreshFailed,
    /// The credential was rejected for a non-expiry reason.
    Rejected,
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthErrorKind::TokenExpired => write!(f, "token expired or is invalid"),
            AuthErrorKind::RefreshFailed => write!(f, "token refresh failed"),
            AuthErrorKind::Rejected => write!(f, "credential rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        assert!(PipelineError::transport_msg("connection refused").is_retryable());
    }

    #[test]
    fn test_terminal_kinds_not_retryable() {
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::DeadlineExceeded.is_retryable());
        assert!(!PipelineError::auth(AuthErrorKind::TokenExpired).is_retryable());
        assert!(!PipelineError::StreamConsumed.is_retryable());
        assert!(!PipelineError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PipelineError::transport("request failed", io);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("refused"));
    }

    #[test]
    fn test_auth_kind_display() {
        let err = PipelineError::auth(AuthErrorKind::RefreshFailed);
        assert!(err.to_string().contains("token refresh failed"));
    }

    #[test]
    fn test_auth_source_chain_preserved() {
        let cause = PipelineError::transport_msg("token endpoint unreachable");
        let err = PipelineError::auth_caused_by(AuthErrorKind::RefreshFailed, cause);
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("token endpoint unreachable"));
    }
}
