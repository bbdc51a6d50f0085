//! Error types for token acquisition
//!
//! Every branch of the acquisition engine resolves to either a token or one
//! of the error kinds defined here. `InvalidGrant` is the only kind that
//! carries a cache side effect (invalidation) before being surfaced; all
//! other kinds are terminal for the current request.

use thiserror::Error;

/// Result alias used across the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Error type for authentication operations
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Malformed request (missing resource, client id, redirect URI).
    /// Fails fast; no network or UI is attempted.
    #[error("Invalid request parameter: {0}")]
    Parameter(String),

    /// Authority string rejected or not among known issuers
    #[error("Authority validation failed: {0}")]
    Authority(String),

    /// A silent-only path required user interaction
    #[error("User interaction required but the request is silent")]
    UserInputNeeded,

    /// The user dismissed the interactive flow
    #[error("Authentication was cancelled by the caller or the user")]
    Cancelled,

    /// Refresh token or assertion rejected by the server.
    /// Triggers invalidation of the cache entry that supplied the credential.
    #[error("Grant rejected by server: {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    InvalidGrant {
        /// Server error code (always `invalid_grant`)
        code: String,
        /// Server-provided error description, if any
        description: Option<String>,
    },

    /// Protocol-level error payload from the token or authorization endpoint
    #[error("Server error: {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Server {
        /// OAuth2 error code from the `error` field
        code: String,
        /// OAuth2 `error_description`, if present
        description: Option<String>,
    },

    /// Transport failure. The engine performs no automatic retry.
    #[error("Network failure: {0}")]
    Network(String),

    /// Interactive authorization surface failure
    #[error(transparent)]
    Ui(#[from] UiError),

    /// Malformed or mismatched broker payload
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Persistent store failure
    #[error("Persistent store failure: {0}")]
    Store(String),
}

/// Error type for the interactive authorization surface
#[derive(Debug, Clone, Error)]
pub enum UiError {
    /// The returned redirect URL does not match the requested redirect URI
    #[error("Redirect URI mismatch: expected prefix {expected}, received {received}")]
    InvalidRedirect {
        /// Redirect URI the request was built with
        expected: String,
        /// Redirect URL handed back by the surface
        received: String,
    },

    /// A second interactive flow was requested while one is in flight
    #[error("An interactive authorization flow is already in progress")]
    AlreadyInProgress,

    /// The authorization endpoint redirected back with an OAuth2 error
    #[error("Authorization endpoint returned {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Authorization {
        /// OAuth2 error code from the redirect
        code: String,
        /// OAuth2 `error_description` from the redirect, if present
        description: Option<String>,
    },

    /// The surface itself failed to present or complete the flow
    #[error("Authorization surface failure: {0}")]
    Surface(String),
}

/// Error type for broker response handling
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Required fields missing or undecodable
    #[error("Malformed broker response: {0}")]
    Malformed(String),

    /// The response's correlation id does not round-trip from the request
    #[error("Broker correlation id mismatch: expected {expected}, received {received}")]
    CorrelationMismatch {
        /// Correlation id of the pending request
        expected: String,
        /// Correlation id carried by the response
        received: String,
    },

    /// The broker application could not be invoked
    #[error("Broker invocation failed: {0}")]
    Invocation(String),
}

/// Coarse error classification carried on [`AuthenticationResult`]
///
/// [`AuthenticationResult`]: crate::result::AuthenticationResult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request
    Parameter,
    /// Authority rejected
    Authority,
    /// Silent path needs interaction
    UserInputNeeded,
    /// User or caller cancelled
    UserCancelled,
    /// Server rejected the grant
    InvalidGrant,
    /// Protocol-level server error
    Server,
    /// Transport failure
    Network,
    /// Interactive surface failure
    Ui,
    /// Broker payload failure
    Broker,
    /// Persistent store failure
    Store,
}

impl AuthError {
    /// Map the error to its coarse kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parameter(_) => ErrorKind::Parameter,
            Self::Authority(_) => ErrorKind::Authority,
            Self::UserInputNeeded => ErrorKind::UserInputNeeded,
            Self::Cancelled => ErrorKind::UserCancelled,
            Self::InvalidGrant { .. } => ErrorKind::InvalidGrant,
            Self::Server { .. } => ErrorKind::Server,
            Self::Network(_) => ErrorKind::Network,
            Self::Ui(_) => ErrorKind::Ui,
            Self::Broker(_) => ErrorKind::Broker,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether the failure is transient from the engine's point of view
    ///
    /// Transient errors never trigger the interactive fallback; they are
    /// surfaced as-is so the caller can decide on a retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}
