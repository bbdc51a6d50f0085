//! Uniform result model returned to callers
//!
//! Every acquisition path — cache hit, silent refresh, assertion exchange,
//! interactive flow, broker response — funnels through the factory
//! constructors here. The caller always receives exactly one
//! [`AuthenticationResult`], success or error, never an unhandled fault.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cache::CacheEntry;
use crate::error::{AuthError, ErrorKind};
use crate::types::UserInfo;

/// Terminal status of an acquisition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    /// A token was acquired
    Succeeded,
    /// The user or caller cancelled the request
    Cancelled,
    /// The request failed; see the error kind and description
    Error,
}

/// Result of a token acquisition request
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// Terminal status
    pub status: AuthenticationStatus,
    /// Access token, on success
    pub access_token: Option<String>,
    /// Access token expiry, on success
    pub expires_at: Option<DateTime<Utc>>,
    /// Resource the token is valid for, on success
    pub resource: Option<String>,
    /// Authenticated user, when known
    pub user: Option<UserInfo>,
    /// Whether the token was served stale under the extended lifetime policy
    pub extended_lifetime_token: bool,
    /// Error kind, when `status` is not `Succeeded`
    pub error: Option<ErrorKind>,
    /// Error description, when `status` is not `Succeeded`
    pub error_description: Option<String>,
    /// Correlation id of the request this result answers
    pub correlation_id: Uuid,
}

impl AuthenticationResult {
    /// Build a success result from a cache entry
    ///
    /// The entry must carry an access token; entries without one (wildcard
    /// refresh-token records) never reach this constructor.
    #[must_use]
    pub fn from_cache_entry(entry: &CacheEntry, correlation_id: Uuid) -> Self {
        Self {
            status: AuthenticationStatus::Succeeded,
            access_token: entry.access_token.clone(),
            expires_at: Some(entry.expires_at),
            resource: entry.resource.clone(),
            user: entry.user_id.clone().map(|user_id| UserInfo {
                user_id,
                id_token: entry.id_token.clone(),
            }),
            extended_lifetime_token: false,
            error: None,
            error_description: None,
            correlation_id,
        }
    }

    /// Build a success result serving a stale token under the extended
    /// lifetime policy
    #[must_use]
    pub fn from_extended_lifetime_entry(entry: &CacheEntry, correlation_id: Uuid) -> Self {
        let mut result = Self::from_cache_entry(entry, correlation_id);
        result.expires_at = entry.extended_expires_at.or(result.expires_at);
        result.extended_lifetime_token = true;
        result
    }

    /// Build a result from an error condition
    ///
    /// [`AuthError::Cancelled`] maps to status `Cancelled`, everything else
    /// to status `Error`.
    #[must_use]
    pub fn from_error(error: &AuthError, correlation_id: Uuid) -> Self {
        if matches!(error, AuthError::Cancelled) {
            return Self::from_cancellation(correlation_id);
        }
        Self {
            status: AuthenticationStatus::Error,
            access_token: None,
            expires_at: None,
            resource: None,
            user: None,
            extended_lifetime_token: false,
            error: Some(error.kind()),
            error_description: Some(error.to_string()),
            correlation_id,
        }
    }

    /// Build a result from a user or caller cancellation
    #[must_use]
    pub fn from_cancellation(correlation_id: Uuid) -> Self {
        Self {
            status: AuthenticationStatus::Cancelled,
            access_token: None,
            expires_at: None,
            resource: None,
            user: None,
            extended_lifetime_token: false,
            error: Some(ErrorKind::UserCancelled),
            error_description: Some("Authentication was cancelled".to_string()),
            correlation_id,
        }
    }

    /// Restamp the result with another request's correlation id
    ///
    /// Used when a single underlying operation fans its result out to
    /// several collapsed waiters: each waiter keeps its own correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Whether the request succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == AuthenticationStatus::Succeeded
    }
}
