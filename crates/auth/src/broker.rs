//! Broker request/response wire format and the pending-request registry
//!
//! A broker is a separate system application that performs authentication on
//! behalf of this process. The exchange is asymmetric: the request is handed
//! to the broker through a [`BrokerTransport`](crate::traits::BrokerTransport)
//! and the process suspends, while the response arrives later as an inbound
//! URL the host application forwards to
//! [`AuthenticationContext::handle_broker_response`]. The correlation id is
//! the thread that ties the two halves together.
//!
//! [`AuthenticationContext::handle_broker_response`]:
//!     crate::context::AuthenticationContext::handle_broker_response

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::CacheEntry;
use crate::error::{AuthError, AuthResult, BrokerError};

/// Identifies which inbound URLs belong to the broker exchange
///
/// The host application consults [`BrokerContract::matches`] before routing
/// an inbound URL here; URLs from other sources keep flowing through the
/// application's own handling.
#[derive(Debug, Clone)]
pub struct BrokerContract {
    /// System identifier of the broker application
    pub source_application: String,
    /// URL scheme the broker responds on
    pub response_scheme: String,
}

impl BrokerContract {
    /// Whether an inbound URL is a broker response under this contract
    ///
    /// Pure predicate over the URL and the reported source application; no
    /// pending-request state is consulted.
    #[must_use]
    pub fn matches(&self, url: &str, source_application: Option<&str>) -> bool {
        let scheme_matches = url
            .split_once("://")
            .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case(&self.response_scheme));
        let source_matches = source_application.is_some_and(|s| s == self.source_application);
        scheme_matches && source_matches
    }
}

/// Request handed to the broker application
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    /// Canonical authority URL
    pub authority: String,
    /// OAuth2 client identifier
    pub client_id: String,
    /// Resource the token is requested for
    pub resource: String,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
    /// User the request is made on behalf of, if known
    pub user_id: Option<String>,
    /// Correlation id the response must round-trip
    pub correlation_id: Uuid,
    /// Force credential re-entry in the broker
    pub force_credentials: bool,
    /// URL-encoded claims challenge, passed through verbatim
    pub claims: Option<String>,
    /// Opaque extra query parameters, passed through verbatim
    pub extra_query_params: Option<String>,
}

impl BrokerRequest {
    /// Wire form of the request, as a query string
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            ("authority".to_string(), self.authority.clone()),
            ("client_id".to_string(), self.client_id.clone()),
            ("resource".to_string(), self.resource.clone()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
            ("correlation_id".to_string(), self.correlation_id.to_string()),
        ];
        if let Some(user_id) = &self.user_id {
            params.push(("username".to_string(), user_id.clone()));
        }
        if self.force_credentials {
            params.push(("force".to_string(), "YES".to_string()));
        }

        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        if let Some(claims) = self.claims.as_deref().filter(|c| !c.is_empty()) {
            query.push_str("&claims=");
            query.push_str(claims);
        }
        if let Some(extra) = self.extra_query_params.as_deref().filter(|e| !e.is_empty()) {
            query.push('&');
            query.push_str(extra.trim_start_matches('&'));
        }
        query
    }
}

/// Parsed broker response
#[derive(Debug, Clone)]
pub struct BrokerResponse {
    /// Correlation id echoed from the request
    pub correlation_id: Uuid,
    /// Access token, on success
    pub access_token: Option<String>,
    /// Refresh token, if the broker obtained one
    pub refresh_token: Option<String>,
    /// ID token, if present
    pub id_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: Option<i64>,
    /// Absolute expiry as a unix timestamp, sent by some broker versions
    pub expires_on: Option<i64>,
    /// Resource the token is valid for; presence marks an MRRT
    pub resource: Option<String>,
    /// Authenticated user
    pub user_id: Option<String>,
    /// OAuth2 error code, on failure
    pub error: Option<String>,
    /// OAuth2 error description, on failure
    pub error_description: Option<String>,
}

impl BrokerResponse {
    /// Parse a broker response URL
    ///
    /// # Errors
    /// Returns [`BrokerError::Malformed`] if the URL is unparseable or the
    /// correlation id is missing or invalid.
    pub fn from_url(url: &str) -> Result<Self, BrokerError> {
        let parsed = Url::parse(url)
            .map_err(|e| BrokerError::Malformed(format!("unparseable response URL: {e}")))?;
        let map: HashMap<String, String> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self::from_map(&map)
    }

    /// Parse a broker response from its key-value form
    ///
    /// # Errors
    /// Returns [`BrokerError::Malformed`] if the correlation id is missing
    /// or invalid.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, BrokerError> {
        let correlation_id = map
            .get("correlation_id")
            .ok_or_else(|| BrokerError::Malformed("missing correlation_id".to_string()))
            .and_then(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|_| BrokerError::Malformed(format!("invalid correlation_id '{raw}'")))
            })?;

        let integer = |key: &str| map.get(key).and_then(|v| v.parse::<i64>().ok());

        Ok(Self {
            correlation_id,
            access_token: map.get("access_token").cloned(),
            refresh_token: map.get("refresh_token").cloned(),
            id_token: map.get("id_token").cloned(),
            expires_in: integer("expires_in"),
            expires_on: integer("expires_on"),
            resource: map.get("resource").cloned(),
            user_id: map.get("user_id").cloned(),
            error: map.get("error").cloned(),
            error_description: map.get("error_description").cloned(),
        })
    }

    /// Convert the response into a cache record for the originating request
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidGrant`] or [`AuthError::Server`] when the
    /// broker reports an OAuth2 error, and [`BrokerError::Malformed`] when a
    /// success response lacks an access token.
    pub fn into_cache_entry(self, request: &BrokerRequest) -> AuthResult<CacheEntry> {
        if let Some(error) = self.error {
            if error == "invalid_grant" {
                return Err(AuthError::InvalidGrant {
                    code: error,
                    description: self.error_description,
                });
            }
            return Err(AuthError::Server { code: error, description: self.error_description });
        }

        let access_token = self.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::Broker(BrokerError::Malformed(
                "success response without an access token".to_string(),
            ))
        })?;

        let expires_at = match (self.expires_in, self.expires_on) {
            (Some(seconds), _) => Utc::now() + Duration::seconds(seconds),
            (None, Some(timestamp)) => Utc
                .timestamp_opt(timestamp, 0)
                .single()
                .unwrap_or_else(|| Utc::now() + Duration::seconds(3600)),
            (None, None) => Utc::now() + Duration::seconds(3600),
        };

        Ok(CacheEntry {
            authority: request.authority.clone(),
            client_id: request.client_id.clone(),
            resource: Some(self.resource.unwrap_or_else(|| request.resource.clone())),
            user_id: self.user_id.or_else(|| request.user_id.clone()),
            access_token: Some(access_token),
            expires_at,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        })
    }
}

struct PendingExchange {
    request: BrokerRequest,
    sender: oneshot::Sender<AuthResult<CacheEntry>>,
}

/// Registry of in-flight broker exchanges, keyed by correlation id
#[derive(Default)]
pub struct PendingBrokerRequests {
    pending: Mutex<HashMap<Uuid, PendingExchange>>,
}

impl PendingBrokerRequests {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing request and obtain the receiver its response
    /// will be delivered on
    pub fn register(&self, request: BrokerRequest) -> oneshot::Receiver<AuthResult<CacheEntry>> {
        let (sender, receiver) = oneshot::channel();
        let correlation_id = request.correlation_id;
        self.pending.lock().insert(correlation_id, PendingExchange { request, sender });
        debug!(correlation_id = %correlation_id, "Broker exchange registered");
        receiver
    }

    /// Drop a registered exchange without completing it
    pub fn abandon(&self, correlation_id: Uuid) {
        self.pending.lock().remove(&correlation_id);
    }

    /// Complete the exchange matching an inbound response URL
    ///
    /// # Errors
    /// Returns [`BrokerError::CorrelationMismatch`] when the response's
    /// correlation id does not match the pending exchange, and
    /// [`BrokerError::Malformed`] when the response is undecodable or no
    /// exchange is pending.
    pub fn complete(&self, response_url: &str) -> Result<(), BrokerError> {
        let response = BrokerResponse::from_url(response_url)?;
        let received = response.correlation_id;

        let exchange = {
            let mut pending = self.pending.lock();
            match pending.remove(&received) {
                Some(exchange) => exchange,
                None => {
                    // A lone pending exchange makes this a correlation
                    // mismatch rather than a spurious response.
                    if pending.len() == 1 {
                        let expected = pending.keys().next().copied().unwrap_or_default();
                        warn!(
                            expected = %expected,
                            received = %received,
                            "Broker response correlation id does not match the pending exchange"
                        );
                        return Err(BrokerError::CorrelationMismatch {
                            expected: expected.to_string(),
                            received: received.to_string(),
                        });
                    }
                    return Err(BrokerError::Malformed(format!(
                        "no pending broker exchange for correlation id {received}"
                    )));
                }
            }
        };

        debug!(correlation_id = %received, "Broker exchange completed");
        let outcome = response.into_cache_entry(&exchange.request);
        // The waiter may have been cancelled; a closed channel is fine.
        let _ = exchange.sender.send(outcome);
        Ok(())
    }
}
