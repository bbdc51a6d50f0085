//! Acquisition engine
//!
//! Drives a single request through the acquisition state machine:
//!
//! ```text
//! validate ─> cache lookup ─> hit, valid ──────────────────────> result
//!                  │
//!                  ├─> hit, expired / claims challenge
//!                  │         │
//!                  v         v
//!             refresh attempt (exact candidate, then wildcard)
//!                  │
//!                  ├─> success ─────────────────────────────────> result
//!                  ├─> invalid_grant ─> invalidate, next candidate
//!                  ├─> network failure ─> extended-lifetime stale?
//!                  v
//!             interactive decision
//!                  ├─> silent entry point ─> UserInputNeeded
//!                  ├─> broker available ──> broker exchange ────> result
//!                  v
//!             interactive surface ─> code exchange ─────────────> result
//! ```
//!
//! Concurrent identical requests collapse onto one in-flight operation: the
//! first becomes the leader and runs the machine, later arrivals wait and
//! receive a copy of the leader's result restamped with their own
//! correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::authority::Authority;
use crate::broker::{BrokerRequest, PendingBrokerRequests};
use crate::cache::{CacheEntry, CacheKey, TokenCache};
use crate::error::{AuthError, AuthResult, BrokerError, UiError};
use crate::interactive::InteractiveFlowCoordinator;
use crate::refresh::TokenEndpoint;
use crate::result::AuthenticationResult;
use crate::traits::{BrokerTransport, InteractiveSurface};
use crate::types::{AuthenticationRequest, PromptBehavior, RequestContext, TokenResponse};

/// Identity of an in-flight operation for request collapsing
///
/// Two requests collapse only when every field that could change the
/// outcome matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    authority: String,
    client_id: String,
    resource: String,
    user_id: Option<String>,
    prompt: PromptBehavior,
    claims: Option<String>,
    assertion: Option<String>,
    allow_interaction: bool,
}

impl FlightKey {
    fn new(authority: &Authority, request: &AuthenticationRequest, allow_interaction: bool) -> Self {
        Self {
            authority: authority.url().to_string(),
            client_id: request.client_id.clone(),
            resource: request.resource.clone(),
            user_id: request.user_id().map(String::from),
            prompt: request.prompt,
            claims: request.claims.clone(),
            assertion: request.assertion.clone(),
            allow_interaction,
        }
    }
}

/// Role a request takes in the single-flight protocol
enum FlightRole {
    Leader(broadcast::Sender<AuthenticationResult>),
    Waiter(broadcast::Receiver<AuthenticationResult>),
}

/// Token acquisition engine
///
/// Owns the cache and the in-flight bookkeeping; every collaborator that
/// touches a platform (surface, broker, store, network) is injected.
pub struct AcquisitionEngine {
    cache: Arc<TokenCache>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    surface: Option<Arc<dyn InteractiveSurface>>,
    broker: Option<Arc<dyn BrokerTransport>>,
    pending_broker: PendingBrokerRequests,
    extended_lifetime: bool,
    // One interactive surface at a time, process-wide for this engine.
    interactive_slot: tokio::sync::Mutex<()>,
    flights: Mutex<HashMap<FlightKey, broadcast::Sender<AuthenticationResult>>>,
}

impl AcquisitionEngine {
    /// Create an engine over a cache and a token endpoint
    #[must_use]
    pub fn new(cache: Arc<TokenCache>, token_endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            cache,
            token_endpoint,
            surface: None,
            broker: None,
            pending_broker: PendingBrokerRequests::new(),
            extended_lifetime: false,
            interactive_slot: tokio::sync::Mutex::new(()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an interactive authorization surface
    #[must_use]
    pub fn with_surface(mut self, surface: Arc<dyn InteractiveSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Attach a broker transport
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn BrokerTransport>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Enable serving stale tokens during outages
    #[must_use]
    pub fn with_extended_lifetime(mut self, enabled: bool) -> Self {
        self.extended_lifetime = enabled;
        self
    }

    /// The cache this engine operates on
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Forward an inbound broker response URL to the pending exchange
    ///
    /// # Errors
    /// Returns [`BrokerError`] if the response is malformed or does not
    /// match the pending exchange.
    pub fn complete_broker_response(&self, response_url: &str) -> Result<(), BrokerError> {
        self.pending_broker.complete(response_url)
    }

    /// Run a request through the state machine, collapsing onto an
    /// identical in-flight request when one exists
    pub async fn acquire(
        &self,
        authority: &Authority,
        request: AuthenticationRequest,
        allow_interaction: bool,
    ) -> AuthenticationResult {
        let correlation_id = request.context.correlation_id;
        if let Err(error) = request.validate() {
            return AuthenticationResult::from_error(&error, correlation_id);
        }

        let key = FlightKey::new(authority, &request, allow_interaction);
        // The lock scope must close before the first await so the returned
        // future stays `Send`; the guard is never held across a suspension.
        let role = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some(sender) => FlightRole::Waiter(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    flights.insert(key.clone(), sender.clone());
                    FlightRole::Leader(sender)
                }
            }
        };

        let leader_sender = match role {
            FlightRole::Waiter(mut receiver) => {
                debug!(
                    correlation_id = %correlation_id,
                    "Collapsing onto an identical in-flight request"
                );
                let result = tokio::select! {
                    () = request.context.cancellation.cancelled() => {
                        return AuthenticationResult::from_cancellation(correlation_id);
                    }
                    received = receiver.recv() => received,
                };
                return match result {
                    Ok(result) => result.with_correlation_id(correlation_id),
                    // Leader dropped without delivering a result.
                    Err(_) => AuthenticationResult::from_cancellation(correlation_id),
                };
            }
            FlightRole::Leader(sender) => sender,
        };

        let result = match self.run(authority, &request, allow_interaction).await {
            Ok(result) => result,
            Err(error) => AuthenticationResult::from_error(&error, correlation_id),
        };

        // Unregister before fanning out so a retry issued by a waiter
        // starts a fresh flight instead of collapsing onto this one.
        self.flights.lock().remove(&key);
        let _ = leader_sender.send(result.clone());
        result
    }

    async fn run(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
        allow_interaction: bool,
    ) -> AuthResult<AuthenticationResult> {
        if request.assertion.is_some() {
            return self.run_assertion(authority, request).await;
        }

        let correlation_id = request.context.correlation_id;
        let skip_silent = request.prompt.prompt_parameter().is_some();

        if !skip_silent {
            // A claims challenge means the cached access token is known to
            // be insufficient; skip the hit check but still try the
            // refresh tokens.
            if !request.has_claims() {
                if let Some(entry) = self
                    .cache
                    .lookup_with_fallback(
                        authority.url(),
                        &request.client_id,
                        &request.resource,
                        request.user_id(),
                    )
                    .await
                {
                    if !entry.is_expired() {
                        debug!(correlation_id = %correlation_id, "Cache hit with a valid access token");
                        return Ok(AuthenticationResult::from_cache_entry(&entry, correlation_id));
                    }
                }
            }

            if let Some(result) = self.try_refresh(authority, request).await? {
                return Ok(result);
            }
        }

        if !allow_interaction {
            info!(
                correlation_id = %correlation_id,
                "Silent request exhausted the cache and refresh tokens"
            );
            return Err(AuthError::UserInputNeeded);
        }

        self.interactive(authority, request).await
    }

    /// Try every refresh-token candidate, exact resource first
    ///
    /// `invalid_grant` invalidates the candidate and moves on; any other
    /// failure is surfaced immediately. Exhausting the candidates without a
    /// hard failure resolves to `None` so the caller can fall through to
    /// the interactive decision.
    async fn try_refresh(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> AuthResult<Option<AuthenticationResult>> {
        let correlation_id = request.context.correlation_id;
        let candidates = self
            .cache
            .refresh_candidates(
                authority.url(),
                &request.client_id,
                &request.resource,
                request.user_id(),
            )
            .await;

        for candidate in candidates {
            let Some(refresh_token) = candidate.refresh_token.clone() else {
                continue;
            };
            debug!(
                correlation_id = %correlation_id,
                wildcard = candidate.key().is_wildcard(),
                "Attempting refresh-token redemption"
            );

            let outcome = with_cancellation(
                &request.context,
                self.token_endpoint.redeem_refresh_token(
                    authority,
                    &request.client_id,
                    Some(&request.resource),
                    &refresh_token,
                    &request.context,
                ),
            )
            .await;

            match outcome {
                Ok(response) => {
                    let entry = self
                        .persist_token_response(authority, request, &response, Some(&candidate))
                        .await?;
                    return Ok(Some(AuthenticationResult::from_cache_entry(
                        &entry,
                        correlation_id,
                    )));
                }
                Err(error @ AuthError::InvalidGrant { .. }) => {
                    warn!(
                        correlation_id = %correlation_id,
                        error = %error,
                        "Refresh token rejected, invalidating its cache record"
                    );
                    self.cache.invalidate(&candidate.key()).await;
                }
                Err(error) => {
                    if matches!(error, AuthError::Network(_)) && self.extended_lifetime {
                        if let Some(stale) = self.extended_lifetime_fallback(authority, request).await
                        {
                            return Ok(Some(stale));
                        }
                    }
                    return Err(error);
                }
            }
        }

        Ok(None)
    }

    /// Serve the expired exact entry if it is still inside its extended
    /// lifetime window
    async fn extended_lifetime_fallback(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> Option<AuthenticationResult> {
        let key = CacheKey::exact(
            authority.url(),
            &request.client_id,
            &request.resource,
            request.user_id().map(String::from),
        );
        let entry = self.cache.lookup(&key).await?;
        if !entry.within_extended_lifetime() {
            return None;
        }
        warn!(
            correlation_id = %request.context.correlation_id,
            "Serving a stale access token under the extended lifetime policy"
        );
        Some(AuthenticationResult::from_extended_lifetime_entry(
            &entry,
            request.context.correlation_id,
        ))
    }

    /// Cache-then-refresh-then-exchange for assertion requests
    ///
    /// Assertion requests are silent by definition: a failed exchange is
    /// terminal, never a hand-off to the interactive flow.
    async fn run_assertion(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> AuthResult<AuthenticationResult> {
        let correlation_id = request.context.correlation_id;

        if !request.has_claims() {
            if let Some(entry) = self
                .cache
                .lookup_with_fallback(
                    authority.url(),
                    &request.client_id,
                    &request.resource,
                    request.user_id(),
                )
                .await
            {
                if !entry.is_expired() {
                    return Ok(AuthenticationResult::from_cache_entry(&entry, correlation_id));
                }
            }
        }

        if let Some(result) = self.try_refresh(authority, request).await? {
            return Ok(result);
        }

        // Both are present after validation.
        let (Some(assertion), Some(assertion_type)) =
            (request.assertion.as_deref(), request.assertion_type)
        else {
            return Err(AuthError::Parameter("assertion request is incomplete".to_string()));
        };

        debug!(correlation_id = %correlation_id, "Redeeming assertion at the token endpoint");
        let response = with_cancellation(
            &request.context,
            self.token_endpoint.redeem_assertion(
                authority,
                &request.client_id,
                Some(&request.resource),
                assertion,
                assertion_type,
                &request.context,
            ),
        )
        .await?;

        let entry = self.persist_token_response(authority, request, &response, None).await?;
        Ok(AuthenticationResult::from_cache_entry(&entry, correlation_id))
    }

    /// Decide between broker and in-process surface, then run the flow
    async fn interactive(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> AuthResult<AuthenticationResult> {
        if let Some(broker) = self.broker.clone() {
            if broker.is_available() {
                return self.broker_flow(broker, authority, request).await;
            }
        }

        let Some(surface) = self.surface.clone() else {
            // Nothing can show UI in this process.
            return Err(AuthError::UserInputNeeded);
        };

        let Ok(_slot) = self.interactive_slot.try_lock() else {
            return Err(AuthError::Ui(UiError::AlreadyInProgress));
        };

        let coordinator = InteractiveFlowCoordinator::new(surface, self.token_endpoint.clone());
        let response = coordinator.authorize_and_exchange(authority, request).await?;
        let entry = self.persist_token_response(authority, request, &response, None).await?;
        Ok(AuthenticationResult::from_cache_entry(&entry, request.context.correlation_id))
    }

    /// Hand the request to the broker and suspend until its response is
    /// forwarded back in, or the request is cancelled
    async fn broker_flow(
        &self,
        transport: Arc<dyn BrokerTransport>,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> AuthResult<AuthenticationResult> {
        let correlation_id = request.context.correlation_id;
        let broker_request = BrokerRequest {
            authority: authority.url().to_string(),
            client_id: request.client_id.clone(),
            resource: request.resource.clone(),
            redirect_uri: request.redirect_uri.clone(),
            user_id: request.user_id().map(String::from),
            correlation_id,
            force_credentials: request.prompt.forces_credentials(),
            claims: request.claims.clone(),
            extra_query_params: request.extra_query_params.clone(),
        };

        let receiver = self.pending_broker.register(broker_request.clone());
        info!(correlation_id = %correlation_id, "Routing interactive request to the broker");

        if let Err(error) = transport.launch(&broker_request).await {
            self.pending_broker.abandon(correlation_id);
            return Err(AuthError::Broker(error));
        }

        let outcome = tokio::select! {
            () = request.context.cancellation.cancelled() => {
                self.pending_broker.abandon(correlation_id);
                return Err(AuthError::Cancelled);
            }
            received = receiver => received.map_err(|_| AuthError::Cancelled)?,
        };

        let entry = outcome?;
        self.cache.store(entry.clone()).await?;
        // Broker refresh tokens work across resources; keep the wildcard
        // companion alongside the exact record.
        if entry.refresh_token.is_some() {
            if let Some(wildcard) = entry.to_wildcard() {
                self.cache.store(wildcard).await?;
            }
        }
        Ok(AuthenticationResult::from_cache_entry(&entry, correlation_id))
    }

    /// Store the exact entry for a token response, plus the wildcard
    /// companion when the server echoed the resource
    ///
    /// A response without a new refresh token keeps the one that earned it.
    async fn persist_token_response(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
        response: &TokenResponse,
        prior: Option<&CacheEntry>,
    ) -> AuthResult<CacheEntry> {
        let user_id = request
            .user_id()
            .map(String::from)
            .or_else(|| prior.and_then(|p| p.user_id.clone()));
        let mut entry = CacheEntry::from_token_response(
            response,
            authority.url(),
            &request.client_id,
            &request.resource,
            user_id,
        );
        if entry.refresh_token.is_none() {
            entry.refresh_token = prior.and_then(|p| p.refresh_token.clone());
        }

        self.cache.store(entry.clone()).await?;
        if response.resource.is_some() {
            if let Some(wildcard) = entry.to_wildcard() {
                self.cache.store(wildcard).await?;
            }
        }
        Ok(entry)
    }
}

/// Race a fallible operation against the request's cancellation token
pub(crate) async fn with_cancellation<T, F>(context: &RequestContext, operation: F) -> AuthResult<T>
where
    F: std::future::Future<Output = AuthResult<T>>,
{
    tokio::select! {
        () = context.cancellation.cancelled() => Err(AuthError::Cancelled),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the acquisition state machine.
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::testing::{MockTokenEndpoint, ScriptedGrant};
    use crate::types::{AssertionType, TokenResponse};

    fn authority() -> Authority {
        Authority::parse("https://login.example.com/tenant").unwrap()
    }

    fn request() -> AuthenticationRequest {
        AuthenticationRequest::new("https://graph.example.com", "client", "app://callback")
    }

    fn engine_with(endpoint: MockTokenEndpoint) -> AcquisitionEngine {
        AcquisitionEngine::new(Arc::new(TokenCache::new()), Arc::new(endpoint))
    }

    fn token_response(access_token: &str, refresh_token: Option<&str>, mrrt: bool) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(String::from),
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            ext_expires_in: None,
            resource: mrrt.then(|| "https://graph.example.com".to_string()),
            scope: None,
        }
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the silent miss
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an empty cache with no interaction allowed resolves to
    ///   `UserInputNeeded` without touching the token endpoint.
    #[tokio::test]
    async fn test_silent_miss_needs_user_input() {
        let endpoint = MockTokenEndpoint::new();
        let calls = endpoint.call_count();
        let engine = engine_with(endpoint);

        let result = engine.acquire(&authority(), request(), false).await;
        assert_eq!(result.error, Some(crate::error::ErrorKind::UserInputNeeded));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the valid cache
    /// hit scenario.
    ///
    /// Assertions:
    /// - Ensures a fresh cached access token is returned without any grant.
    #[tokio::test]
    async fn test_cache_hit_short_circuits() {
        let endpoint = MockTokenEndpoint::new();
        let calls = endpoint.call_count();
        let engine = engine_with(endpoint);

        let entry = CacheEntry {
            authority: authority().url().to_string(),
            client_id: "client".to_string(),
            resource: Some("https://graph.example.com".to_string()),
            user_id: None,
            access_token: Some("cached-at".to_string()),
            expires_at: Utc::now() + Duration::seconds(600),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        };
        engine.cache().store(entry).await.unwrap();

        let result = engine.acquire(&authority(), request(), false).await;
        assert!(result.succeeded());
        assert_eq!(result.access_token.as_deref(), Some("cached-at"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the expired entry
    /// refresh scenario.
    ///
    /// Assertions:
    /// - Ensures the refresh token is redeemed and the cache updated.
    /// - Confirms the old refresh token is kept when the response has none.
    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let endpoint = MockTokenEndpoint::new();
        endpoint.push_refresh(ScriptedGrant::Success(token_response("fresh-at", None, false)));
        let engine = engine_with(endpoint);

        let entry = CacheEntry {
            authority: authority().url().to_string(),
            client_id: "client".to_string(),
            resource: Some("https://graph.example.com".to_string()),
            user_id: None,
            access_token: Some("stale-at".to_string()),
            expires_at: Utc::now() - Duration::seconds(60),
            refresh_token: Some("old-rt".to_string()),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        };
        engine.cache().store(entry.clone()).await.unwrap();

        let result = engine.acquire(&authority(), request(), false).await;
        assert!(result.succeeded());
        assert_eq!(result.access_token.as_deref(), Some("fresh-at"));

        let updated = engine.cache().lookup(&entry.key()).await.unwrap();
        assert_eq!(updated.access_token.as_deref(), Some("fresh-at"));
        assert_eq!(updated.refresh_token.as_deref(), Some("old-rt"));
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the invalid grant
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the rejected candidate is removed from the cache.
    /// - Ensures the silent request then resolves to `UserInputNeeded`.
    #[tokio::test]
    async fn test_invalid_grant_invalidates_candidate() {
        let endpoint = MockTokenEndpoint::new();
        endpoint.push_refresh(ScriptedGrant::Failure(AuthError::InvalidGrant {
            code: "invalid_grant".to_string(),
            description: Some("revoked".to_string()),
        }));
        let engine = engine_with(endpoint);

        let entry = CacheEntry {
            authority: authority().url().to_string(),
            client_id: "client".to_string(),
            resource: Some("https://graph.example.com".to_string()),
            user_id: None,
            access_token: None,
            expires_at: Utc::now() - Duration::seconds(60),
            refresh_token: Some("revoked-rt".to_string()),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        };
        let key = entry.key();
        engine.cache().store(entry).await.unwrap();

        let result = engine.acquire(&authority(), request(), false).await;
        assert_eq!(result.error, Some(crate::error::ErrorKind::UserInputNeeded));
        assert!(engine.cache().lookup(&key).await.is_none());
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the task hand-off
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the acquisition future satisfies the `Send` bound that
    ///   `tokio::spawn` requires, with no lock guard held across an await.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_acquire_future_is_send() {
        fn require_send<F: Send>(future: F) -> F {
            future
        }

        let engine = Arc::new(engine_with(MockTokenEndpoint::new()));
        let spawned = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.acquire(&authority(), request(), false).await })
        };
        let direct = require_send(engine.acquire(&authority(), request(), false)).await;

        assert_eq!(direct.error, Some(crate::error::ErrorKind::UserInputNeeded));
        let spawned = spawned.await.unwrap();
        assert_eq!(spawned.error, Some(crate::error::ErrorKind::UserInputNeeded));
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the concurrent
    /// distinct-assertion scenario.
    ///
    /// Assertions:
    /// - Ensures requests carrying different assertions never collapse onto
    ///   one exchange.
    /// - Confirms each caller receives a token minted for its own grant.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_distinct_assertions_do_not_collapse() {
        let endpoint = MockTokenEndpoint::new();
        endpoint.set_refresh_delay(std::time::Duration::from_millis(100));
        endpoint.push_assertion(ScriptedGrant::Success(token_response("first-at", None, false)));
        endpoint.push_assertion(ScriptedGrant::Success(token_response("second-at", None, false)));
        let calls = endpoint.call_count();
        let engine = Arc::new(engine_with(endpoint));

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let req = request().with_assertion("<saml:Assertion ID=\"a\"/>", AssertionType::Saml2);
                engine.acquire(&authority(), req, false).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let req = request().with_assertion("<saml:Assertion ID=\"b\"/>", AssertionType::Saml2);
                engine.acquire(&authority(), req, false).await
            })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert!(first.succeeded());
        assert!(second.succeeded());
        assert_ne!(first.access_token, second.access_token);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    /// Validates `AcquisitionEngine::acquire` behavior for the single-flight
    /// collapse scenario.
    ///
    /// Assertions:
    /// - Ensures two concurrent identical requests produce one grant.
    /// - Confirms each result carries its own correlation id.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_requests_collapse() {
        let endpoint = MockTokenEndpoint::new();
        endpoint.set_refresh_delay(std::time::Duration::from_millis(100));
        endpoint.push_refresh(ScriptedGrant::Success(token_response("shared-at", Some("rt2"), true)));
        let calls = endpoint.call_count();
        let engine = Arc::new(engine_with(endpoint));

        let entry = CacheEntry {
            authority: authority().url().to_string(),
            client_id: "client".to_string(),
            resource: Some("https://graph.example.com".to_string()),
            user_id: None,
            access_token: None,
            expires_at: Utc::now() - Duration::seconds(60),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        };
        engine.cache().store(entry).await.unwrap();

        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let req = request()
                    .with_context(crate::types::RequestContext::with_correlation_id(first_id));
                engine.acquire(&authority(), req, false).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let req = request()
                    .with_context(crate::types::RequestContext::with_correlation_id(second_id));
                engine.acquire(&authority(), req, false).await
            })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert!(first.succeeded());
        assert!(second.succeeded());
        assert_eq!(first.access_token, second.access_token);
        assert_eq!(first.correlation_id, first_id);
        assert_eq!(second.correlation_id, second_id);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
