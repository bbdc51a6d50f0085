//! Authentication context, the public entry surface of the crate
//!
//! An [`AuthenticationContext`] binds one authority to a token cache, a
//! token endpoint, and the optional platform collaborators (interactive
//! surface, broker transport, persistent store, metadata provider). All
//! acquisition entry points funnel into the
//! [`AcquisitionEngine`](crate::engine::AcquisitionEngine) and resolve to an
//! [`AuthenticationResult`], never a panic or an unhandled fault.

use std::sync::Arc;

use tracing::{debug, info};

use crate::authority::{Authority, AuthorityResolver};
use crate::broker::BrokerContract;
use crate::cache::{CacheEntry, TokenCache};
use crate::engine::AcquisitionEngine;
use crate::error::{AuthResult, BrokerError};
use crate::refresh::{SilentRefreshClient, TokenEndpoint};
use crate::result::AuthenticationResult;
use crate::traits::{BrokerTransport, InteractiveSurface, MetadataProvider, PersistentStore};
use crate::types::{AssertionType, AuthenticationRequest, UserIdentifier};

/// Builder for [`AuthenticationContext`]
pub struct AuthenticationContextBuilder {
    authority: String,
    validate_authority: bool,
    metadata_provider: Option<Arc<dyn MetadataProvider>>,
    store: Option<Arc<dyn PersistentStore>>,
    surface: Option<Arc<dyn InteractiveSurface>>,
    broker: Option<Arc<dyn BrokerTransport>>,
    broker_contract: Option<BrokerContract>,
    token_endpoint: Option<Arc<dyn TokenEndpoint>>,
    extended_lifetime: bool,
    log_component: Option<String>,
}

impl AuthenticationContextBuilder {
    /// Require the authority to pass metadata validation before use
    #[must_use]
    pub fn validate_authority(mut self, validate: bool) -> Self {
        self.validate_authority = validate;
        self
    }

    /// Attach the metadata source used for authority validation
    #[must_use]
    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata_provider = Some(provider);
        self
    }

    /// Attach a persistent cache store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an interactive authorization surface
    #[must_use]
    pub fn with_surface(mut self, surface: Arc<dyn InteractiveSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Attach a broker transport and the contract for routing its responses
    #[must_use]
    pub fn with_broker(
        mut self,
        transport: Arc<dyn BrokerTransport>,
        contract: BrokerContract,
    ) -> Self {
        self.broker = Some(transport);
        self.broker_contract = Some(contract);
        self
    }

    /// Replace the token endpoint implementation
    ///
    /// Defaults to the HTTP-backed [`SilentRefreshClient`].
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    /// Allow serving stale tokens during server outages
    #[must_use]
    pub fn extended_lifetime(mut self, enabled: bool) -> Self {
        self.extended_lifetime = enabled;
        self
    }

    /// Name the component issuing requests through this context
    #[must_use]
    pub fn with_log_component(mut self, component: impl Into<String>) -> Self {
        self.log_component = Some(component.into());
        self
    }

    /// Build the context
    ///
    /// # Errors
    /// Returns [`AuthError::Authority`](crate::error::AuthError::Authority)
    /// if the authority URL does not parse.
    pub fn build(self) -> AuthResult<AuthenticationContext> {
        let authority = Authority::parse(&self.authority)?;
        let cache = Arc::new(match self.store {
            Some(store) => TokenCache::with_store(store),
            None => TokenCache::new(),
        });
        let token_endpoint = self
            .token_endpoint
            .unwrap_or_else(|| Arc::new(SilentRefreshClient::new()));

        let mut engine = AcquisitionEngine::new(Arc::clone(&cache), token_endpoint)
            .with_extended_lifetime(self.extended_lifetime);
        if let Some(surface) = self.surface {
            engine = engine.with_surface(surface);
        }
        if let Some(broker) = self.broker {
            engine = engine.with_broker(broker);
        }

        info!(authority = authority.url(), "Authentication context created");
        Ok(AuthenticationContext {
            authority,
            validate_authority: self.validate_authority,
            resolver: AuthorityResolver::new(self.metadata_provider),
            engine,
            broker_contract: self.broker_contract,
            log_component: self.log_component,
        })
    }
}

/// Token acquisition entry surface bound to one authority
pub struct AuthenticationContext {
    authority: Authority,
    validate_authority: bool,
    resolver: AuthorityResolver,
    engine: AcquisitionEngine,
    broker_contract: Option<BrokerContract>,
    log_component: Option<String>,
}

impl AuthenticationContext {
    /// Start building a context for `authority`
    #[must_use]
    pub fn builder(authority: impl Into<String>) -> AuthenticationContextBuilder {
        AuthenticationContextBuilder {
            authority: authority.into(),
            validate_authority: false,
            metadata_provider: None,
            store: None,
            surface: None,
            broker: None,
            broker_contract: None,
            token_endpoint: None,
            extended_lifetime: false,
            log_component: None,
        }
    }

    /// Create a context with defaults for `authority`
    ///
    /// # Errors
    /// Returns [`AuthError::Authority`](crate::error::AuthError::Authority)
    /// if the authority URL does not parse.
    pub fn new(authority: impl Into<String>) -> AuthResult<Self> {
        Self::builder(authority).build()
    }

    /// The canonical authority this context is bound to
    #[must_use]
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Warm the in-memory cache from the persistent store
    ///
    /// Returns the number of records loaded.
    ///
    /// # Errors
    /// Returns [`AuthError::Store`](crate::error::AuthError::Store) if the
    /// store enumeration fails.
    pub async fn initialize(&self) -> AuthResult<usize> {
        self.engine.cache().initialize().await
    }

    /// Acquire a token, falling back to interaction when the silent paths
    /// cannot satisfy the request
    pub async fn acquire_token(&self, request: AuthenticationRequest) -> AuthenticationResult {
        self.acquire(request, true).await
    }

    /// Acquire a token for `resource` with default request options
    pub async fn acquire_token_with_resource(
        &self,
        resource: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> AuthenticationResult {
        self.acquire_token(AuthenticationRequest::new(resource, client_id, redirect_uri)).await
    }

    /// Acquire a token without ever showing UI
    ///
    /// Resolves to a `UserInputNeeded` error result when the cache and
    /// refresh tokens cannot satisfy the request.
    pub async fn acquire_token_silent(
        &self,
        request: AuthenticationRequest,
    ) -> AuthenticationResult {
        self.acquire(request, false).await
    }

    /// Silently acquire a token for `resource` on behalf of `user`
    pub async fn acquire_token_silent_for(
        &self,
        resource: impl Into<String>,
        client_id: impl Into<String>,
        user: Option<UserIdentifier>,
    ) -> AuthenticationResult {
        // Silent requests never reach the authorization endpoint; the OOB
        // URN satisfies validation without naming a real redirect target.
        let mut request =
            AuthenticationRequest::new(resource, client_id, "urn:ietf:wg:oauth:2.0:oob");
        if let Some(user) = user {
            request = request.with_user(user);
        }
        self.acquire_token_silent(request).await
    }

    /// Acquire a token by redeeming a SAML assertion
    ///
    /// Non-interactive: a rejected assertion is terminal.
    pub async fn acquire_token_for_assertion(
        &self,
        assertion: impl Into<String>,
        assertion_type: AssertionType,
        resource: impl Into<String>,
        client_id: impl Into<String>,
        user: Option<UserIdentifier>,
    ) -> AuthenticationResult {
        let mut request = AuthenticationRequest::new(resource, client_id, String::new())
            .with_assertion(assertion, assertion_type);
        if let Some(user) = user {
            request = request.with_user(user);
        }
        self.acquire(request, false).await
    }

    /// Whether an inbound URL is a broker response for this context
    ///
    /// Pure predicate; no pending-exchange state is consulted. Always false
    /// when the context has no broker contract.
    #[must_use]
    pub fn is_response_from_broker(&self, url: &str, source_application: Option<&str>) -> bool {
        self.broker_contract
            .as_ref()
            .is_some_and(|contract| contract.matches(url, source_application))
    }

    /// Forward an inbound broker response URL to the suspended exchange
    ///
    /// # Errors
    /// Returns [`BrokerError`] if the response is malformed or does not
    /// match the pending exchange.
    pub fn handle_broker_response(&self, response_url: &str) -> Result<(), BrokerError> {
        self.engine.complete_broker_response(response_url)
    }

    /// Remove every cached token for `client_id`, optionally scoped to one
    /// user
    pub async fn sign_out(&self, client_id: &str, user: Option<&UserIdentifier>) {
        info!(
            authority = self.authority.url(),
            client_id,
            "Signing out and clearing cached tokens"
        );
        self.engine
            .cache()
            .invalidate_all(self.authority.url(), client_id, user.map(UserIdentifier::id))
            .await;
    }

    /// Snapshot of the cached records under this context's authority
    pub async fn cached_items(&self) -> Vec<CacheEntry> {
        let authority = self.authority.url().to_string();
        self.engine.cache().enumerate(move |entry| entry.authority == authority).await
    }

    async fn acquire(
        &self,
        mut request: AuthenticationRequest,
        allow_interaction: bool,
    ) -> AuthenticationResult {
        let correlation_id = request.context.correlation_id;
        if self.validate_authority {
            if let Err(error) = self.resolver.validate(&self.authority).await {
                return AuthenticationResult::from_error(&error, correlation_id);
            }
        }

        if request.context.log_component.is_none() {
            request.context.log_component = self.log_component.clone();
        }
        debug!(
            correlation_id = %correlation_id,
            component = request.context.log_component.as_deref().unwrap_or(""),
            resource = %request.resource,
            prompt = ?request.prompt,
            interactive = allow_interaction,
            "Token acquisition requested"
        );

        self.engine.acquire(&self.authority, request, allow_interaction).await
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the context entry surface.
    use chrono::{Duration, Utc};

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{MemoryStore, MockTokenEndpoint};

    const AUTHORITY: &str = "https://login.example.com/tenant";

    fn silent_context() -> AuthenticationContext {
        AuthenticationContext::builder(AUTHORITY)
            .with_token_endpoint(Arc::new(MockTokenEndpoint::new()))
            .build()
            .unwrap()
    }

    fn entry(resource: &str, user_id: Option<&str>) -> CacheEntry {
        CacheEntry {
            authority: AUTHORITY.to_string(),
            client_id: "client".to_string(),
            resource: Some(resource.to_string()),
            user_id: user_id.map(String::from),
            access_token: Some("at".to_string()),
            expires_at: Utc::now() + Duration::seconds(600),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        }
    }

    /// Validates `AuthenticationContext::new` behavior for the authority
    /// handling scenario.
    ///
    /// Assertions:
    /// - Ensures the authority is canonicalized on construction.
    /// - Ensures a malformed authority is rejected.
    #[test]
    fn test_context_authority_handling() {
        let context = AuthenticationContext::new("https://Login.Example.com/Tenant/").unwrap();
        assert_eq!(context.authority().url(), "https://login.example.com/Tenant");

        assert!(AuthenticationContext::new("ftp://login.example.com/tenant").is_err());
    }

    /// Validates `AuthenticationContext::acquire_token_silent_for` behavior
    /// for the cached token scenario.
    ///
    /// Assertions:
    /// - Ensures a cached valid token is returned silently.
    /// - Ensures the user scoping is honored.
    #[tokio::test]
    async fn test_silent_acquisition_from_cache() {
        let context = silent_context();
        context
            .engine
            .cache()
            .store(entry("https://graph.example.com", Some("user@example.com")))
            .await
            .unwrap();

        let hit = context
            .acquire_token_silent_for(
                "https://graph.example.com",
                "client",
                Some(UserIdentifier::DisplayableId("user@example.com".to_string())),
            )
            .await;
        assert!(hit.succeeded());

        let miss = context
            .acquire_token_silent_for(
                "https://graph.example.com",
                "client",
                Some(UserIdentifier::DisplayableId("other@example.com".to_string())),
            )
            .await;
        assert_eq!(miss.error, Some(ErrorKind::UserInputNeeded));
    }

    /// Validates `AuthenticationContext::sign_out` behavior for the cache
    /// clearing scenario.
    ///
    /// Assertions:
    /// - Ensures sign-out removes the signed-out user's records only.
    #[tokio::test]
    async fn test_sign_out_scoping() {
        let context = silent_context();
        let cache = context.engine.cache();
        cache.store(entry("https://graph.example.com", Some("a@example.com"))).await.unwrap();
        cache.store(entry("https://graph.example.com", Some("b@example.com"))).await.unwrap();

        context
            .sign_out(
                "client",
                Some(&UserIdentifier::DisplayableId("a@example.com".to_string())),
            )
            .await;

        let remaining = context.cached_items().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id.as_deref(), Some("b@example.com"));
    }

    /// Validates `AuthenticationContext::initialize` behavior for the
    /// persistent store warm-up scenario.
    ///
    /// Assertions:
    /// - Ensures persisted records become visible after initialization.
    #[tokio::test]
    async fn test_initialize_from_store() {
        let store = MemoryStore::new();
        let record = entry("https://graph.example.com", Some("user@example.com"));
        store_record(&store, &record).await;

        let context = AuthenticationContext::builder(AUTHORITY)
            .with_token_endpoint(Arc::new(MockTokenEndpoint::new()))
            .with_store(Arc::new(store))
            .build()
            .unwrap();

        assert_eq!(context.initialize().await.unwrap(), 1);
        assert_eq!(context.cached_items().await.len(), 1);
    }

    /// Validates `AuthenticationContext::is_response_from_broker` behavior
    /// for the contract-less scenario.
    ///
    /// Assertions:
    /// - Ensures the predicate is false when no broker is configured.
    #[test]
    fn test_broker_predicate_without_contract() {
        let context = silent_context();
        assert!(!context.is_response_from_broker("x-app-auth://r?c=1", Some("com.example.broker")));
    }

    async fn store_record(store: &MemoryStore, record: &CacheEntry) {
        use crate::traits::PersistentStore as _;
        store.set(&record.key(), record).await.unwrap();
    }
}
