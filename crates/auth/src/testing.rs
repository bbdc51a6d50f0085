//! Mock implementations of the platform collaborator traits
//!
//! Scriptable stand-ins for the surface, store, broker transport, token
//! endpoint, and metadata source. Used by this crate's own tests and
//! available to downstream crates testing against the engine.

// Mocks keep their error surface simple; the return types say it all.
#![allow(clippy::missing_errors_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::authority::Authority;
use crate::broker::BrokerRequest;
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{AuthError, AuthResult, BrokerError, UiError};
use crate::refresh::TokenEndpoint;
use crate::traits::{
    BrokerTransport, InteractiveSurface, MetadataProvider, PersistentStore, SurfaceOutcome,
};
use crate::types::{AssertionType, RequestContext, TokenResponse};

type EntryMap = Arc<Mutex<HashMap<String, CacheEntry>>>;

/// In-memory [`PersistentStore`] with optional write-failure injection
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: EntryMap,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of persisted records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, String> {
        Ok(self.records.lock().get(&key.storage_key()).cloned())
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err("write failure injected".to_string());
        }
        self.records.lock().insert(key.storage_key(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), String> {
        self.records.lock().remove(&key.storage_key());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CacheEntry>, String> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

/// Scripted outcome of one grant exchange
#[derive(Debug, Clone)]
pub enum ScriptedGrant {
    /// Resolve with a token response
    Success(TokenResponse),
    /// Resolve with an error
    Failure(AuthError),
}

impl ScriptedGrant {
    fn resolve(self) -> AuthResult<TokenResponse> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Failure(error) => Err(error),
        }
    }
}

/// Scripted [`TokenEndpoint`] with per-grant queues and a call counter
#[derive(Default)]
pub struct MockTokenEndpoint {
    refresh: Mutex<VecDeque<ScriptedGrant>>,
    code: Mutex<VecDeque<ScriptedGrant>>,
    assertion: Mutex<VecDeque<ScriptedGrant>>,
    delay: Mutex<Option<Duration>>,
    calls: Arc<AtomicUsize>,
}

impl MockTokenEndpoint {
    /// Create an endpoint with empty scripts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next refresh-token redemption
    pub fn push_refresh(&self, outcome: ScriptedGrant) {
        self.refresh.lock().push_back(outcome);
    }

    /// Queue an outcome for the next authorization-code redemption
    pub fn push_code(&self, outcome: ScriptedGrant) {
        self.code.lock().push_back(outcome);
    }

    /// Queue an outcome for the next assertion redemption
    pub fn push_assertion(&self, outcome: ScriptedGrant) {
        self.assertion.lock().push_back(outcome);
    }

    /// Delay every grant by `delay` before resolving
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Shared counter of grant exchanges performed
    #[must_use]
    pub fn call_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    async fn next(&self, queue: &Mutex<VecDeque<ScriptedGrant>>) -> AuthResult<TokenResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = queue.lock().pop_front();
        scripted
            .map(ScriptedGrant::resolve)
            .unwrap_or_else(|| {
                Err(AuthError::Server {
                    code: "mock_exhausted".to_string(),
                    description: Some("no scripted grant outcome left".to_string()),
                })
            })
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn redeem_refresh_token(
        &self,
        _authority: &Authority,
        _client_id: &str,
        _resource: Option<&str>,
        _refresh_token: &str,
        _context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        self.next(&self.refresh).await
    }

    async fn redeem_authorization_code(
        &self,
        _authority: &Authority,
        _client_id: &str,
        _resource: Option<&str>,
        _redirect_uri: &str,
        _code: &str,
        _context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        self.next(&self.code).await
    }

    async fn redeem_assertion(
        &self,
        _authority: &Authority,
        _client_id: &str,
        _resource: Option<&str>,
        _assertion: &str,
        _assertion_type: AssertionType,
        _context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        self.next(&self.assertion).await
    }
}

/// Scripted behavior of one [`MockSurface`] presentation
#[derive(Debug, Clone)]
pub enum ScriptedSurface {
    /// Resolve with an outcome
    Resolve(SurfaceOutcome),
    /// Resolve with a surface error
    Fail(UiError),
    /// Never resolve; used to exercise cancellation
    Hang,
}

/// Scripted [`InteractiveSurface`] that records what it was asked to show
#[derive(Default)]
pub struct MockSurface {
    script: Mutex<VecDeque<ScriptedSurface>>,
    presented: Mutex<Vec<String>>,
    forced: AtomicBool,
}

impl MockSurface {
    /// Create a surface with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior for the next presentation
    pub fn push(&self, behavior: ScriptedSurface) {
        self.script.lock().push_back(behavior);
    }

    /// Authorization URLs presented so far
    #[must_use]
    pub fn presented_urls(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    /// Whether the last presentation forced credential re-entry
    #[must_use]
    pub fn last_forced_credentials(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveSurface for MockSurface {
    async fn authorize(
        &self,
        authorization_url: &str,
        _redirect_uri: &str,
        force_credentials: bool,
    ) -> Result<SurfaceOutcome, UiError> {
        self.presented.lock().push(authorization_url.to_string());
        self.forced.store(force_credentials, Ordering::SeqCst);

        let behavior = self.script.lock().pop_front();
        match behavior {
            Some(ScriptedSurface::Resolve(outcome)) => Ok(outcome),
            Some(ScriptedSurface::Fail(error)) => Err(error),
            Some(ScriptedSurface::Hang) => std::future::pending().await,
            None => Err(UiError::Surface("no scripted surface behavior left".to_string())),
        }
    }
}

/// Scripted [`BrokerTransport`] that records launched requests
#[derive(Default)]
pub struct MockBroker {
    available: AtomicBool,
    fail_launch: AtomicBool,
    launched: Mutex<Vec<BrokerRequest>>,
}

impl MockBroker {
    /// Create a transport that reports the broker as installed
    #[must_use]
    pub fn installed() -> Self {
        let broker = Self::default();
        broker.available.store(true, Ordering::SeqCst);
        broker
    }

    /// Create a transport that reports no broker
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Make the next launch fail
    pub fn fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Requests launched so far
    #[must_use]
    pub fn launched(&self) -> Vec<BrokerRequest> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl BrokerTransport for MockBroker {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn launch(&self, request: &BrokerRequest) -> Result<(), BrokerError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(BrokerError::Invocation("launch failure injected".to_string()));
        }
        self.launched.lock().push(request.clone());
        Ok(())
    }
}

/// [`MetadataProvider`] over a fixed allow list
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    known: Vec<String>,
}

impl StaticMetadata {
    /// Create a provider that recognizes the given authorities
    #[must_use]
    pub fn new(known: Vec<String>) -> Self {
        Self { known }
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn is_known_authority(&self, authority_url: &str) -> bool {
        self.known.iter().any(|a| a == authority_url)
    }
}
