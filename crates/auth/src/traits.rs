//! Capability traits for platform collaborators
//!
//! These traits abstract the pieces the engine must not own: the interactive
//! authorization surface, the persistent cache store, the broker transport,
//! and authority metadata. They enable dependency injection and testing; the
//! engine holds no platform type, only these interfaces.

use async_trait::async_trait;

use crate::broker::BrokerRequest;
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{BrokerError, UiError};

/// What the interactive surface resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutcome {
    /// Full redirect URL the identity provider navigated back to
    Redirect(String),
    /// The user dismissed the surface without completing sign-in
    Cancelled,
}

/// Interactive authorization surface
///
/// The engine hands over a fully built authorization URL and suspends until
/// the surface returns a redirect URL matching the redirect URI, or signals
/// cancellation. Rendering and navigation are entirely the surface's
/// concern.
#[async_trait]
pub trait InteractiveSurface: Send + Sync {
    /// Present `authorization_url` and resolve with the redirect or a
    /// cancellation signal
    ///
    /// # Arguments
    /// * `authorization_url` - Authorization-endpoint URL to navigate to
    /// * `redirect_uri` - Redirect URI the flow is expected to end on
    /// * `force_credentials` - Force credential re-entry even when a session
    ///   cookie or companion broker could satisfy the provider
    ///
    /// # Errors
    /// Returns [`UiError`] if the surface fails to present or complete.
    async fn authorize(
        &self,
        authorization_url: &str,
        redirect_uri: &str,
        force_credentials: bool,
    ) -> Result<SurfaceOutcome, UiError>;
}

/// Persistent keyed store for cache records
///
/// The cache defines what is stored (serialized [`CacheEntry`] records keyed
/// by [`CacheKey`]); the store defines how records survive process restarts.
/// Errors are surfaced as opaque strings, mirroring the fact that backends
/// differ wildly across platforms.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Retrieve the record for `key`, if present
    ///
    /// # Errors
    /// Returns an error string if the backend read fails.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, String>;

    /// Insert or replace the record for `key`
    ///
    /// # Errors
    /// Returns an error string if the backend write fails.
    async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), String>;

    /// Remove the record for `key`; missing records are not an error
    ///
    /// # Errors
    /// Returns an error string if the backend delete fails.
    async fn remove(&self, key: &CacheKey) -> Result<(), String>;

    /// Enumerate all persisted records
    ///
    /// # Errors
    /// Returns an error string if the backend enumeration fails.
    async fn load_all(&self) -> Result<Vec<CacheEntry>, String>;
}

/// Transport to a system-wide broker application
///
/// The engine defines the wire format of the broker request and response;
/// the transport owns the inter-process mechanics. Launching is fire-and-
/// forget: the response arrives out of band through
/// [`AuthenticationContext::handle_broker_response`].
///
/// [`AuthenticationContext::handle_broker_response`]:
///     crate::context::AuthenticationContext::handle_broker_response
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Whether a broker application is installed and reachable
    fn is_available(&self) -> bool;

    /// Hand the request to the broker application
    ///
    /// # Errors
    /// Returns [`BrokerError::Invocation`] if the hand-off fails.
    async fn launch(&self, request: &BrokerRequest) -> Result<(), BrokerError>;
}

/// Authority metadata source
///
/// Exposed to the core as a predicate over canonical authority URLs; the
/// network discovery behind it is a collaborator concern.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Whether `authority_url` is a known/allowed issuer
    async fn is_known_authority(&self, authority_url: &str) -> bool;
}
