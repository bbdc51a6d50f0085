//! Token cache with multi-resource refresh token semantics
//!
//! Keyed store of credential records. At most one entry exists per exact
//! [`CacheKey`]; storing an entry for an existing key replaces it atomically.
//! A wildcard (multi-resource refresh token) entry and an exact-resource
//! entry for the same authority/client/user may coexist; refresh-token
//! lookup prefers the exact entry's refresh token and falls back to the
//! wildcard entry's.
//!
//! All mutations serialize through a single `RwLock` per cache instance;
//! readers never observe a partially written entry. When a persistent store
//! is attached, writes go through to it before the in-memory map is updated.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::traits::PersistentStore;
use crate::types::TokenResponse;

/// Cache key: `(authority, client_id, resource | wildcard, user | anonymous)`
///
/// `resource = None` marks a multi-resource refresh token entry usable to
/// mint access tokens for any resource under the same authority/client/user.
/// `user_id = None` marks an entry not bound to a known user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Canonical authority the entry was issued under
    pub authority: String,
    /// OAuth2 client identifier
    pub client_id: String,
    /// Resource, or `None` for the MRRT wildcard
    pub resource: Option<String>,
    /// User id, or `None` for anonymous
    pub user_id: Option<String>,
}

impl CacheKey {
    /// Key for an exact-resource entry
    #[must_use]
    pub fn exact(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        resource: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            resource: Some(resource.into()),
            user_id,
        }
    }

    /// Key for the multi-resource refresh token entry
    #[must_use]
    pub fn wildcard(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self { authority: authority.into(), client_id: client_id.into(), resource: None, user_id }
    }

    /// Whether this is the MRRT wildcard key
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.resource.is_none()
    }

    /// Stable string form used as the persisted-record key
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.authority,
            self.client_id,
            self.resource.as_deref().unwrap_or("*"),
            self.user_id.as_deref().unwrap_or("*"),
        )
    }
}

/// A cached credential record
///
/// Created on the first successful token or broker response for its key,
/// replaced wholesale on every subsequent success for the same key, and
/// removed only by explicit invalidation. Never mutated field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical authority the tokens were issued under
    pub authority: String,
    /// OAuth2 client identifier
    pub client_id: String,
    /// Resource the access token is valid for, `None` on MRRT entries
    pub resource: Option<String>,
    /// User the tokens belong to, if known
    pub user_id: Option<String>,
    /// Access token; `None` on MRRT entries, which carry only a refresh token
    pub access_token: Option<String>,
    /// Access token expiry timestamp (UTC)
    pub expires_at: DateTime<Utc>,
    /// Refresh token, if the server issued one
    pub refresh_token: Option<String>,
    /// OpenID Connect ID token, if present
    pub id_token: Option<String>,
    /// Whether the refresh token is usable across resources
    pub is_mrrt: bool,
    /// Whether the access token may be served stale during a server outage
    pub is_extended_lifetime: bool,
    /// End of the extended lifetime window, if the server granted one
    pub extended_expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Build the exact-resource entry for a token response
    #[must_use]
    pub fn from_token_response(
        response: &TokenResponse,
        authority: impl Into<String>,
        client_id: impl Into<String>,
        fallback_resource: &str,
        user_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let resource =
            response.resource.clone().unwrap_or_else(|| fallback_resource.to_string());
        let extended_expires_at =
            response.ext_expires_in.filter(|s| *s > 0).map(|s| now + Duration::seconds(s));
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            resource: Some(resource),
            user_id,
            access_token: Some(response.access_token.clone()),
            expires_at: now + Duration::seconds(response.expires_in.max(0)),
            refresh_token: response.refresh_token.clone(),
            id_token: response.id_token.clone(),
            is_mrrt: false,
            is_extended_lifetime: extended_expires_at.is_some(),
            extended_expires_at,
        }
    }

    /// Derive the wildcard MRRT entry from this exact entry, if eligible
    ///
    /// Only entries that carry a refresh token usable across resources
    /// produce a wildcard companion. The companion carries no access token.
    #[must_use]
    pub fn to_wildcard(&self) -> Option<Self> {
        let refresh_token = self.refresh_token.clone()?;
        Some(Self {
            authority: self.authority.clone(),
            client_id: self.client_id.clone(),
            resource: None,
            user_id: self.user_id.clone(),
            access_token: None,
            expires_at: self.expires_at,
            refresh_token: Some(refresh_token),
            id_token: self.id_token.clone(),
            is_mrrt: true,
            is_extended_lifetime: false,
            extended_expires_at: None,
        })
    }

    /// The key this entry is stored under
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey {
            authority: self.authority.clone(),
            client_id: self.client_id.clone(),
            resource: if self.is_mrrt { None } else { self.resource.clone() },
            user_id: self.user_id.clone(),
        }
    }

    /// Whether the access token is expired (or absent) at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_none() || now >= self.expires_at
    }

    /// Whether the access token is expired or absent
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the entry is still inside its extended lifetime window
    #[must_use]
    pub fn within_extended_lifetime(&self) -> bool {
        match self.extended_expires_at {
            Some(ext) => self.access_token.is_some() && Utc::now() < ext,
            None => false,
        }
    }
}

/// Keyed store of credential records
///
/// In-memory map guarded by a single `RwLock`, optionally backed by an
/// injected [`PersistentStore`]. The cache owns what is stored; the store
/// owns how records survive process restarts.
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    store: Option<Arc<dyn PersistentStore>>,
}

impl TokenCache {
    /// Create an in-memory cache with no persistence
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), store: None }
    }

    /// Create a cache backed by a persistent store
    #[must_use]
    pub fn with_store(store: Arc<dyn PersistentStore>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), store: Some(store) }
    }

    /// Load all persisted records into memory
    ///
    /// Call once on startup. Returns the number of records loaded.
    ///
    /// # Errors
    /// Returns [`AuthError::Store`] if the persistent store enumeration fails.
    pub async fn initialize(&self) -> AuthResult<usize> {
        let Some(store) = &self.store else { return Ok(0) };
        let records = store.load_all().await.map_err(AuthError::Store)?;
        let count = records.len();
        let mut entries = self.entries.write().await;
        for record in records {
            entries.insert(record.key(), record);
        }
        info!(count, "Token cache initialized from persistent store");
        Ok(count)
    }

    /// Exact-key lookup
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Exact lookup, falling back to the wildcard entry for refresh-token
    /// retrieval
    ///
    /// Prefers an exact-resource entry that carries a refresh token, then
    /// the wildcard entry's refresh token, then an exact entry without one.
    pub async fn lookup_with_fallback(
        &self,
        authority: &str,
        client_id: &str,
        resource: &str,
        user_id: Option<&str>,
    ) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        let exact = entries
            .get(&CacheKey::exact(authority, client_id, resource, user_id.map(String::from)))
            .cloned();
        if exact.as_ref().is_some_and(|e| e.refresh_token.is_some()) {
            return exact;
        }
        let wildcard = entries
            .get(&CacheKey::wildcard(authority, client_id, user_id.map(String::from)))
            .cloned();
        if wildcard.as_ref().is_some_and(|e| e.refresh_token.is_some()) {
            return wildcard;
        }
        exact
    }

    /// Entries that can supply a refresh token, in try order
    ///
    /// Returns the exact-resource entry first, then the wildcard entry,
    /// skipping entries without a refresh token. Used by the engine's
    /// refresh-attempt step and its exact-then-wildcard tie-break.
    pub async fn refresh_candidates(
        &self,
        authority: &str,
        client_id: &str,
        resource: &str,
        user_id: Option<&str>,
    ) -> Vec<CacheEntry> {
        let entries = self.entries.read().await;
        let mut candidates = Vec::with_capacity(2);
        let exact_key = CacheKey::exact(authority, client_id, resource, user_id.map(String::from));
        if let Some(entry) = entries.get(&exact_key) {
            if entry.refresh_token.is_some() {
                candidates.push(entry.clone());
            }
        }
        let wildcard_key = CacheKey::wildcard(authority, client_id, user_id.map(String::from));
        if let Some(entry) = entries.get(&wildcard_key) {
            if entry.refresh_token.is_some() {
                candidates.push(entry.clone());
            }
        }
        candidates
    }

    /// Atomic replace-or-insert keyed by the entry's derived key
    ///
    /// # Errors
    /// Returns [`AuthError::Store`] if the persistent write-through fails;
    /// the in-memory map is not updated in that case.
    pub async fn store(&self, entry: CacheEntry) -> AuthResult<()> {
        let key = entry.key();
        if let Some(store) = &self.store {
            store.set(&key, &entry).await.map_err(AuthError::Store)?;
        }
        self.entries.write().await.insert(key.clone(), entry);
        debug!(key = %key.storage_key(), "Cache entry stored");
        Ok(())
    }

    /// Remove the entry for `key`; a missing key is a no-op
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Some(store) = &self.store {
            // Invalidation stays a no-op even if the backend delete fails.
            let _ = store.remove(key).await;
        }
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            info!(key = %key.storage_key(), "Cache entry invalidated");
        }
    }

    /// Remove every entry matching authority, client id, and user
    ///
    /// Covers both exact and wildcard entries. Used on sign-out.
    pub async fn invalidate_all(&self, authority: &str, client_id: &str, user_id: Option<&str>) {
        let keys: Vec<CacheKey> = {
            let entries = self.entries.read().await;
            entries
                .keys()
                .filter(|k| {
                    k.authority == authority
                        && k.client_id == client_id
                        && k.user_id.as_deref() == user_id
                })
                .cloned()
                .collect()
        };
        for key in keys {
            self.invalidate(&key).await;
        }
    }

    /// Snapshot of entries matching `predicate`
    ///
    /// Reflects the store state at call time; concurrent mutation does not
    /// affect an iteration already returned.
    pub async fn enumerate<F>(&self, predicate: F) -> Vec<CacheEntry>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        self.entries.read().await.values().filter(|e| predicate(e)).cloned().collect()
    }

    /// Snapshot of all entries
    pub async fn entries(&self) -> Vec<CacheEntry> {
        self.enumerate(|_| true).await
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the token cache.
    use super::*;

    fn entry(resource: &str, access: &str, refresh: Option<&str>) -> CacheEntry {
        CacheEntry {
            authority: "https://login.example.com/tenant".to_string(),
            client_id: "client".to_string(),
            resource: Some(resource.to_string()),
            user_id: Some("user@example.com".to_string()),
            access_token: Some(access.to_string()),
            expires_at: Utc::now() + Duration::seconds(3600),
            refresh_token: refresh.map(String::from),
            id_token: None,
            is_mrrt: false,
            is_extended_lifetime: false,
            extended_expires_at: None,
        }
    }

    /// Validates `TokenCache::store` behavior for the key uniqueness
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the cache holds one entry per key after repeated stores.
    /// - Confirms `lookup` returns the last stored entry for the key.
    #[tokio::test]
    async fn test_store_replaces_entry_for_same_key() {
        let cache = TokenCache::new();
        cache.store(entry("R", "first", Some("rt1"))).await.unwrap();
        cache.store(entry("R", "second", Some("rt2"))).await.unwrap();

        let all = cache.entries().await;
        assert_eq!(all.len(), 1);

        let key = CacheKey::exact(
            "https://login.example.com/tenant",
            "client",
            "R",
            Some("user@example.com".to_string()),
        );
        let found = cache.lookup(&key).await.unwrap();
        assert_eq!(found.access_token.as_deref(), Some("second"));
        assert_eq!(found.refresh_token.as_deref(), Some("rt2"));
    }

    /// Validates `TokenCache::lookup_with_fallback` behavior for the wildcard
    /// fallback scenario.
    ///
    /// Assertions:
    /// - Ensures the wildcard entry's refresh token is returned when no
    ///   exact entry exists for the resource.
    #[tokio::test]
    async fn test_wildcard_fallback() {
        let cache = TokenCache::new();
        let mut wildcard = entry("ignored", "ignored", Some("mrrt_refresh"));
        wildcard.resource = None;
        wildcard.access_token = None;
        wildcard.is_mrrt = true;
        cache.store(wildcard).await.unwrap();

        let found = cache
            .lookup_with_fallback(
                "https://login.example.com/tenant",
                "client",
                "R",
                Some("user@example.com"),
            )
            .await
            .unwrap();
        assert!(found.is_mrrt);
        assert_eq!(found.refresh_token.as_deref(), Some("mrrt_refresh"));
    }

    /// Validates `TokenCache::lookup_with_fallback` behavior for the exact
    /// preference scenario.
    ///
    /// Assertions:
    /// - Ensures the exact entry's refresh token is preferred when both an
    ///   exact and a wildcard entry exist.
    #[tokio::test]
    async fn test_exact_refresh_token_preferred_over_wildcard() {
        let cache = TokenCache::new();
        cache.store(entry("R", "at", Some("exact_refresh"))).await.unwrap();
        let mut wildcard = entry("ignored", "ignored", Some("mrrt_refresh"));
        wildcard.resource = None;
        wildcard.access_token = None;
        wildcard.is_mrrt = true;
        cache.store(wildcard).await.unwrap();

        let found = cache
            .lookup_with_fallback(
                "https://login.example.com/tenant",
                "client",
                "R",
                Some("user@example.com"),
            )
            .await
            .unwrap();
        assert!(!found.is_mrrt);
        assert_eq!(found.refresh_token.as_deref(), Some("exact_refresh"));

        let candidates = cache
            .refresh_candidates(
                "https://login.example.com/tenant",
                "client",
                "R",
                Some("user@example.com"),
            )
            .await;
        assert_eq!(candidates.len(), 2);
        assert!(!candidates[0].is_mrrt);
        assert!(candidates[1].is_mrrt);
    }

    /// Validates `TokenCache::invalidate` behavior for the idempotent
    /// invalidation scenario.
    ///
    /// Assertions:
    /// - Ensures invalidating a missing key completes as a no-op.
    /// - Ensures invalidating an existing key removes it.
    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = TokenCache::new();
        let key = CacheKey::exact("https://login.example.com/tenant", "client", "R", None);

        // Missing key: no-op, not an error
        cache.invalidate(&key).await;

        let mut item = entry("R", "at", None);
        item.user_id = None;
        cache.store(item).await.unwrap();
        cache.invalidate(&key).await;
        cache.invalidate(&key).await;
        assert!(cache.lookup(&key).await.is_none());
    }

    /// Validates `TokenCache::invalidate_all` behavior for the sign-out
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures exact and wildcard entries for the user are removed.
    /// - Ensures entries for other users survive.
    #[tokio::test]
    async fn test_invalidate_all_covers_wildcard() {
        let cache = TokenCache::new();
        cache.store(entry("R1", "at1", Some("rt"))).await.unwrap();
        cache.store(entry("R2", "at2", Some("rt"))).await.unwrap();
        let mut wildcard = entry("ignored", "ignored", Some("mrrt"));
        wildcard.resource = None;
        wildcard.access_token = None;
        wildcard.is_mrrt = true;
        cache.store(wildcard).await.unwrap();
        let mut other = entry("R1", "other", None);
        other.user_id = Some("someone-else@example.com".to_string());
        cache.store(other).await.unwrap();

        cache
            .invalidate_all(
                "https://login.example.com/tenant",
                "client",
                Some("user@example.com"),
            )
            .await;

        let remaining = cache.entries().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id.as_deref(), Some("someone-else@example.com"));
    }

    /// Validates `CacheEntry::to_wildcard` behavior for the MRRT derivation
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an entry with a refresh token derives a wildcard companion
    ///   without an access token.
    /// - Ensures an entry without a refresh token derives none.
    #[test]
    fn test_wildcard_derivation() {
        let with_refresh = entry("R", "at", Some("rt"));
        let wildcard = with_refresh.to_wildcard().unwrap();
        assert!(wildcard.is_mrrt);
        assert!(wildcard.access_token.is_none());
        assert!(wildcard.key().is_wildcard());
        assert_eq!(wildcard.refresh_token.as_deref(), Some("rt"));

        assert!(entry("R", "at", None).to_wildcard().is_none());
    }

    /// Validates `CacheEntry::is_expired_at` behavior for the expiry check
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures a fresh entry is not expired.
    /// - Ensures an entry past its expiry, or without an access token, is.
    #[test]
    fn test_expiry_check() {
        let fresh = entry("R", "at", None);
        assert!(!fresh.is_expired());

        let mut stale = entry("R", "at", None);
        stale.expires_at = Utc::now() - Duration::seconds(10);
        assert!(stale.is_expired());

        let mut tokenless = entry("R", "at", Some("rt"));
        tokenless.access_token = None;
        assert!(tokenless.is_expired());
    }

    /// Validates `TokenCache::enumerate` behavior for the snapshot
    /// enumeration scenario.
    ///
    /// Assertions:
    /// - Ensures the predicate filters the snapshot.
    #[tokio::test]
    async fn test_enumerate_with_predicate() {
        let cache = TokenCache::new();
        cache.store(entry("R1", "at1", None)).await.unwrap();
        cache.store(entry("R2", "at2", None)).await.unwrap();

        let matching = cache.enumerate(|e| e.resource.as_deref() == Some("R2")).await;
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].access_token.as_deref(), Some("at2"));
    }
}
