//! Authority parsing, canonicalization, and validation
//!
//! An authority is the issuer base URL (`https://login.example.com/tenant`).
//! Endpoints are derived from it; validation consults a [`MetadataProvider`]
//! and remembers successful outcomes for the lifetime of the process so each
//! authority is checked at most once.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::traits::MetadataProvider;

/// Authorities that already passed validation in this process
static VALIDATED_AUTHORITIES: Lazy<Mutex<HashSet<String>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// A parsed, canonical authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    canonical: String,
}

impl Authority {
    /// Parse and canonicalize an authority URL
    ///
    /// Canonicalization lowercases the host and strips any trailing slash.
    /// Authorities must use `https` (plain `http` is tolerated for loopback
    /// hosts only) and carry a non-empty path, the tenant segment.
    ///
    /// # Arguments
    /// * `raw` - Authority URL as supplied by the caller
    ///
    /// # Errors
    /// Returns [`AuthError::Authority`] if the URL is unparseable, uses a
    /// disallowed scheme, or lacks a tenant path.
    pub fn parse(raw: &str) -> AuthResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| AuthError::Authority(format!("unparseable authority '{raw}': {e}")))?;

        let host = url
            .host_str()
            .ok_or_else(|| AuthError::Authority(format!("authority '{raw}' has no host")))?
            .to_lowercase();

        let loopback = matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]");
        if url.scheme() != "https" && !(url.scheme() == "http" && loopback) {
            return Err(AuthError::Authority(format!(
                "authority must use https, got '{}'",
                url.scheme()
            )));
        }

        let path = url.path().trim_end_matches('/');
        if path.is_empty() {
            return Err(AuthError::Authority(format!(
                "authority '{raw}' is missing the tenant path segment"
            )));
        }

        let mut canonical = format!("{}://{host}", url.scheme());
        if let Some(port) = url.port() {
            canonical.push_str(&format!(":{port}"));
        }
        canonical.push_str(path);
        Ok(Self { canonical })
    }

    /// Canonical authority URL without a trailing slash
    #[must_use]
    pub fn url(&self) -> &str {
        &self.canonical
    }

    /// Authorization endpoint derived from the authority
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.canonical)
    }

    /// Token endpoint derived from the authority
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.canonical)
    }
}

/// Validates authorities against a metadata source
///
/// Validation is opt-in per context. When enabled without a
/// [`MetadataProvider`], every authority is rejected: the resolver never
/// silently downgrades to "trust everything".
pub struct AuthorityResolver {
    provider: Option<Arc<dyn MetadataProvider>>,
}

impl AuthorityResolver {
    /// Create a resolver backed by an optional metadata provider
    #[must_use]
    pub fn new(provider: Option<Arc<dyn MetadataProvider>>) -> Self {
        Self { provider }
    }

    /// Validate a canonical authority, consulting the process-wide cache
    /// of already-validated authorities first
    ///
    /// # Arguments
    /// * `authority` - Parsed authority to validate
    ///
    /// # Errors
    /// Returns [`AuthError::Authority`] if no metadata provider is
    /// configured or the provider does not recognize the authority.
    pub async fn validate(&self, authority: &Authority) -> AuthResult<()> {
        if VALIDATED_AUTHORITIES.lock().contains(authority.url()) {
            debug!(authority = authority.url(), "Authority already validated");
            return Ok(());
        }

        let provider = self.provider.as_ref().ok_or_else(|| {
            AuthError::Authority(
                "authority validation requested but no metadata provider is configured"
                    .to_string(),
            )
        })?;

        if provider.is_known_authority(authority.url()).await {
            VALIDATED_AUTHORITIES.lock().insert(authority.url().to_string());
            debug!(authority = authority.url(), "Authority validated");
            Ok(())
        } else {
            warn!(authority = authority.url(), "Authority rejected by metadata provider");
            Err(AuthError::Authority(format!(
                "'{}' is not a known authority",
                authority.url()
            )))
        }
    }
}
