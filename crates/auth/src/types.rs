//! Request and wire types for token acquisition
//!
//! Defines the request model handed to the acquisition engine and the
//! RFC 6749 token endpoint wire shapes. The result model lives in
//! [`crate::result`], the cache record model in [`crate::cache`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Controls whether and how the interactive credentials surface is shown
///
/// Mirrors the standard prompt semantics of mobile OAuth2 libraries: the
/// cache and refresh paths are always preferred, interaction is the last
/// resort unless explicitly forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptBehavior {
    /// Prompt only if the caches and refresh tokens cannot satisfy the
    /// request. Silent entry points fail with `UserInputNeeded` instead of
    /// prompting. The surface may auto-dismiss when a session cookie
    /// already satisfies the identity provider.
    Auto,

    /// Force the interactive flow even when a session cookie would
    /// auto-dismiss it. Equivalent to requesting fresh consent.
    Always,

    /// Force the interactive flow with the `prompt=refresh_session`
    /// directive so the claims in the resulting token are up to date.
    RefreshSession,

    /// Like [`PromptBehavior::Always`], but additionally signals the
    /// surface (or a companion broker application) to force credential
    /// re-entry.
    ForcePrompt,
}

impl PromptBehavior {
    /// Value of the `prompt` authorization parameter, if one is sent
    #[must_use]
    pub fn prompt_parameter(self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Always | Self::ForcePrompt => Some("login"),
            Self::RefreshSession => Some("refresh_session"),
        }
    }

    /// Whether credential re-entry must be forced on the surface or broker
    #[must_use]
    pub fn forces_credentials(self) -> bool {
        matches!(self, Self::ForcePrompt)
    }
}

/// Assertion flavor accepted by the non-interactive assertion grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssertionType {
    /// SAML 1.1 bearer assertion
    Saml11,
    /// SAML 2.0 bearer assertion
    Saml2,
}

impl AssertionType {
    /// RFC 7522 grant type URN for the assertion flavor
    #[must_use]
    pub fn grant_type(self) -> &'static str {
        match self {
            Self::Saml11 => "urn:ietf:params:oauth:grant-type:saml1_1-bearer",
            Self::Saml2 => "urn:ietf:params:oauth:grant-type:saml2-bearer",
        }
    }
}

/// Identifies the user a request is made on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserIdentifier {
    /// Displayable identifier, typically a UPN or email address
    DisplayableId(String),
    /// Unique, immutable identifier issued by the identity provider
    UniqueId(String),
}

impl UserIdentifier {
    /// The raw identifier string, regardless of flavor
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::DisplayableId(id) | Self::UniqueId(id) => id,
        }
    }
}

impl fmt::Display for UserIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-request context replacing process-wide correlation/logging state
///
/// A fresh correlation id is generated when the caller does not supply one.
/// Cancellation is first-class: cancelling the token terminates the request
/// at its next suspension point and the delivered result is `Cancelled`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request-scoped identifier propagated to the server and echoed back
    pub correlation_id: Uuid,
    /// Name of the component issuing the request, used in log fields
    pub log_component: Option<String>,
    /// Cancellation handle observed at both suspension points
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a context with a freshly generated correlation id
    #[must_use]
    pub fn new() -> Self {
        Self { correlation_id: Uuid::new_v4(), log_component: None, cancellation: CancellationToken::new() }
    }

    /// Create a context with a caller-supplied correlation id
    #[must_use]
    pub fn with_correlation_id(correlation_id: Uuid) -> Self {
        Self { correlation_id, log_component: None, cancellation: CancellationToken::new() }
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attach a log component name
    #[must_use]
    pub fn with_log_component(mut self, component: impl Into<String>) -> Self {
        self.log_component = Some(component.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A single token acquisition request
///
/// Built by the public entry points on
/// [`AuthenticationContext`](crate::context::AuthenticationContext) or
/// directly by callers that need the full parameter set.
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    /// Resource the token is requested for
    pub resource: String,
    /// OAuth2 client identifier
    pub client_id: String,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
    /// Prompt behavior for the interactive fallback
    pub prompt: PromptBehavior,
    /// User the request is made on behalf of, if known
    pub user: Option<UserIdentifier>,
    /// Opaque extra query parameters appended to the authorization request,
    /// already in `key=value&key=value` form
    pub extra_query_params: Option<String>,
    /// URL-encoded claims challenge, passed through to the authorization
    /// endpoint. A non-empty value bypasses the access-token cache.
    pub claims: Option<String>,
    /// Assertion for the non-interactive assertion grant
    pub assertion: Option<String>,
    /// Flavor of [`AuthenticationRequest::assertion`]
    pub assertion_type: Option<AssertionType>,
    /// Request-scoped context (correlation id, cancellation, log component)
    pub context: RequestContext,
}

impl AuthenticationRequest {
    /// Create a request with defaults (`PromptBehavior::Auto`, no user,
    /// no claims, fresh context)
    #[must_use]
    pub fn new(
        resource: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            prompt: PromptBehavior::Auto,
            user: None,
            extra_query_params: None,
            claims: None,
            assertion: None,
            assertion_type: None,
            context: RequestContext::new(),
        }
    }

    /// Set the prompt behavior
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptBehavior) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the user identifier
    #[must_use]
    pub fn with_user(mut self, user: UserIdentifier) -> Self {
        self.user = Some(user);
        self
    }

    /// Set opaque extra query parameters
    #[must_use]
    pub fn with_extra_query_params(mut self, params: impl Into<String>) -> Self {
        self.extra_query_params = Some(params.into());
        self
    }

    /// Set the URL-encoded claims challenge
    #[must_use]
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        self.claims = Some(claims.into());
        self
    }

    /// Turn the request into an assertion-grant request
    #[must_use]
    pub fn with_assertion(mut self, assertion: impl Into<String>, assertion_type: AssertionType) -> Self {
        self.assertion = Some(assertion.into());
        self.assertion_type = Some(assertion_type);
        self
    }

    /// Replace the request context
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Whether a non-empty claims challenge is attached
    #[must_use]
    pub fn has_claims(&self) -> bool {
        self.claims.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Requested user id string, if a user identifier is attached
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(UserIdentifier::id)
    }

    /// Validate the parameter set before any network or UI work
    ///
    /// # Errors
    /// Returns [`AuthError::Parameter`] for a missing resource or client id,
    /// or for an interactive request without a redirect URI.
    pub fn validate(&self) -> AuthResult<()> {
        if self.resource.trim().is_empty() {
            return Err(AuthError::Parameter("resource must not be empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Parameter("client_id must not be empty".to_string()));
        }
        if self.assertion.is_none() && self.redirect_uri.trim().is_empty() {
            return Err(AuthError::Parameter(
                "redirect_uri must not be empty for interactive requests".to_string(),
            ));
        }
        if let Some(assertion) = &self.assertion {
            if assertion.trim().is_empty() {
                return Err(AuthError::Parameter("assertion must not be empty".to_string()));
            }
            if self.assertion_type.is_none() {
                return Err(AuthError::Parameter(
                    "assertion_type is required for assertion requests".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// OAuth token response from the authorization server
///
/// Standard OAuth 2.0 token response format (RFC 6749). Deserializes
/// responses from the token endpoint. The `resource` echo, when present,
/// marks the refresh token as usable across resources (multi-resource
/// refresh token).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token for API authentication
    pub access_token: String,
    /// Refresh token, if the server issued one
    pub refresh_token: Option<String>,
    /// OpenID Connect ID token, if requested
    pub id_token: Option<String>,
    /// Token type (always "Bearer" for OAuth 2.0)
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Extended lifetime window in seconds, if the server grants one
    pub ext_expires_in: Option<i64>,
    /// Resource echoed by the server; presence marks an MRRT
    pub resource: Option<String>,
    /// Granted scopes (space-separated)
    pub scope: Option<String>,
}

/// OAuth error response from the authorization server
///
/// Standard OAuth 2.0 error object shape (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorResponse {
    /// OAuth2 error code
    pub error: String,
    /// Human-readable description, if provided
    pub error_description: Option<String>,
}

impl fmt::Display for ServerErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

/// User information carried on a successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Identifier of the authenticated user
    pub user_id: String,
    /// Raw ID token the information was derived from, if any
    pub id_token: Option<String>,
}

#[cfg(test)]
mod tests {
    //! Unit tests for request and wire types.
    use super::*;

    /// Validates `PromptBehavior::prompt_parameter` behavior for the prompt
    /// parameter mapping scenario.
    ///
    /// Assertions:
    /// - Confirms `Auto` sends no prompt parameter.
    /// - Confirms `Always` and `ForcePrompt` send `login`.
    /// - Confirms `RefreshSession` sends `refresh_session`.
    #[test]
    fn test_prompt_parameter_mapping() {
        assert_eq!(PromptBehavior::Auto.prompt_parameter(), None);
        assert_eq!(PromptBehavior::Always.prompt_parameter(), Some("login"));
        assert_eq!(PromptBehavior::ForcePrompt.prompt_parameter(), Some("login"));
        assert_eq!(PromptBehavior::RefreshSession.prompt_parameter(), Some("refresh_session"));
        assert!(PromptBehavior::ForcePrompt.forces_credentials());
        assert!(!PromptBehavior::Always.forces_credentials());
    }

    /// Validates `AssertionType::grant_type` behavior for the grant type URN
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms both SAML flavors map to their RFC 7522 URNs.
    #[test]
    fn test_assertion_grant_types() {
        assert_eq!(
            AssertionType::Saml11.grant_type(),
            "urn:ietf:params:oauth:grant-type:saml1_1-bearer"
        );
        assert_eq!(
            AssertionType::Saml2.grant_type(),
            "urn:ietf:params:oauth:grant-type:saml2-bearer"
        );
    }

    /// Validates `RequestContext::new` behavior for the correlation id
    /// generation scenario.
    ///
    /// Assertions:
    /// - Ensures two fresh contexts carry distinct correlation ids.
    /// - Confirms a supplied correlation id is preserved.
    #[test]
    fn test_request_context_correlation_ids() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.correlation_id, b.correlation_id);

        let fixed = Uuid::new_v4();
        let ctx = RequestContext::with_correlation_id(fixed);
        assert_eq!(ctx.correlation_id, fixed);
    }

    /// Validates `AuthenticationRequest::validate` behavior for the parameter
    /// validation scenario.
    ///
    /// Assertions:
    /// - Ensures a well-formed request validates.
    /// - Ensures empty resource, client id, and redirect URI are rejected.
    #[test]
    fn test_request_validation() {
        let request = AuthenticationRequest::new("https://graph.example.com", "client", "app://callback");
        assert!(request.validate().is_ok());

        let missing_resource = AuthenticationRequest::new("", "client", "app://callback");
        assert!(matches!(missing_resource.validate(), Err(AuthError::Parameter(_))));

        let missing_client = AuthenticationRequest::new("https://graph.example.com", " ", "app://callback");
        assert!(matches!(missing_client.validate(), Err(AuthError::Parameter(_))));

        let missing_redirect = AuthenticationRequest::new("https://graph.example.com", "client", "");
        assert!(matches!(missing_redirect.validate(), Err(AuthError::Parameter(_))));
    }

    /// Validates `AuthenticationRequest::with_assertion` behavior for the
    /// assertion request scenario.
    ///
    /// Assertions:
    /// - Ensures an assertion request validates without a redirect URI.
    /// - Ensures an empty assertion is rejected.
    #[test]
    fn test_assertion_request_validation() {
        let request = AuthenticationRequest::new("https://graph.example.com", "client", "")
            .with_assertion("<saml/>", AssertionType::Saml2);
        assert!(request.validate().is_ok());

        let empty = AuthenticationRequest::new("https://graph.example.com", "client", "")
            .with_assertion("  ", AssertionType::Saml2);
        assert!(matches!(empty.validate(), Err(AuthError::Parameter(_))));
    }

    /// Validates `AuthenticationRequest::has_claims` behavior for the claims
    /// detection scenario.
    ///
    /// Assertions:
    /// - Ensures absent and empty claims read as no claims challenge.
    /// - Ensures a non-empty value reads as a claims challenge.
    #[test]
    fn test_has_claims() {
        let bare = AuthenticationRequest::new("r", "c", "app://cb");
        assert!(!bare.has_claims());
        assert!(!bare.clone().with_claims("").has_claims());
        assert!(bare.with_claims("%7B%22access_token%22%7D").has_claims());
    }
}
