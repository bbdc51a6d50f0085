//! Token endpoint client for silent grants
//!
//! Handles the non-interactive grant exchanges against the authority's token
//! endpoint:
//! - Refresh token redemption
//! - Authorization code redemption
//! - SAML assertion redemption (RFC 7522)
//!
//! Errors are classified before they leave this module: `invalid_grant`
//! becomes [`AuthError::InvalidGrant`] so the engine can invalidate the cache
//! record that supplied the credential, every other protocol error becomes
//! [`AuthError::Server`], and transport failures become
//! [`AuthError::Network`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::authority::Authority;
use crate::error::{AuthError, AuthResult};
use crate::types::{AssertionType, RequestContext, ServerErrorResponse, TokenResponse};

/// Correlation header echoed to the token endpoint
const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Non-interactive grant exchanges against a token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Redeem a refresh token for a new token response
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidGrant`] if the server rejects the token,
    /// [`AuthError::Server`] for other protocol errors, and
    /// [`AuthError::Network`] for transport failures.
    async fn redeem_refresh_token(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        refresh_token: &str,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse>;

    /// Redeem an authorization code obtained from an interactive flow
    ///
    /// # Errors
    /// Same classification as [`TokenEndpoint::redeem_refresh_token`].
    async fn redeem_authorization_code(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        redirect_uri: &str,
        code: &str,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse>;

    /// Redeem a SAML assertion (RFC 7522)
    ///
    /// # Errors
    /// Same classification as [`TokenEndpoint::redeem_refresh_token`].
    async fn redeem_assertion(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        assertion: &str,
        assertion_type: AssertionType,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse>;
}

/// Reqwest-backed [`TokenEndpoint`] implementation
#[derive(Debug, Clone)]
pub struct SilentRefreshClient {
    client: Client,
}

impl Default for SilentRefreshClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SilentRefreshClient {
    /// Create a client with a 30-second request timeout
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// POST a grant to the token endpoint and classify the outcome
    async fn post_grant(
        &self,
        authority: &Authority,
        params: &[(String, String)],
        context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        let endpoint = authority.token_endpoint();
        debug!(
            correlation_id = %context.correlation_id,
            endpoint = %endpoint,
            grant_type = params
                .iter()
                .find(|(k, _)| k == "grant_type")
                .map_or("", |(_, v)| v.as_str()),
            "Posting grant to token endpoint"
        );

        let response = self
            .client
            .post(&endpoint)
            .header(CLIENT_REQUEST_ID_HEADER, context.correlation_id.to_string())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_error_body(status, &body);
            warn!(
                correlation_id = %context.correlation_id,
                status = %status,
                error = %error,
                "Token endpoint rejected the grant"
            );
            return Err(error);
        }

        response.json::<TokenResponse>().await.map_err(|e| AuthError::Server {
            code: "invalid_response".to_string(),
            description: Some(format!("token response could not be decoded: {e}")),
        })
    }
}

/// Classify a non-success token endpoint body into an [`AuthError`]
///
/// `invalid_grant` gets its own variant; any other decodable OAuth2 error
/// payload maps to [`AuthError::Server`]; undecodable bodies map to a
/// synthetic `http_<status>` server error.
fn classify_error_body(status: StatusCode, body: &str) -> AuthError {
    match serde_json::from_str::<ServerErrorResponse>(body) {
        Ok(payload) if payload.error == "invalid_grant" => AuthError::InvalidGrant {
            code: payload.error,
            description: payload.error_description,
        },
        Ok(payload) => AuthError::Server {
            code: payload.error,
            description: payload.error_description,
        },
        Err(_) => AuthError::Server {
            code: format!("http_{}", status.as_u16()),
            description: (!body.is_empty()).then(|| body.to_string()),
        },
    }
}

#[async_trait]
impl TokenEndpoint for SilentRefreshClient {
    async fn redeem_refresh_token(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        refresh_token: &str,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        let mut params = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), client_id.to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        if let Some(resource) = resource {
            params.push(("resource".to_string(), resource.to_string()));
        }

        self.post_grant(authority, &params, context).await
    }

    async fn redeem_authorization_code(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        redirect_uri: &str,
        code: &str,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        let mut params = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("client_id".to_string(), client_id.to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
        ];
        if let Some(resource) = resource {
            params.push(("resource".to_string(), resource.to_string()));
        }

        self.post_grant(authority, &params, context).await
    }

    async fn redeem_assertion(
        &self,
        authority: &Authority,
        client_id: &str,
        resource: Option<&str>,
        assertion: &str,
        assertion_type: AssertionType,
        context: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        let mut params = vec![
            ("grant_type".to_string(), assertion_type.grant_type().to_string()),
            ("client_id".to_string(), client_id.to_string()),
            ("assertion".to_string(), assertion.to_string()),
        ];
        if let Some(resource) = resource {
            params.push(("resource".to_string(), resource.to_string()));
        }

        self.post_grant(authority, &params, context).await
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for token endpoint error classification.
    use super::*;

    /// Validates `classify_error_body` behavior for the invalid grant
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures `invalid_grant` payloads map to `AuthError::InvalidGrant`.
    /// - Confirms the server description survives classification.
    #[test]
    fn test_classify_invalid_grant() {
        let body = r#"{"error":"invalid_grant","error_description":"AADSTS70002: refresh token revoked"}"#;
        let error = classify_error_body(StatusCode::BAD_REQUEST, body);
        match error {
            AuthError::InvalidGrant { code, description } => {
                assert_eq!(code, "invalid_grant");
                assert!(description.unwrap().contains("revoked"));
            }
            other => panic!("expected InvalidGrant, got {other:?}"),
        }
    }

    /// Validates `classify_error_body` behavior for the generic server error
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures other OAuth2 error codes map to `AuthError::Server`.
    #[test]
    fn test_classify_server_error() {
        let body = r#"{"error":"temporarily_unavailable","error_description":null}"#;
        let error = classify_error_body(StatusCode::SERVICE_UNAVAILABLE, body);
        assert!(matches!(error, AuthError::Server { ref code, .. } if code == "temporarily_unavailable"));
    }

    /// Validates `classify_error_body` behavior for the undecodable body
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures a non-JSON body maps to a synthetic `http_<status>` code.
    #[test]
    fn test_classify_undecodable_body() {
        let error = classify_error_body(StatusCode::BAD_GATEWAY, "<html>gateway error</html>");
        assert!(matches!(error, AuthError::Server { ref code, .. } if code == "http_502"));
    }
}
