//! Interactive authorization flow
//!
//! Builds the authorization-endpoint URL, drives the injected
//! [`InteractiveSurface`], parses the redirect it resolves to, and redeems
//! the authorization code at the token endpoint. Cancellation is observed
//! at both suspension points, the surface hand-off and the code exchange: a
//! cancelled request resolves to [`AuthError::Cancelled`] immediately.

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::authority::Authority;
use crate::engine::with_cancellation;
use crate::error::{AuthError, AuthResult, UiError};
use crate::refresh::TokenEndpoint;
use crate::traits::{InteractiveSurface, SurfaceOutcome};
use crate::types::{AuthenticationRequest, TokenResponse};

/// Build the authorization-endpoint URL for a request
///
/// The claims challenge and extra query parameters are appended verbatim;
/// callers supply them already URL-encoded. Everything else is encoded here.
#[must_use]
pub fn build_authorization_url(authority: &Authority, request: &AuthenticationRequest) -> String {
    let mut params = vec![
        ("response_type".to_string(), "code".to_string()),
        ("client_id".to_string(), request.client_id.clone()),
        ("redirect_uri".to_string(), request.redirect_uri.clone()),
        ("resource".to_string(), request.resource.clone()),
        ("client-request-id".to_string(), request.context.correlation_id.to_string()),
    ];

    if let Some(prompt) = request.prompt.prompt_parameter() {
        params.push(("prompt".to_string(), prompt.to_string()));
    }
    if let Some(user_id) = request.user_id() {
        params.push(("login_hint".to_string(), user_id.to_string()));
    }

    let mut query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    // Pre-encoded passthrough segments.
    if let Some(claims) = request.claims.as_deref().filter(|c| !c.is_empty()) {
        query.push_str("&claims=");
        query.push_str(claims);
    }
    if let Some(extra) = request.extra_query_params.as_deref().filter(|e| !e.is_empty()) {
        query.push('&');
        query.push_str(extra.trim_start_matches('&'));
    }

    format!("{}?{}", authority.authorization_endpoint(), query)
}

/// Extract the authorization code from a redirect URL
///
/// Looks for `code`/`error` in the query string first and falls back to the
/// fragment, which some identity providers use for the response.
///
/// # Errors
/// Returns [`UiError::Authorization`] when the provider redirected back with
/// an OAuth2 error, and [`UiError::Surface`] when the redirect carries
/// neither a code nor an error.
pub fn parse_authorization_redirect(redirect_url: &str) -> Result<String, UiError> {
    let url = Url::parse(redirect_url)
        .map_err(|e| UiError::Surface(format!("unparseable redirect URL: {e}")))?;

    if let Some(found) = find_code_or_error(url.query_pairs()) {
        return found;
    }
    if let Some(fragment) = url.fragment() {
        let pairs = url::form_urlencoded::parse(fragment.as_bytes());
        if let Some(found) = find_code_or_error(pairs) {
            return found;
        }
    }

    Err(UiError::Surface(
        "redirect carried neither an authorization code nor an error".to_string(),
    ))
}

fn find_code_or_error<'a>(
    pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) -> Option<Result<String, UiError>> {
    let mut code = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in pairs {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    // An error outranks a code if the provider sent both.
    if let Some(error) = error {
        return Some(Err(UiError::Authorization { code: error, description }));
    }
    code.map(Ok)
}

/// Drives one interactive authorization round trip
pub struct InteractiveFlowCoordinator {
    surface: Arc<dyn InteractiveSurface>,
    token_endpoint: Arc<dyn TokenEndpoint>,
}

impl InteractiveFlowCoordinator {
    /// Create a coordinator over a surface and a token endpoint
    #[must_use]
    pub fn new(surface: Arc<dyn InteractiveSurface>, token_endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self { surface, token_endpoint }
    }

    /// Present the surface, parse the redirect, and redeem the code
    ///
    /// # Errors
    /// Returns [`AuthError::Cancelled`] if the request's cancellation token
    /// fires or the user dismisses the surface, [`AuthError::Ui`] for
    /// surface and redirect failures, and the token endpoint's
    /// classification for the code exchange.
    pub async fn authorize_and_exchange(
        &self,
        authority: &Authority,
        request: &AuthenticationRequest,
    ) -> AuthResult<TokenResponse> {
        let authorization_url = build_authorization_url(authority, request);
        debug!(
            correlation_id = %request.context.correlation_id,
            "Presenting interactive authorization surface"
        );

        let outcome = tokio::select! {
            () = request.context.cancellation.cancelled() => {
                info!(
                    correlation_id = %request.context.correlation_id,
                    "Interactive flow cancelled by the caller"
                );
                return Err(AuthError::Cancelled);
            }
            outcome = self.surface.authorize(
                &authorization_url,
                &request.redirect_uri,
                request.prompt.forces_credentials(),
            ) => outcome.map_err(AuthError::Ui)?,
        };

        let redirect_url = match outcome {
            SurfaceOutcome::Redirect(url) => url,
            SurfaceOutcome::Cancelled => {
                info!(
                    correlation_id = %request.context.correlation_id,
                    "User dismissed the authorization surface"
                );
                return Err(AuthError::Cancelled);
            }
        };

        if !redirect_url.starts_with(&request.redirect_uri) {
            return Err(AuthError::Ui(UiError::InvalidRedirect {
                expected: request.redirect_uri.clone(),
                received: redirect_url,
            }));
        }

        let code = parse_authorization_redirect(&redirect_url).map_err(AuthError::Ui)?;
        debug!(
            correlation_id = %request.context.correlation_id,
            "Authorization code received, exchanging at token endpoint"
        );

        // The exchange is the flow's second suspension point; cancellation
        // applies to it just as it does to the surface await above.
        with_cancellation(
            &request.context,
            self.token_endpoint.redeem_authorization_code(
                authority,
                &request.client_id,
                Some(&request.resource),
                &request.redirect_uri,
                &code,
                &request.context,
            ),
        )
        .await
    }
}
