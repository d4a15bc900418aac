//! Identity provider seam.
//!
//! The [`IdentityProvider`] trait covers the parts of OpenID Connect the login
//! flow uses: discovery, the authorization-code flow, refresh, userinfo and
//! the end-session URL. The server implements it with `openidconnect`; tests
//! use an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use rootcause::prelude::Report;
use url::Url;

use crate::error::AuthError;

/// The subset of an issuer's discovery document that the flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerMetadata {
    pub issuer: Url,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Option<Url>,
    pub jwks_uri: Url,
    pub end_session_endpoint: Option<Url>,
    pub id_token_signing_algs: Vec<String>,
}

/// A tenant's ready-to-use OIDC client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    pub tenant: String,
    pub issuer: Url,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Option<Url>,
    pub jwks_uri: Url,
    pub end_session_endpoint: Option<Url>,
    pub client_id: String,
    pub redirect_uri: Url,
    pub clock_tolerance: Duration,
    pub resource: Option<String>,
    pub scopes: Vec<String>,
    /// Claim that holds the display name.
    pub name_claim: String,
    pub id_token_signing_alg: String,
}

impl ClientDescriptor {
    /// Only the authorization-code flow is used.
    pub const RESPONSE_TYPE: &'static str = "code";
    /// Tenants are public clients.
    pub const TOKEN_ENDPOINT_AUTH_METHOD: &'static str = "none";

    /// Rejects a callback `iss` parameter that names a different issuer.
    pub fn check_issuer_hint(&self, hint: Option<&str>) -> Result<(), Report<AuthError>> {
        let Some(hint) = hint.filter(|h| !h.is_empty()) else {
            return Ok(());
        };
        let expected = self.issuer.as_str().trim_end_matches('/');
        if hint.trim_end_matches('/') == expected {
            Ok(())
        } else {
            Err(AuthError::TokenExchange {
                reason: format!("issuer mismatch: expected '{expected}', got '{hint}'"),
            }
            .into())
        }
    }
}

/// A token endpoint response as returned by the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A code exchange result with every field the session needs.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Duration,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl TokenResponse {
    /// Requires access token, refresh token and expiry to all be present.
    pub fn into_grant(self) -> Result<TokenGrant, Report<AuthError>> {
        let missing = |field: &str| -> Report<AuthError> {
            AuthError::TokenExchange {
                reason: format!("provider response has no {field}"),
            }
            .into()
        };

        if self.access_token.is_empty() {
            return Err(missing("access_token"));
        }
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("refresh_token"))?;
        let expires_in = self.expires_in.ok_or_else(|| missing("expires_in"))?;

        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token,
            expires_in,
        })
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetches `{issuer}/.well-known/openid-configuration`.
    async fn discover(&self, issuer: &Url) -> Result<IssuerMetadata, Report<AuthError>>;

    /// Builds the browser redirect for the authorization-code flow.
    fn authorization_url(
        &self,
        client: &ClientDescriptor,
        state: &str,
        nonce: &str,
    ) -> Result<Url, Report<AuthError>>;

    /// Redeems `code` and validates the returned ID token against the
    /// issuer's keys, the client id and `nonce`.
    async fn exchange_code(
        &self,
        client: &ClientDescriptor,
        code: &str,
        redirect_url: &Url,
        nonce: &str,
    ) -> Result<TokenResponse, Report<AuthError>>;

    /// Returns the raw userinfo claims.
    async fn fetch_user_info(
        &self,
        client: &ClientDescriptor,
        access_token: &str,
    ) -> Result<serde_json::Value, Report<AuthError>>;

    async fn refresh(
        &self,
        client: &ClientDescriptor,
        refresh_token: &str,
    ) -> Result<TokenResponse, Report<AuthError>>;

    /// RP-initiated logout URL, if the issuer advertises an end-session
    /// endpoint.
    fn end_session_url(&self, client: &ClientDescriptor, post_logout_redirect: &Url)
    -> Option<Url>;
}
