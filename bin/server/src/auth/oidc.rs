//! Identity provider implementation using the openidconnect crate.
//!
//! Tenants are public clients, so each call builds a `CoreClient` from the
//! tenant's [`ClientDescriptor`] instead of holding one per provider. Key sets
//! used to check ID tokens are cached per `jwks_uri` for the process lifetime
//! and reloaded once when a signature does not verify.

use std::borrow::Cow;
use std::fmt::Display;

use async_trait::async_trait;
use chrono::Utc;
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreJsonWebKeySet, CoreJwsSigningAlgorithm,
};
use openidconnect::{
    AuthUrl, AuthorizationCode, ClaimsVerificationError, ClientId, CsrfToken, EndSessionUrl,
    ErrorResponse, IssuerUrl, JsonWebKeySetUrl, LogoutRequest, Nonce, OAuth2TokenResponse,
    PostLogoutRedirectUrl, ProviderMetadataWithLogout, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse as _, TokenUrl,
};
use rootcause::prelude::Report;
use tenant_gate_access::{
    AuthError, ClientDescriptor, IdentityProvider, IssuerMetadata, KeyedCache, TokenResponse,
};
use tracing::{debug, instrument};
use url::Url;

/// `openid` is always requested by the authorization flow itself.
const OPENID_SCOPE: &str = "openid";

/// OIDC provider that talks to real issuers over HTTP.
#[derive(Clone)]
pub struct OidcProvider {
    http: reqwest::Client,
    key_sets: KeyedCache<String, CoreJsonWebKeySet>,
}

impl OidcProvider {
    /// `http` must not follow redirects and should carry a timeout.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            key_sets: KeyedCache::new(),
        }
    }

    fn client(descriptor: &ClientDescriptor, keys: CoreJsonWebKeySet) -> CoreClient {
        CoreClient::new(
            ClientId::new(descriptor.client_id.clone()),
            IssuerUrl::from_url(descriptor.issuer.clone()),
            keys,
        )
    }

    async fn key_set(
        &self,
        descriptor: &ClientDescriptor,
    ) -> Result<CoreJsonWebKeySet, Report<AuthError>> {
        let url = JsonWebKeySetUrl::from_url(descriptor.jwks_uri.clone());
        self.key_sets
            .get_or_try_insert(descriptor.jwks_uri.to_string(), || async {
                CoreJsonWebKeySet::fetch_async(&url, &self.http)
                    .await
                    .map_err(|e| Report::from(upstream("key set endpoint", e)))
            })
            .await
    }

    /// Checks signature, issuer, audience, expiry and nonce of `id_token`.
    async fn verify_id_token(
        &self,
        descriptor: &ClientDescriptor,
        id_token: &CoreIdToken,
        nonce: &str,
    ) -> Result<(), Report<AuthError>> {
        let alg = signing_alg(&descriptor.id_token_signing_alg)?;
        let nonce = Nonce::new(nonce.to_string());

        let keys = self.key_set(descriptor).await?;
        let checked = match check_claims(descriptor, id_token, &nonce, alg.clone(), keys) {
            Err(ClaimsVerificationError::SignatureVerification(e)) => {
                debug!(error = %e, "id token signature not verified, reloading key set");
                self.key_sets
                    .invalidate(&descriptor.jwks_uri.to_string())
                    .await;
                let keys = self.key_set(descriptor).await?;
                check_claims(descriptor, id_token, &nonce, alg, keys)
            }
            other => other,
        };

        checked.map_err(|e| {
            AuthError::TokenExchange {
                reason: format!("id token rejected: {e}"),
            }
            .into()
        })
    }
}

fn check_claims(
    descriptor: &ClientDescriptor,
    id_token: &CoreIdToken,
    nonce: &Nonce,
    alg: CoreJwsSigningAlgorithm,
    keys: CoreJsonWebKeySet,
) -> Result<(), ClaimsVerificationError> {
    let tolerance = chrono::Duration::from_std(descriptor.clock_tolerance)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let client = OidcProvider::client(descriptor, keys);
    let verifier = client
        .id_token_verifier()
        .set_allowed_algs([alg])
        .set_time_fn(move || Utc::now() - tolerance);
    id_token.claims(&verifier, nonce).map(|_| ())
}

/// Parses a JWS algorithm name such as `RS256`.
fn signing_alg(name: &str) -> Result<CoreJwsSigningAlgorithm, AuthError> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).map_err(|e| {
        AuthError::Configuration {
            reason: format!("unsupported id token signing algorithm '{name}': {e}"),
        }
    })
}

fn upstream(service: &str, error: impl Display) -> AuthError {
    AuthError::Upstream {
        service: service.to_string(),
        reason: error.to_string(),
    }
}

/// Every token endpoint failure is upstream, OAuth error responses such as
/// `invalid_grant` included.
fn token_error<RE, TE>(error: RequestTokenError<RE, TE>) -> AuthError
where
    RE: std::error::Error + 'static,
    TE: ErrorResponse + 'static,
{
    match error {
        RequestTokenError::ServerResponse(response) => upstream("token endpoint", response),
        other => upstream("token endpoint", other),
    }
}

fn into_token_response(response: &impl OAuth2TokenResponse) -> TokenResponse {
    TokenResponse {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response.expires_in(),
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    #[instrument(skip(self), fields(issuer = %issuer))]
    async fn discover(&self, issuer: &Url) -> Result<IssuerMetadata, Report<AuthError>> {
        let metadata = ProviderMetadataWithLogout::discover_async(
            IssuerUrl::from_url(issuer.clone()),
            &self.http,
        )
        .await
        .map_err(|e| upstream("identity provider discovery", e))?;

        let token_endpoint = metadata
            .token_endpoint()
            .ok_or_else(|| AuthError::Schema {
                payload: "discovery document".to_string(),
                reason: "no token_endpoint".to_string(),
            })?
            .url()
            .clone();
        let id_token_signing_algs = metadata
            .id_token_signing_alg_values_supported()
            .iter()
            .filter_map(|alg| serde_json::to_value(alg).ok())
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();

        debug!("discovered issuer metadata");
        Ok(IssuerMetadata {
            issuer: metadata.issuer().url().clone(),
            authorization_endpoint: metadata.authorization_endpoint().url().clone(),
            token_endpoint,
            userinfo_endpoint: metadata.userinfo_endpoint().map(|u| u.url().clone()),
            jwks_uri: metadata.jwks_uri().url().clone(),
            end_session_endpoint: metadata
                .additional_metadata()
                .end_session_endpoint
                .as_ref()
                .map(|u| u.url().clone()),
            id_token_signing_algs,
        })
    }

    fn authorization_url(
        &self,
        client: &ClientDescriptor,
        state: &str,
        nonce: &str,
    ) -> Result<Url, Report<AuthError>> {
        let oidc = Self::client(client, CoreJsonWebKeySet::default())
            .set_auth_uri(AuthUrl::from_url(client.authorization_endpoint.clone()))
            .set_redirect_uri(RedirectUrl::from_url(client.redirect_uri.clone()));

        let state = CsrfToken::new(state.to_string());
        let nonce = Nonce::new(nonce.to_string());
        let mut request = oidc.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            move || state,
            move || nonce,
        );
        for scope in client.scopes.iter().filter(|s| s.as_str() != OPENID_SCOPE) {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        if let Some(resource) = &client.resource {
            request = request.add_extra_param("resource", resource.clone());
        }

        let (url, _, _) = request.url();
        Ok(url)
    }

    #[instrument(skip_all, fields(tenant = %client.tenant))]
    async fn exchange_code(
        &self,
        client: &ClientDescriptor,
        code: &str,
        redirect_url: &Url,
        nonce: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let oidc = Self::client(client, CoreJsonWebKeySet::default())
            .set_token_uri(TokenUrl::from_url(client.token_endpoint.clone()));

        let mut request = oidc
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_redirect_uri(Cow::Owned(RedirectUrl::from_url(redirect_url.clone())));
        if let Some(resource) = &client.resource {
            request = request.add_extra_param("resource", resource.clone());
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(token_error)?;
        let id_token = response.id_token().ok_or_else(|| AuthError::TokenExchange {
            reason: "provider response has no id_token".to_string(),
        })?;
        self.verify_id_token(client, id_token, nonce).await?;

        debug!("id token verified");
        Ok(into_token_response(&response))
    }

    #[instrument(skip_all, fields(tenant = %client.tenant))]
    async fn fetch_user_info(
        &self,
        client: &ClientDescriptor,
        access_token: &str,
    ) -> Result<serde_json::Value, Report<AuthError>> {
        let endpoint = client.userinfo_endpoint.clone().ok_or_else(|| {
            AuthError::Configuration {
                reason: format!("issuer '{}' has no userinfo endpoint", client.issuer),
            }
        })?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| upstream("userinfo endpoint", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(upstream("userinfo endpoint", status).into());
        }

        let claims: serde_json::Value = response.json().await.map_err(|e| AuthError::Schema {
            payload: "userinfo response".to_string(),
            reason: e.to_string(),
        })?;
        if !claims.is_object() {
            return Err(AuthError::Schema {
                payload: "userinfo response".to_string(),
                reason: "not a JSON object".to_string(),
            }
            .into());
        }
        Ok(claims)
    }

    #[instrument(skip_all, fields(tenant = %client.tenant))]
    async fn refresh(
        &self,
        client: &ClientDescriptor,
        refresh_token: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let oidc = Self::client(client, CoreJsonWebKeySet::default())
            .set_token_uri(TokenUrl::from_url(client.token_endpoint.clone()));
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let response = oidc
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(token_error)?;
        Ok(into_token_response(&response))
    }

    fn end_session_url(
        &self,
        client: &ClientDescriptor,
        post_logout_redirect: &Url,
    ) -> Option<Url> {
        let endpoint = client.end_session_endpoint.clone()?;
        Some(
            LogoutRequest::from(EndSessionUrl::from_url(endpoint))
                .set_client_id(ClientId::new(client.client_id.clone()))
                .set_post_logout_redirect_uri(PostLogoutRedirectUrl::from_url(
                    post_logout_redirect.clone(),
                ))
                .http_get_url(),
        )
    }
}
