//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::{Value, json};
use url::Url;

use crate::error::AuthError;
use crate::provider::{ClientDescriptor, IdentityProvider, IssuerMetadata, TokenResponse};
use crate::tenant::{TenantClientConfig, TenantSource};
use crate::verify::TokenVerifier;

/// Tenant source that counts fetches.
pub(crate) struct CountingTenantSource {
    tenants: HashMap<String, TenantClientConfig>,
    calls: AtomicUsize,
}

impl CountingTenantSource {
    pub(crate) fn new<const N: usize>(tenants: [(&str, TenantClientConfig); N]) -> Self {
        Self {
            tenants: tenants
                .into_iter()
                .map(|(name, config)| (name.to_string(), config))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantSource for CountingTenantSource {
    async fn fetch(&self, tenant: &str) -> Result<TenantClientConfig, Report<AuthError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tenants.get(tenant).cloned().ok_or_else(|| {
            AuthError::configuration(format!("unknown tenant '{tenant}'")).into()
        })
    }
}

/// Issuer metadata laid out the way Keycloak publishes it.
pub(crate) fn keycloak_metadata(issuer: &Url) -> IssuerMetadata {
    let endpoint = |path: &str| -> Url {
        Url::parse(&format!(
            "{}/protocol/openid-connect/{path}",
            issuer.as_str().trim_end_matches('/')
        ))
        .unwrap()
    };
    IssuerMetadata {
        issuer: issuer.clone(),
        authorization_endpoint: endpoint("auth"),
        token_endpoint: endpoint("token"),
        userinfo_endpoint: Some(endpoint("userinfo")),
        jwks_uri: endpoint("certs"),
        end_session_endpoint: Some(endpoint("logout")),
        id_token_signing_algs: vec!["RS256".to_string(), "ES256".to_string()],
    }
}

/// One recorded code exchange.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub(crate) code: String,
    pub(crate) redirect_url: Url,
    pub(crate) nonce: String,
}

struct ProviderState {
    user_info: Value,
    token_response: TokenResponse,
    refresh_response: Option<TokenResponse>,
    exchanges: Vec<Exchange>,
    refreshed_with: Vec<String>,
}

/// Identity provider that answers from canned values.
pub(crate) struct FakeProvider {
    discoveries: AtomicUsize,
    fail_discovery: AtomicBool,
    state: Mutex<ProviderState>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            discoveries: AtomicUsize::new(0),
            fail_discovery: AtomicBool::new(false),
            state: Mutex::new(ProviderState {
                user_info: json!({
                    "sub": "sub-1",
                    "preferred_username": "jane",
                    "name": "Jane Doe",
                    "email": "jane@example.com",
                    "email_verified": true
                }),
                token_response: TokenResponse {
                    access_token: "at-1".to_string(),
                    refresh_token: Some("rt-1".to_string()),
                    expires_in: Some(Duration::from_secs(300)),
                },
                refresh_response: Some(TokenResponse {
                    access_token: "at-2".to_string(),
                    refresh_token: Some("rt-2".to_string()),
                    expires_in: Some(Duration::from_secs(300)),
                }),
                exchanges: Vec::new(),
                refreshed_with: Vec::new(),
            }),
        }
    }
}

impl FakeProvider {
    pub(crate) fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_user_info(&self, claims: Value) {
        self.state.lock().unwrap().user_info = claims;
    }

    pub(crate) fn set_token_response(&self, response: TokenResponse) {
        self.state.lock().unwrap().token_response = response;
    }

    /// `None` makes refresh fail as the provider would for a revoked token.
    pub(crate) fn set_refresh_response(&self, response: Option<TokenResponse>) {
        self.state.lock().unwrap().refresh_response = response;
    }

    pub(crate) fn exchanges(&self) -> Vec<Exchange> {
        self.state.lock().unwrap().exchanges.clone()
    }

    pub(crate) fn refreshed_with(&self) -> Vec<String> {
        self.state.lock().unwrap().refreshed_with.clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn discover(&self, issuer: &Url) -> Result<IssuerMetadata, Report<AuthError>> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(AuthError::upstream("identity provider", "discovery failed").into());
        }
        Ok(keycloak_metadata(issuer))
    }

    fn authorization_url(
        &self,
        client: &ClientDescriptor,
        state: &str,
        nonce: &str,
    ) -> Result<Url, Report<AuthError>> {
        let mut url = client.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", ClientDescriptor::RESPONSE_TYPE)
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", client.redirect_uri.as_str())
            .append_pair("scope", &client.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        _client: &ClientDescriptor,
        code: &str,
        redirect_url: &Url,
        nonce: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let mut state = self.state.lock().unwrap();
        state.exchanges.push(Exchange {
            code: code.to_string(),
            redirect_url: redirect_url.clone(),
            nonce: nonce.to_string(),
        });
        Ok(state.token_response.clone())
    }

    async fn fetch_user_info(
        &self,
        _client: &ClientDescriptor,
        _access_token: &str,
    ) -> Result<Value, Report<AuthError>> {
        Ok(self.state.lock().unwrap().user_info.clone())
    }

    async fn refresh(
        &self,
        _client: &ClientDescriptor,
        refresh_token: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let mut state = self.state.lock().unwrap();
        state.refreshed_with.push(refresh_token.to_string());
        state.refresh_response.clone().ok_or_else(|| {
            AuthError::upstream("identity provider", "invalid_grant").into()
        })
    }

    fn end_session_url(
        &self,
        client: &ClientDescriptor,
        post_logout_redirect: &Url,
    ) -> Option<Url> {
        let mut url = client.end_session_endpoint.clone()?;
        url.query_pairs_mut()
            .append_pair("client_id", &client.client_id)
            .append_pair("post_logout_redirect_uri", post_logout_redirect.as_str());
        Some(url)
    }
}

/// Verifier with a fixed answer.
pub(crate) struct FakeVerifier {
    outcome: Mutex<Result<bool, AuthError>>,
}

impl FakeVerifier {
    pub(crate) fn active() -> Self {
        Self {
            outcome: Mutex::new(Ok(true)),
        }
    }

    pub(crate) fn set(&self, outcome: Result<bool, AuthError>) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, _access_token: &str, _tenant: &str) -> Result<bool, Report<AuthError>> {
        self.outcome.lock().unwrap().clone().map_err(Report::from)
    }
}
