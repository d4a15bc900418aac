//! Access token verification against Keycloak realms.
//!
//! Both verifiers derive the realm from the tenant name:
//! `{keycloak}/realms/{tenant}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use rootcause::prelude::Report;
use serde::Deserialize;
use tenant_gate_access::{AuthError, KeyedCache, TokenVerifier};
use tracing::{debug, instrument, warn};
use url::Url;

/// Keycloak base URL with realm path helpers.
#[derive(Debug, Clone)]
pub struct RealmUrls {
    base: String,
}

impl RealmUrls {
    pub fn new(keycloak: &Url) -> Self {
        Self {
            base: keycloak.as_str().trim_end_matches('/').to_string(),
        }
    }

    /// The realm's issuer identifier.
    pub fn issuer(&self, tenant: &str) -> String {
        format!("{}/realms/{tenant}", self.base)
    }

    pub fn jwks_uri(&self, tenant: &str) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer(tenant))
    }

    pub fn introspection_uri(&self, tenant: &str) -> String {
        format!("{}/protocol/openid-connect/token/introspect", self.issuer(tenant))
    }
}

fn invalid_token(reason: impl Into<String>) -> AuthError {
    AuthError::Schema {
        payload: "access token".to_string(),
        reason: reason.into(),
    }
}

/// Loads a realm's key set.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, jwks_uri: &str) -> Result<JwkSet, Report<AuthError>>;
}

/// Fetches key sets over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    http: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, jwks_uri: &str) -> Result<JwkSet, Report<AuthError>> {
        let upstream = |reason: String| AuthError::Upstream {
            service: "key set endpoint".to_string(),
            reason,
        };

        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(upstream(format!("answered {status}")).into());
        }
        let keys = response.json::<JwkSet>().await.map_err(|e| AuthError::Schema {
            payload: "key set".to_string(),
            reason: e.to_string(),
        })?;
        Ok(keys)
    }
}

/// Verifies access tokens locally against the realm's cached key set.
pub struct JwksVerifier {
    realms: RealmUrls,
    fetcher: Arc<dyn JwksFetcher>,
    key_sets: KeyedCache<String, Arc<JwkSet>>,
    leeway: Duration,
}

impl JwksVerifier {
    pub fn new(realms: RealmUrls, fetcher: Arc<dyn JwksFetcher>, leeway: Duration) -> Self {
        Self {
            realms,
            fetcher,
            key_sets: KeyedCache::new(),
            leeway,
        }
    }

    async fn key_set(&self, jwks_uri: &str) -> Result<Arc<JwkSet>, Report<AuthError>> {
        self.key_sets
            .get_or_try_insert(jwks_uri.to_string(), || async {
                self.fetcher.fetch(jwks_uri).await.map(Arc::new)
            })
            .await
    }

    /// Finds the signing key, reloading the key set once if the realm has
    /// rotated keys since it was cached.
    async fn decoding_key(
        &self,
        jwks_uri: &str,
        kid: &str,
    ) -> Result<DecodingKey, Report<AuthError>> {
        let mut keys = self.key_set(jwks_uri).await?;
        if keys.find(kid).is_none() {
            debug!(kid, "unknown key id, reloading key set");
            self.key_sets.invalidate(&jwks_uri.to_string()).await;
            keys = self.key_set(jwks_uri).await?;
        }

        let jwk = keys
            .find(kid)
            .ok_or_else(|| invalid_token(format!("no key with id '{kid}'")))?;
        DecodingKey::from_jwk(jwk).map_err(|e| invalid_token(e.to_string()).into())
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    #[instrument(skip(self, access_token))]
    async fn verify(&self, access_token: &str, tenant: &str) -> Result<bool, Report<AuthError>> {
        let header = decode_header(access_token).map_err(|e| invalid_token(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| invalid_token("header has no key id"))?;
        let key = self
            .decoding_key(&self.realms.jwks_uri(tenant), &kid)
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.realms.issuer(tenant)]);
        validation.leeway = self.leeway.as_secs();
        validation.validate_aud = false;

        match decode::<serde_json::Value>(access_token, &key, &validation) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                debug!("access token expired");
                Ok(false)
            }
            Err(e) => Err(invalid_token(e.to_string()).into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Introspection {
    #[serde(default)]
    active: bool,
}

/// Asks the realm's introspection endpoint whether a token is active.
pub struct IntrospectionVerifier {
    http: reqwest::Client,
    realms: RealmUrls,
    client_id: String,
    client_secret: String,
}

impl IntrospectionVerifier {
    pub fn new(
        http: reqwest::Client,
        realms: RealmUrls,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            realms,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenVerifier for IntrospectionVerifier {
    #[instrument(skip(self, access_token))]
    async fn verify(&self, access_token: &str, tenant: &str) -> Result<bool, Report<AuthError>> {
        let response = self
            .http
            .post(self.realms.introspection_uri(tenant))
            .form(&[
                ("token", access_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Upstream {
                service: "introspection endpoint".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "introspection refused");
            return Ok(false);
        }
        let introspection = response
            .json::<Introspection>()
            .await
            .map_err(|e| AuthError::Schema {
                payload: "introspection response".to_string(),
                reason: e.to_string(),
            })?;
        Ok(introspection.active)
    }
}
