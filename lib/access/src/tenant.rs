//! Per-tenant OIDC client configuration.
//!
//! Tenants are not known at startup. Their configuration comes from a
//! [`TenantSource`]: either a static table loaded with the server
//! configuration, or the remote tenant directory, which answers
//! `GET {base}/client/{tenant}` with a document of the form
//! `{ "oidc": { ... } }`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// Path segment that separates a Keycloak realm base from its protocol
/// endpoints.
const PROTOCOL_SUFFIX: &str = "/protocol/openid-connect";

/// OIDC parameters for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantClientConfig {
    /// Authorization endpoint, e.g.
    /// `https://sso.example.com/realms/acme/protocol/openid-connect/auth`.
    #[serde(alias = "auth_url")]
    pub auth_url: String,
    #[serde(alias = "client_id")]
    pub client_id: String,
    /// Resource indicator passed to the authorization and token endpoints.
    #[serde(default)]
    pub resource: Option<String>,
    /// Requested scopes, space or comma separated.
    pub scopes: String,
    #[serde(alias = "redirect_uri")]
    pub redirect_uri: String,
    /// Claim that holds the user's display name.
    #[serde(alias = "name_claim")]
    pub name_claim: String,
    /// Clock tolerance such as `"5"`, `"5s"` or `"1 min"`.
    #[serde(default)]
    pub tolerance: String,
    /// ID token signing algorithm. Inferred from issuer metadata when unset.
    #[serde(default, alias = "signing_alg")]
    pub signing_alg: Option<String>,
}

impl TenantClientConfig {
    /// Issuer base URL: the authorization endpoint with the protocol suffix
    /// removed.
    pub fn issuer_url(&self) -> Result<Url, Report<AuthError>> {
        let base = match self.auth_url.find(PROTOCOL_SUFFIX) {
            Some(idx) => &self.auth_url[..idx],
            None => self.auth_url.as_str(),
        };
        Url::parse(base).map_err(|e| {
            AuthError::configuration(format!("invalid authUrl '{}': {e}", self.auth_url)).into()
        })
    }

    pub fn redirect_url(&self) -> Result<Url, Report<AuthError>> {
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::configuration(format!("invalid redirectUri '{}': {e}", self.redirect_uri))
                .into()
        })
    }

    /// Requested scopes as individual values.
    #[must_use]
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resource indicator, ignoring an empty value.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref().filter(|r| !r.is_empty())
    }

    /// Parses the tolerance string.
    pub fn clock_tolerance(&self) -> Result<Duration, Report<AuthError>> {
        parse_tolerance(&self.tolerance).ok_or_else(|| {
            AuthError::configuration(format!("invalid clock tolerance '{}'", self.tolerance))
                .into()
        })
    }
}

/// Parses `"5"`, `"5s"`, `"30 seconds"`, `"1 min"`, `"2h"` and the like.
/// An empty string means no tolerance.
fn parse_tolerance(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Duration::ZERO);
    }

    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: u64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(value.checked_mul(multiplier)?))
}

#[derive(Deserialize)]
struct TenantDocument {
    oidc: TenantClientConfig,
}

/// Validates a tenant directory response and extracts its OIDC section.
pub fn parse_tenant_document(body: &[u8]) -> Result<TenantClientConfig, Report<AuthError>> {
    let document: TenantDocument = serde_json::from_slice(body)
        .map_err(|e| AuthError::schema("tenant configuration", e.to_string()))?;
    let config = document.oidc;

    if config.client_id.is_empty() {
        return Err(AuthError::schema("tenant configuration", "clientId is empty").into());
    }
    if Url::parse(&config.auth_url).is_err() {
        return Err(AuthError::schema("tenant configuration", "authUrl is not a URL").into());
    }
    if Url::parse(&config.redirect_uri).is_err() {
        return Err(AuthError::schema("tenant configuration", "redirectUri is not a URL").into());
    }

    Ok(config)
}

/// Where tenant configuration comes from.
#[async_trait]
pub trait TenantSource: Send + Sync {
    /// Fetches configuration for `tenant`, which is never empty.
    async fn fetch(&self, tenant: &str) -> Result<TenantClientConfig, Report<AuthError>>;
}

/// A fixed table of tenants.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantSource {
    tenants: HashMap<String, TenantClientConfig>,
}

impl StaticTenantSource {
    #[must_use]
    pub fn new(tenants: HashMap<String, TenantClientConfig>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    async fn fetch(&self, tenant: &str) -> Result<TenantClientConfig, Report<AuthError>> {
        self.tenants.get(tenant).cloned().ok_or_else(|| {
            AuthError::configuration(format!("unknown tenant '{tenant}'")).into()
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn acme_config() -> TenantClientConfig {
        TenantClientConfig {
            auth_url: "https://sso.example.com/realms/acme/protocol/openid-connect/auth"
                .to_string(),
            client_id: "chat-ui".to_string(),
            resource: Some("https://api.example.com".to_string()),
            scopes: "openid profile email".to_string(),
            redirect_uri: "https://chat.example.com/login/callback".to_string(),
            name_claim: "name".to_string(),
            tolerance: "5s".to_string(),
            signing_alg: None,
        }
    }

    #[test]
    fn issuer_strips_protocol_suffix() {
        let issuer = acme_config().issuer_url().unwrap();
        assert_eq!(issuer.as_str(), "https://sso.example.com/realms/acme");
    }

    #[test]
    fn issuer_without_suffix_is_kept() {
        let mut config = acme_config();
        config.auth_url = "https://login.example.com/tenant".to_string();
        assert_eq!(
            config.issuer_url().unwrap().as_str(),
            "https://login.example.com/tenant"
        );
    }

    #[test]
    fn tolerance_formats() {
        assert_eq!(parse_tolerance(""), Some(Duration::ZERO));
        assert_eq!(parse_tolerance("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_tolerance("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_tolerance("30 seconds"), Some(Duration::from_secs(30)));
        assert_eq!(parse_tolerance("1 min"), Some(Duration::from_secs(60)));
        assert_eq!(parse_tolerance("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_tolerance("soon"), None);
        assert_eq!(parse_tolerance("5 fortnights"), None);
    }

    #[test]
    fn scope_list_accepts_commas_and_spaces() {
        let mut config = acme_config();
        config.scopes = "openid, profile email".to_string();
        assert_eq!(config.scope_list(), vec!["openid", "profile", "email"]);
    }

    #[test]
    fn empty_resource_is_none() {
        let mut config = acme_config();
        config.resource = Some(String::new());
        assert_eq!(config.resource(), None);
    }

    #[test]
    fn parses_directory_document() {
        let body = br#"{
            "name": "acme",
            "oidc": {
                "authUrl": "https://sso.example.com/realms/acme/protocol/openid-connect/auth",
                "clientId": "chat-ui",
                "resource": "https://api.example.com",
                "scopes": "openid profile email",
                "redirectUri": "https://chat.example.com/login/callback",
                "nameClaim": "name",
                "tolerance": "5s"
            }
        }"#;

        let config = parse_tenant_document(body).unwrap();
        assert_eq!(config, acme_config());
    }

    #[test]
    fn missing_field_is_schema_error() {
        let body = br#"{ "oidc": { "authUrl": "https://sso.example.com", "clientId": "x" } }"#;

        let err = parse_tenant_document(body).unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Schema { .. }));
    }

    #[test]
    fn wrong_type_is_schema_error() {
        let body = br#"{ "oidc": {
            "authUrl": "https://sso.example.com/realms/acme/protocol/openid-connect/auth",
            "clientId": 42,
            "scopes": "openid",
            "redirectUri": "https://chat.example.com/login/callback",
            "nameClaim": "name",
            "tolerance": "5"
        } }"#;

        let err = parse_tenant_document(body).unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Schema { .. }));
    }

    #[test]
    fn invalid_redirect_is_schema_error() {
        let body = br#"{ "oidc": {
            "authUrl": "https://sso.example.com/realms/acme/protocol/openid-connect/auth",
            "clientId": "chat-ui",
            "scopes": "openid",
            "redirectUri": "not a url",
            "nameClaim": "name",
            "tolerance": "5"
        } }"#;

        let err = parse_tenant_document(body).unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Schema { .. }));
    }

    #[tokio::test]
    async fn static_source_unknown_tenant() {
        let source = StaticTenantSource::new(HashMap::from([("acme".to_string(), acme_config())]));

        assert_eq!(source.fetch("acme").await.unwrap(), acme_config());
        let err = source.fetch("globex").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Configuration { .. }));
    }
}
