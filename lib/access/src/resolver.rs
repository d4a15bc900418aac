//! Tenant name to OIDC client resolution.

use std::sync::Arc;
use std::time::Duration;

use rootcause::prelude::Report;
use tracing::{debug, instrument};

use crate::cache::KeyedCache;
use crate::error::AuthError;
use crate::provider::{ClientDescriptor, IdentityProvider, IssuerMetadata};
use crate::tenant::{TenantClientConfig, TenantSource};

/// Default lifetime of cached tenant configuration.
pub const DEFAULT_TENANT_TTL: Duration = Duration::from_secs(60);

/// Used when neither the tenant nor the issuer names an algorithm.
const FALLBACK_SIGNING_ALG: &str = "RS256";

/// Resolves tenants into [`ClientDescriptor`]s.
///
/// Tenant configuration is cached for a short TTL. Issuer metadata is cached
/// per issuer URL for the lifetime of the resolver.
#[derive(Clone)]
pub struct ClientResolver {
    source: Arc<dyn TenantSource>,
    provider: Arc<dyn IdentityProvider>,
    tenants: KeyedCache<String, TenantClientConfig>,
    issuers: KeyedCache<String, IssuerMetadata>,
    client_id_override: Option<String>,
}

impl ClientResolver {
    #[must_use]
    pub fn new(source: Arc<dyn TenantSource>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            source,
            provider,
            tenants: KeyedCache::with_ttl(DEFAULT_TENANT_TTL),
            issuers: KeyedCache::new(),
            client_id_override: None,
        }
    }

    /// Sets how long tenant configuration is reused.
    #[must_use]
    pub fn with_tenant_ttl(mut self, ttl: Duration) -> Self {
        self.tenants = KeyedCache::with_ttl(ttl);
        self
    }

    /// Uses one deployment-wide public client id instead of each tenant's.
    #[must_use]
    pub fn with_client_id_override(mut self, client_id: Option<String>) -> Self {
        self.client_id_override = client_id.filter(|id| !id.is_empty());
        self
    }

    /// The identity provider the resolved clients talk to.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Returns the tenant's configuration, fetching it on a cache miss.
    pub async fn tenant_config(
        &self,
        tenant: &str,
    ) -> Result<TenantClientConfig, Report<AuthError>> {
        if tenant.is_empty() {
            return Err(AuthError::configuration("tenant name is required").into());
        }
        self.tenants
            .get_or_try_insert(tenant.to_string(), || self.source.fetch(tenant))
            .await
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, tenant: &str) -> Result<ClientDescriptor, Report<AuthError>> {
        let config = self.tenant_config(tenant).await?;
        let issuer = config.issuer_url()?;

        let metadata = self
            .issuers
            .get_or_try_insert(issuer.to_string(), || async {
                debug!(%issuer, "discovering issuer");
                self.provider.discover(&issuer).await
            })
            .await?;

        let id_token_signing_alg = config
            .signing_alg
            .clone()
            .filter(|alg| !alg.is_empty())
            .or_else(|| metadata.id_token_signing_algs.first().cloned())
            .unwrap_or_else(|| FALLBACK_SIGNING_ALG.to_string());

        Ok(ClientDescriptor {
            tenant: tenant.to_string(),
            issuer: metadata.issuer,
            authorization_endpoint: metadata.authorization_endpoint,
            token_endpoint: metadata.token_endpoint,
            userinfo_endpoint: metadata.userinfo_endpoint,
            jwks_uri: metadata.jwks_uri,
            end_session_endpoint: metadata.end_session_endpoint,
            client_id: self
                .client_id_override
                .clone()
                .unwrap_or_else(|| config.client_id.clone()),
            redirect_uri: config.redirect_url()?,
            clock_tolerance: config.clock_tolerance()?,
            resource: config.resource().map(str::to_string),
            scopes: config.scope_list(),
            name_claim: config.name_claim.clone(),
            id_token_signing_alg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{CountingTenantSource, FakeProvider};
    use crate::tenant::tests::acme_config;

    fn resolver() -> (ClientResolver, Arc<CountingTenantSource>, Arc<FakeProvider>) {
        let source = Arc::new(CountingTenantSource::new([("acme", acme_config())]));
        let provider = Arc::new(FakeProvider::default());
        let resolver = ClientResolver::new(source.clone(), provider.clone());
        (resolver, source, provider)
    }

    #[tokio::test]
    async fn empty_tenant_is_configuration_error() {
        let (resolver, source, _) = resolver();
        let err = resolver.resolve("").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Configuration { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn builds_descriptor_from_tenant_and_issuer() {
        let (resolver, _, _) = resolver();
        let client = resolver.resolve("acme").await.unwrap();

        assert_eq!(client.tenant, "acme");
        assert_eq!(client.issuer.as_str(), "https://sso.example.com/realms/acme");
        assert_eq!(
            client.token_endpoint.as_str(),
            "https://sso.example.com/realms/acme/protocol/openid-connect/token"
        );
        assert_eq!(client.client_id, "chat-ui");
        assert_eq!(client.clock_tolerance, Duration::from_secs(5));
        assert_eq!(client.resource.as_deref(), Some("https://api.example.com"));
        assert_eq!(client.scopes, vec!["openid", "profile", "email"]);
        assert_eq!(client.id_token_signing_alg, "RS256");
    }

    #[tokio::test]
    async fn explicit_signing_alg_wins() {
        let mut config = acme_config();
        config.signing_alg = Some("ES256".to_string());
        let source = Arc::new(CountingTenantSource::new([("acme", config)]));
        let resolver = ClientResolver::new(source, Arc::new(FakeProvider::default()));

        let client = resolver.resolve("acme").await.unwrap();
        assert_eq!(client.id_token_signing_alg, "ES256");
    }

    #[tokio::test]
    async fn client_id_override_applies() {
        let (resolver, _, _) = resolver();
        let resolver = resolver.with_client_id_override(Some("public-client".to_string()));

        let client = resolver.resolve("acme").await.unwrap();
        assert_eq!(client.client_id, "public-client");
    }

    #[tokio::test]
    async fn tenant_config_and_discovery_are_cached() {
        let (resolver, source, provider) = resolver();

        resolver.resolve("acme").await.unwrap();
        resolver.resolve("acme").await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(provider.discoveries(), 1);
    }

    #[tokio::test]
    async fn expired_tenant_config_is_refetched_but_discovery_is_not() {
        let (resolver, source, provider) = resolver();
        let resolver = resolver.with_tenant_ttl(Duration::ZERO);

        resolver.resolve("acme").await.unwrap();
        resolver.resolve("acme").await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(provider.discoveries(), 1);
    }

    #[tokio::test]
    async fn discovery_failure_is_not_cached() {
        let (resolver, _, provider) = resolver();
        provider.fail_discovery(true);
        let err = resolver.resolve("acme").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Upstream { .. }));

        provider.fail_discovery(false);
        assert!(resolver.resolve("acme").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_tenant_propagates_source_error() {
        let (resolver, _, _) = resolver();
        let err = resolver.resolve("globex").await.unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Configuration { .. }));
    }
}
