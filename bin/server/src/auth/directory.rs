//! Tenant source backed by the remote tenant directory.

use async_trait::async_trait;
use rootcause::prelude::Report;
use tenant_gate_access::{AuthError, TenantClientConfig, TenantSource, parse_tenant_document};
use tracing::{debug, instrument};
use url::Url;

const SERVICE: &str = "tenant directory";

/// Fetches tenant configuration with `GET {base}/client/{tenant}`.
#[derive(Debug, Clone)]
pub struct DirectoryTenantSource {
    http: reqwest::Client,
    base: Url,
}

impl DirectoryTenantSource {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    /// The document URL for `tenant`, with the name escaped as one path
    /// segment.
    pub fn client_url(&self, tenant: &str) -> Result<Url, Report<AuthError>> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| AuthError::Configuration {
                reason: format!("tenant directory URL '{}' cannot be a base", self.base),
            })?
            .pop_if_empty()
            .extend(["client", tenant]);
        Ok(url)
    }
}

#[async_trait]
impl TenantSource for DirectoryTenantSource {
    #[instrument(skip(self))]
    async fn fetch(&self, tenant: &str) -> Result<TenantClientConfig, Report<AuthError>> {
        let url = self.client_url(tenant)?;
        let upstream = |reason: String| AuthError::Upstream {
            service: SERVICE.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(upstream(format!("answered {status} for tenant '{tenant}'")).into());
        }

        let body = response.bytes().await.map_err(|e| upstream(e.to_string()))?;
        let config = parse_tenant_document(&body)?;
        debug!(client_id = %config.client_id, "fetched tenant configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> DirectoryTenantSource {
        DirectoryTenantSource::new(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn client_url_appends_tenant() {
        let url = source("https://accounts.example.com").client_url("acme").unwrap();
        assert_eq!(url.as_str(), "https://accounts.example.com/client/acme");
    }

    #[test]
    fn client_url_keeps_base_path() {
        let url = source("https://example.com/accounts/")
            .client_url("acme")
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/accounts/client/acme");
    }

    #[test]
    fn tenant_name_is_one_segment() {
        let url = source("https://accounts.example.com")
            .client_url("../admin")
            .unwrap();
        assert_eq!(url.path_segments().unwrap().count(), 2);
        assert!(url.as_str().ends_with("/client/..%2Fadmin"));
    }
}
