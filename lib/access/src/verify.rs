//! Access token verification seam.

use async_trait::async_trait;
use rootcause::prelude::Report;

use crate::error::AuthError;

/// Decides whether a stored access token is still good.
///
/// Implementations verify locally against the tenant's key set or ask the
/// provider's introspection endpoint. Callers treat both the same way.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns `Ok(false)` for an expired or inactive token and an error for
    /// any other failure.
    async fn verify(&self, access_token: &str, tenant: &str) -> Result<bool, Report<AuthError>>;
}
