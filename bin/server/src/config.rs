//! Centralized server configuration.
//!
//! Loaded once at startup via the `config` crate: an optional
//! `tenant-gate.toml` next to the binary, then environment variables with
//! `__` as the nesting separator (`ACCESS__ALLOWED_EMAILS`,
//! `VERIFICATION__MODE`, ...). Comma-separated values are accepted for the
//! allow-list keys.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use rootcause::prelude::Report;
use serde::Deserialize;
use tenant_gate_access::{AllowList, AuthError, PrivilegePolicy, TenantClientConfig};
use url::Url;

/// Base name of the optional configuration file.
pub const CONFIG_FILE: &str = "tenant-gate";

/// Keys that are split on commas when read from the environment.
const LIST_KEYS: [&str; 2] = ["access.allowed_emails", "access.allowed_domains"];

/// Shortest accepted state-signing secret, in bytes.
const MIN_STATE_SECRET_LEN: usize = 32;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Account store connection.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Where per-tenant OIDC client configuration comes from.
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// How stored access tokens are checked.
    pub verification: VerificationConfig,

    /// Session lifetime and cookie flags.
    #[serde(default)]
    pub session: SessionConfig,

    /// HMAC key for the signed OAuth `state`.
    pub state_secret: String,

    /// Who may log in and who gets elevated privileges.
    #[serde(default)]
    pub access: AccessConfig,

    /// Timeout applied to every outbound HTTP call.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Where the provider sends the browser after logout.
    pub post_logout_redirect: Url,
}

/// Account store connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one the server keeps accounts in
    /// memory.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Tenant configuration source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantSourceKind {
    /// The `tenants` table below.
    #[default]
    Static,
    /// `GET {directory_url}/client/{tenant}`.
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    #[serde(default)]
    pub source: TenantSourceKind,

    #[serde(default)]
    pub directory_url: Option<Url>,

    /// How long a fetched tenant configuration is reused.
    #[serde(default = "default_tenant_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub tenants: HashMap<String, TenantClientConfig>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            source: TenantSourceKind::default(),
            directory_url: None,
            cache_ttl_secs: default_tenant_cache_ttl_secs(),
            tenants: HashMap::new(),
        }
    }
}

impl TenancyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Token verification strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Verify the JWT signature against the realm's key set.
    #[default]
    Local,
    /// Ask the realm's introspection endpoint.
    Introspection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub mode: VerificationMode,

    /// Keycloak base URL; realms live under `{keycloak_url}/realms/{tenant}`.
    pub keycloak_url: Url,

    /// Client credentials for introspection.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Allowed clock skew when checking `exp`.
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session lifetime in seconds, renewed on every login and refresh.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: i64,

    /// Plain-HTTP development mode: cookies are `SameSite=Lax` and not
    /// `Secure`.
    #[serde(default)]
    pub insecure_cookies: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl_secs(),
            insecure_cookies: false,
        }
    }
}

/// Login policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Exact addresses allowed to log in.
    #[serde(default)]
    pub allowed_emails: Vec<String>,

    /// Domain suffixes allowed to log in, each starting with `.`.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Organisation whose members are administrators.
    #[serde(default)]
    pub admin_org: Option<String>,

    /// Organisation whose members get early access.
    #[serde(default)]
    pub early_access_org: Option<String>,

    /// Public client id used for every tenant instead of the tenant's own.
    #[serde(default)]
    pub public_client_id: Option<String>,
}

impl AccessConfig {
    /// Builds the allow-list, dropping blank entries.
    pub fn allow_list(&self) -> Result<AllowList, Report<AuthError>> {
        AllowList::new(clean(&self.allowed_emails), clean(&self.allowed_domains))
    }

    pub fn privilege_policy(&self) -> PrivilegePolicy {
        PrivilegePolicy {
            admin_org: self.admin_org.clone().filter(|o| !o.is_empty()),
            early_access_org: self.early_access_org.clone().filter(|o| !o.is_empty()),
        }
    }
}

fn clean(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_connections() -> u32 {
    5
}

fn default_tenant_cache_ttl_secs() -> u64 {
    60
}

fn default_leeway_secs() -> u64 {
    30
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_session_ttl_secs() -> i64 {
    14 * 24 * 60 * 60
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    /// Loads configuration from `tenant-gate.toml` (if present) and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(environment()),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_secret.len() < MIN_STATE_SECRET_LEN {
            return Err(invalid(format!(
                "state_secret must be at least {MIN_STATE_SECRET_LEN} bytes"
            )));
        }
        if self.http_timeout_secs == 0 {
            return Err(invalid("http_timeout_secs must be positive"));
        }
        if self.session.ttl_secs <= 0 {
            return Err(invalid("session.ttl_secs must be positive"));
        }
        if self.session.cookie_name.is_empty() {
            return Err(invalid("session.cookie_name must not be empty"));
        }

        match self.tenancy.source {
            TenantSourceKind::Static if self.tenancy.tenants.is_empty() => {
                return Err(invalid(
                    "tenancy.source is 'static' but tenancy.tenants is empty",
                ));
            }
            TenantSourceKind::Directory if self.tenancy.directory_url.is_none() => {
                return Err(invalid(
                    "tenancy.source is 'directory' but tenancy.directory_url is not set",
                ));
            }
            _ => {}
        }

        if self.verification.mode == VerificationMode::Introspection
            && (self.introspection_client_id().is_none()
                || self.verification.client_secret.is_none())
        {
            return Err(invalid(
                "introspection needs verification.client_id (or access.public_client_id) \
                 and verification.client_secret",
            ));
        }

        self.access
            .allow_list()
            .map_err(|report| invalid(report.to_string()))?;
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.ttl_secs)
    }

    /// Client id presented to the introspection endpoint.
    pub fn introspection_client_id(&self) -> Option<&str> {
        self.verification
            .client_id
            .as_deref()
            .or(self.access.public_client_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

fn environment() -> Environment {
    let env = Environment::default()
        .separator("__")
        .try_parsing(true)
        .ignore_empty(true)
        .list_separator(",");
    LIST_KEYS
        .iter()
        .fold(env, |env, key| env.with_list_parse_key(key))
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Message(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_builder(
            config::Config::builder().add_source(environment().source(Some(source))),
        )
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("STATE_SECRET", SECRET),
            ("POST_LOGOUT_REDIRECT", "https://chat.example.com/"),
            ("VERIFICATION__KEYCLOAK_URL", "https://sso.example.com"),
            ("TENANCY__SOURCE", "directory"),
            ("TENANCY__DIRECTORY_URL", "https://accounts.example.com"),
        ]
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = load(&base()).unwrap();

        assert_eq!(config.listen_addr, default_listen_addr());
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.tenancy.source, TenantSourceKind::Directory);
        assert_eq!(config.tenancy.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.verification.mode, VerificationMode::Local);
        assert_eq!(config.verification.leeway_secs, 30);
        assert_eq!(config.session.cookie_name, "session");
        assert_eq!(config.session_ttl(), chrono::Duration::weeks(2));
        assert!(!config.session.insecure_cookies);
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert!(config.access.allow_list().unwrap().is_open());
    }

    #[test]
    fn allow_lists_are_comma_separated() {
        let mut vars = base();
        vars.push(("ACCESS__ALLOWED_EMAILS", "a@x.com, b@y.com"));
        vars.push(("ACCESS__ALLOWED_DOMAINS", ".x.com"));
        let config = load(&vars).unwrap();

        assert_eq!(config.access.allowed_emails.len(), 2);
        assert_eq!(config.access.allowed_domains, vec![".x.com".to_string()]);
        assert!(!config.access.allow_list().unwrap().is_open());
    }

    #[test]
    fn domain_without_leading_dot_is_rejected() {
        let mut vars = base();
        vars.push(("ACCESS__ALLOWED_DOMAINS", "x.com"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn short_state_secret_is_rejected() {
        let mut vars = base();
        vars[0] = ("STATE_SECRET", "too-short");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn directory_source_needs_url() {
        let vars: Vec<_> = base()
            .into_iter()
            .filter(|(k, _)| *k != "TENANCY__DIRECTORY_URL")
            .collect();
        assert!(load(&vars).is_err());
    }

    #[test]
    fn static_tenants_from_environment() {
        let mut vars: Vec<_> = base()
            .into_iter()
            .filter(|(k, _)| !k.starts_with("TENANCY__"))
            .collect();
        vars.extend([
            (
                "TENANCY__TENANTS__ACME__AUTH_URL",
                "https://sso.example.com/realms/acme/protocol/openid-connect/auth",
            ),
            ("TENANCY__TENANTS__ACME__CLIENT_ID", "chat-ui"),
            ("TENANCY__TENANTS__ACME__SCOPES", "openid profile"),
            (
                "TENANCY__TENANTS__ACME__REDIRECT_URI",
                "https://chat.example.com/login/callback",
            ),
            ("TENANCY__TENANTS__ACME__NAME_CLAIM", "name"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.tenancy.source, TenantSourceKind::Static);
        let acme = &config.tenancy.tenants["acme"];
        assert_eq!(acme.client_id, "chat-ui");
        assert_eq!(acme.scope_list(), vec!["openid", "profile"]);
    }

    #[test]
    fn introspection_needs_credentials() {
        let mut vars = base();
        vars.push(("VERIFICATION__MODE", "introspection"));
        assert!(load(&vars).is_err());

        vars.push(("ACCESS__PUBLIC_CLIENT_ID", "chat-ui"));
        vars.push(("VERIFICATION__CLIENT_SECRET", "s3cret"));
        let config = load(&vars).unwrap();
        assert_eq!(config.introspection_client_id(), Some("chat-ui"));
    }

    #[test]
    fn org_policy_ignores_blank_values() {
        let mut vars = base();
        vars.push(("ACCESS__ADMIN_ORG", "org-admins"));
        let policy = load(&vars).unwrap().access.privilege_policy();

        assert_eq!(policy.admin_org.as_deref(), Some("org-admins"));
        assert!(policy.early_access_org.is_none());
    }
}
