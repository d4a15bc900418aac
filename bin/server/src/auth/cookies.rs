//! The auth cookies and their flags.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Refresh token cookie name.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Session id chosen at login start; becomes the session id on callback.
pub const TEMP_SESSION_COOKIE: &str = "temp_session_id";

/// Tenant name of the last login.
pub const ACCOUNT_INFO_COOKIE: &str = "account_info";

const REFRESH_TOKEN_MAX_AGE: Duration = Duration::days(30);
const TEMP_SESSION_MAX_AGE: Duration = Duration::hours(1);
const ACCOUNT_INFO_MAX_AGE: Duration = Duration::days(30);

/// Builds every auth cookie with the same `path`, `HttpOnly`, `Secure` and
/// `SameSite` flags.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    session_name: String,
    session_max_age: Duration,
    secure: bool,
    same_site: SameSite,
}

impl CookiePolicy {
    /// `insecure` selects plain-HTTP development flags: `SameSite=Lax`
    /// without `Secure`. Otherwise cookies are `SameSite=None; Secure`.
    pub fn new(session_name: impl Into<String>, session_max_age: Duration, insecure: bool) -> Self {
        Self {
            session_name: session_name.into(),
            session_max_age,
            secure: !insecure,
            same_site: if insecure { SameSite::Lax } else { SameSite::None },
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    fn build(&self, name: String, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age)
            .build()
    }

    pub fn session(&self, session_id: &str) -> Cookie<'static> {
        self.build(
            self.session_name.clone(),
            session_id.to_string(),
            self.session_max_age,
        )
    }

    pub fn refresh_token(&self, token: &str) -> Cookie<'static> {
        self.build(
            REFRESH_TOKEN_COOKIE.to_string(),
            token.to_string(),
            REFRESH_TOKEN_MAX_AGE,
        )
    }

    pub fn temp_session(&self, session_id: &str) -> Cookie<'static> {
        self.build(
            TEMP_SESSION_COOKIE.to_string(),
            session_id.to_string(),
            TEMP_SESSION_MAX_AGE,
        )
    }

    pub fn account_info(&self, tenant: &str) -> Cookie<'static> {
        self.build(
            ACCOUNT_INFO_COOKIE.to_string(),
            tenant.to_string(),
            ACCOUNT_INFO_MAX_AGE,
        )
    }

    /// An expired cookie that makes the browser drop `name`.
    pub fn clear(&self, name: &str) -> Cookie<'static> {
        self.build(name.to_string(), String::new(), Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_policy_uses_same_site_none() {
        let policy = CookiePolicy::new("session", Duration::weeks(2), false);
        let cookie = policy.session("abc");

        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.max_age(), Some(Duration::weeks(2)));
    }

    #[test]
    fn insecure_policy_uses_lax() {
        let policy = CookiePolicy::new("session", Duration::weeks(2), true);
        let cookie = policy.refresh_token("rt");

        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[test]
    fn lifetimes() {
        let policy = CookiePolicy::new("hf-chat", Duration::weeks(2), false);

        assert_eq!(policy.refresh_token("rt").max_age(), Some(Duration::days(30)));
        assert_eq!(policy.temp_session("t").max_age(), Some(Duration::hours(1)));
        assert_eq!(policy.account_info("acme").max_age(), Some(Duration::days(30)));
        assert_eq!(policy.session("s").name(), "hf-chat");
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let policy = CookiePolicy::new("session", Duration::weeks(2), false);
        let cookie = policy.clear(TEMP_SESSION_COOKIE);

        assert_eq!(cookie.name(), TEMP_SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
        assert_eq!(cookie.path(), Some("/"));
    }
}
