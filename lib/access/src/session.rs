//! Browser sessions.
//!
//! A session starts anonymous, gains a user on login and carries the
//! provider tokens used for refresh. Expired sessions are treated as absent;
//! nothing sweeps them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tenant_gate_core::UserId;

/// Default session lifetime: two weeks.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 14 * 24 * 60 * 60;

/// Opaque session identifier carried in the `session` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored session row.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    /// Absent while the session is anonymous.
    pub user_id: Option<UserId>,
    pub tenant_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("tenant_name", &self.tenant_name)
            .field("token_expires_at", &self.token_expires_at)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Returns true once `expires_at` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A partial session write. `None` fields leave the stored value untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub user_id: Option<UserId>,
    pub tenant_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl std::fmt::Debug for SessionUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUpdate")
            .field("user_id", &self.user_id)
            .field("tenant_name", &self.tenant_name)
            .field("token_expires_at", &self.token_expires_at)
            .finish_non_exhaustive()
    }
}

impl SessionUpdate {
    /// Builds a new row from this update.
    #[must_use]
    pub fn into_session(self, session_id: SessionId, now: DateTime<Utc>, ttl: Duration) -> Session {
        Session {
            session_id,
            user_id: self.user_id,
            tenant_name: self.tenant_name,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_expires_at: self.token_expires_at,
            user_agent: self.user_agent,
            ip: self.ip,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Merges the supplied fields into `session` and extends its lifetime.
    pub fn apply_to(self, session: &mut Session, now: DateTime<Utc>, ttl: Duration) {
        fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        merge(&mut session.user_id, self.user_id);
        merge(&mut session.tenant_name, self.tenant_name);
        merge(&mut session.access_token, self.access_token);
        merge(&mut session.refresh_token, self.refresh_token);
        merge(&mut session.token_expires_at, self.token_expires_at);
        merge(&mut session.user_agent, self.user_agent);
        merge(&mut session.ip, self.ip);
        session.updated_at = now;
        session.expires_at = now + ttl;
    }
}
