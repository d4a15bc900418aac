//! Persistent user record.
//!
//! Users are keyed by the identity provider's `sub` claim. The internal
//! [`UserId`] is what sessions, settings and conversations point at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenant_gate_core::UserId;

/// An authenticated user of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// The identity provider's `sub` claim. Unique across users.
    pub external_subject: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub tenant_name: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_early_access: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields a login writes to a user record.
///
/// `email` and `avatar_url` only overwrite the stored value when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUpsert {
    pub external_subject: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub tenant_name: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_early_access: bool,
}

impl UserUpsert {
    /// Builds a brand-new user record.
    #[must_use]
    pub fn into_new_user(self, now: DateTime<Utc>) -> User {
        User {
            id: UserId::new(),
            external_subject: self.external_subject,
            username: self.username,
            display_name: self.display_name,
            email: self.email,
            tenant_name: self.tenant_name,
            avatar_url: self.avatar_url,
            is_admin: self.is_admin,
            is_early_access: self.is_early_access,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the mutable fields of an existing record.
    pub fn apply_to(self, user: &mut User, now: DateTime<Utc>) {
        user.username = self.username;
        user.display_name = self.display_name;
        if self.email.is_some() {
            user.email = self.email;
        }
        if self.avatar_url.is_some() {
            user.avatar_url = self.avatar_url;
        }
        user.tenant_name = self.tenant_name;
        user.is_admin = self.is_admin;
        user.is_early_access = self.is_early_access;
        user.updated_at = now;
    }
}
