//! Persistence seam for users, sessions, settings and conversation ownership.
//!
//! Every write is keyed by a natural key (`external_subject`, `session_id`),
//! so concurrent logins for the same identity converge on one row instead of
//! duplicating it. Implementations must make each method atomic on its own;
//! callers take no locks.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use tenant_gate_core::UserId;

use crate::error::AuthError;
use crate::session::{Session, SessionId, SessionUpdate};
use crate::settings::Settings;
use crate::user::{User, UserUpsert};

pub use memory::{ConversationOwner, MemoryStore};

/// Result of a user upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedUser {
    pub user: User,
    /// True when no user with this subject existed before.
    pub created: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, Report<AuthError>>;

    /// Inserts a user or overwrites the mutable fields of the one with the
    /// same external subject.
    async fn upsert_user(
        &self,
        user: UserUpsert,
        now: DateTime<Utc>,
    ) -> Result<UpsertedUser, Report<AuthError>>;

    /// Returns the stored row, expired or not.
    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, Report<AuthError>>;

    /// Creates the session or merges the supplied fields into it. The
    /// lifetime is extended to `now + ttl` either way.
    async fn upsert_session(
        &self,
        id: &SessionId,
        update: SessionUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Session, Report<AuthError>>;

    /// Deletes a session. Returns whether a row existed.
    async fn delete_session(&self, id: &SessionId) -> Result<bool, Report<AuthError>>;

    /// Re-keys the session's settings document to `user_id`.
    ///
    /// If the user already owns a settings document the session's document
    /// is removed instead, keeping one document per identity. Returns the
    /// number of session documents matched.
    async fn adopt_session_settings(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, Report<AuthError>>;

    /// Inserts `settings` unless its user already has a document. Returns
    /// whether it was inserted.
    async fn insert_default_settings(&self, settings: Settings) -> Result<bool, Report<AuthError>>;

    /// Moves every conversation owned by the session to `user_id`. Returns
    /// the number of conversations matched.
    async fn reassign_conversations(
        &self,
        session_id: &SessionId,
        user_id: UserId,
    ) -> Result<u64, Report<AuthError>>;
}
