//! In-memory [`AccountStore`] for tests and single-node development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use tenant_gate_core::{SettingsId, UserId};
use tokio::sync::RwLock;

use super::{AccountStore, UpsertedUser};
use crate::error::AuthError;
use crate::session::{Session, SessionId, SessionUpdate};
use crate::settings::Settings;
use crate::user::{User, UserUpsert};

/// Who owns a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOwner {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
}

#[derive(Default)]
struct Collections {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    settings: HashMap<SettingsId, Settings>,
    conversations: HashMap<String, ConversationOwner>,
}

/// Store backed by hash maps behind a single lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an anonymous conversation owned by `session_id`.
    pub async fn insert_conversation(&self, id: &str, session_id: &SessionId) {
        self.inner.write().await.conversations.insert(
            id.to_string(),
            ConversationOwner {
                user_id: None,
                session_id: Some(session_id.clone()),
            },
        );
    }

    pub async fn conversation_owner(&self, id: &str) -> Option<ConversationOwner> {
        self.inner.read().await.conversations.get(id).cloned()
    }

    /// Stores a settings document as-is.
    pub async fn insert_settings(&self, settings: Settings) {
        self.inner
            .write()
            .await
            .settings
            .insert(settings.id, settings);
    }

    pub async fn find_user_by_subject(&self, external_subject: &str) -> Option<User> {
        self.inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.external_subject == external_subject)
            .cloned()
    }

    pub async fn find_settings_for_user(&self, user_id: UserId) -> Option<Settings> {
        self.inner
            .read()
            .await
            .settings
            .values()
            .find(|s| s.user_id == Some(user_id))
            .cloned()
    }

    pub async fn find_settings_for_session(&self, session_id: &SessionId) -> Option<Settings> {
        self.inner
            .read()
            .await
            .settings
            .values()
            .find(|s| s.session_id.as_ref() == Some(session_id))
            .cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn settings_count(&self) -> usize {
        self.inner.read().await.settings.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, Report<AuthError>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn upsert_user(
        &self,
        user: UserUpsert,
        now: DateTime<Utc>,
    ) -> Result<UpsertedUser, Report<AuthError>> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .users
            .values_mut()
            .find(|u| u.external_subject == user.external_subject)
        {
            user.apply_to(existing, now);
            return Ok(UpsertedUser {
                user: existing.clone(),
                created: false,
            });
        }

        let created = user.into_new_user(now);
        inner.users.insert(created.id, created.clone());
        Ok(UpsertedUser {
            user: created,
            created: true,
        })
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, Report<AuthError>> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn upsert_session(
        &self,
        id: &SessionId,
        update: SessionUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Session, Report<AuthError>> {
        let mut inner = self.inner.write().await;
        let session = match inner.sessions.get_mut(id) {
            Some(existing) => {
                update.apply_to(existing, now, ttl);
                existing.clone()
            }
            None => {
                let session = update.into_session(id.clone(), now, ttl);
                inner.sessions.insert(id.clone(), session.clone());
                session
            }
        };
        Ok(session)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, Report<AuthError>> {
        Ok(self.inner.write().await.sessions.remove(id).is_some())
    }

    async fn adopt_session_settings(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, Report<AuthError>> {
        let mut inner = self.inner.write().await;

        let matched: Vec<SettingsId> = inner
            .settings
            .values()
            .filter(|s| s.session_id.as_ref() == Some(session_id))
            .map(|s| s.id)
            .collect();
        let user_has_settings = inner.settings.values().any(|s| s.user_id == Some(user_id));

        for (idx, id) in matched.iter().enumerate() {
            if user_has_settings || idx > 0 {
                inner.settings.remove(id);
            } else if let Some(settings) = inner.settings.get_mut(id) {
                settings.rekey_to_user(user_id, now);
            }
        }

        Ok(matched.len() as u64)
    }

    async fn insert_default_settings(&self, settings: Settings) -> Result<bool, Report<AuthError>> {
        let mut inner = self.inner.write().await;
        let exists = settings
            .user_id
            .is_some_and(|uid| inner.settings.values().any(|s| s.user_id == Some(uid)));
        if exists {
            return Ok(false);
        }
        inner.settings.insert(settings.id, settings);
        Ok(true)
    }

    async fn reassign_conversations(
        &self,
        session_id: &SessionId,
        user_id: UserId,
    ) -> Result<u64, Report<AuthError>> {
        let mut inner = self.inner.write().await;
        let mut matched = 0;
        for owner in inner.conversations.values_mut() {
            if owner.session_id.as_ref() == Some(session_id) {
                owner.user_id = Some(user_id);
                owner.session_id = None;
                matched += 1;
            }
        }
        Ok(matched)
    }
}
