//! Per-identity preference documents.
//!
//! Before login a settings document is keyed by session; after login it is
//! keyed by user. There is at most one document per identity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenant_gate_core::{SettingsId, UserId};

use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: SettingsId,
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub active_model: Option<String>,
    pub share_conversations_with_model_authors: bool,
    pub ethics_modal_accepted_at: Option<DateTime<Utc>>,
    /// Custom system prompts keyed by model id.
    #[serde(default)]
    pub custom_prompts: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    /// Default settings for a user who just logged in for the first time.
    ///
    /// Completing login counts as accepting the ethics notice.
    #[must_use]
    pub fn defaults_for_user(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: SettingsId::new(),
            user_id: Some(user_id),
            session_id: None,
            active_model: None,
            share_conversations_with_model_authors: true,
            ethics_modal_accepted_at: Some(now),
            custom_prompts: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Default settings for an anonymous session.
    #[must_use]
    pub fn defaults_for_session(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id: SettingsId::new(),
            user_id: None,
            session_id: Some(session_id),
            active_model: None,
            share_conversations_with_model_authors: true,
            ethics_modal_accepted_at: None,
            custom_prompts: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the document from its session to `user_id`.
    pub fn rekey_to_user(&mut self, user_id: UserId, now: DateTime<Utc>) {
        self.user_id = Some(user_id);
        self.session_id = None;
        self.updated_at = now;
    }
}
