//! Merges a login or refresh into users, sessions and settings.
//!
//! Writes happen in a fixed order: user, session, previous session delete,
//! settings, conversations. An interrupted sequence leaves at most an
//! anonymous leftover that the next login cleans up; it never leaves two
//! sessions for one login.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use tenant_gate_core::UserId;
use tracing::{debug, info};

use crate::claims::{Identity, PrivilegePolicy};
use crate::error::AuthError;
use crate::session::{DEFAULT_SESSION_TTL_SECS, Session, SessionId, SessionUpdate};
use crate::settings::Settings;
use crate::store::AccountStore;
use crate::user::UserUpsert;

/// Request metadata stored on the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Tokens to store on the session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Input to [`Reconciler::reconcile`].
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    /// Present on login, absent on refresh.
    pub identity: Option<&'a Identity>,
    pub tokens: Option<SessionTokens>,
    pub session_id: &'a SessionId,
    pub tenant: Option<&'a str>,
    /// The session the browser held before this login.
    pub previous_session_id: Option<&'a SessionId>,
    pub context: ClientContext,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub user_id: Option<UserId>,
    pub is_new_user: bool,
    pub session: Session,
}

/// The only writer of users, sessions, settings and conversation ownership.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn AccountStore>,
    privileges: PrivilegePolicy,
    session_ttl: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, privileges: PrivilegePolicy) -> Self {
        Self {
            store,
            privileges,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
    ) -> Result<Reconciled, Report<AuthError>> {
        self.reconcile_at(request, Utc::now()).await
    }

    pub async fn reconcile_at(
        &self,
        request: ReconcileRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, Report<AuthError>> {
        let (user_id, is_new_user) = match request.identity {
            Some(identity) => {
                let tenant = request.tenant.ok_or_else(|| {
                    AuthError::configuration("a login must name its tenant")
                })?;
                let flags = self.privileges.evaluate(identity, tenant);
                let upserted = self
                    .store
                    .upsert_user(
                        UserUpsert {
                            external_subject: identity.subject.clone(),
                            username: identity.username.clone(),
                            display_name: identity.display_name.clone(),
                            email: identity.email.clone(),
                            tenant_name: tenant.to_string(),
                            avatar_url: identity.avatar_url.clone(),
                            is_admin: flags.is_admin,
                            is_early_access: flags.is_early_access,
                        },
                        now,
                    )
                    .await?;
                info!(
                    user_id = %upserted.user.id,
                    created = upserted.created,
                    is_admin = flags.is_admin,
                    "user login"
                );
                (Some(upserted.user.id), upserted.created)
            }
            None => {
                let session = self
                    .store
                    .find_session(request.session_id)
                    .await?
                    .filter(|s| !s.is_expired_at(now))
                    .ok_or_else(|| AuthError::SessionNotFound {
                        session_id: request.session_id.to_string(),
                    })?;
                (session.user_id, false)
            }
        };

        let (access_token, refresh_token, token_expires_at) = match request.tokens {
            Some(tokens) => (
                Some(tokens.access_token),
                tokens.refresh_token,
                tokens.expires_at,
            ),
            None => (None, None, None),
        };
        let session = self
            .store
            .upsert_session(
                request.session_id,
                SessionUpdate {
                    user_id,
                    tenant_name: request.tenant.map(str::to_string),
                    access_token,
                    refresh_token,
                    token_expires_at,
                    user_agent: request.context.user_agent,
                    ip: request.context.ip,
                },
                now,
                self.session_ttl,
            )
            .await?;

        let mut adopted_settings = 0;
        if let Some(previous) = request.previous_session_id {
            if previous != request.session_id && self.store.delete_session(previous).await? {
                debug!(session_id = %previous, "superseded previous session");
            }

            if let Some(user_id) = user_id {
                adopted_settings = self
                    .store
                    .adopt_session_settings(previous, user_id, now)
                    .await?;
                let conversations = self.store.reassign_conversations(previous, user_id).await?;
                debug!(
                    settings = adopted_settings,
                    conversations, "re-pointed session data to user"
                );
            }
        }

        if let Some(user_id) = user_id.filter(|_| is_new_user && adopted_settings == 0) {
            self.store
                .insert_default_settings(Settings::defaults_for_user(user_id, now))
                .await?;
        }

        Ok(Reconciled {
            user_id,
            is_new_user,
            session,
        })
    }
}
