//! PostgreSQL account store.
//!
//! Every write is a single statement keyed by a natural key, so concurrent
//! logins for the same subject or session converge on one row.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tenant_gate_access::{
    AccountStore, AuthError, Session, SessionId, SessionUpdate, Settings, UpsertedUser, User,
    UserUpsert,
};
use tenant_gate_core::UserId;

const USER_COLUMNS: &str = "id, external_subject, username, display_name, email, tenant_name, \
     avatar_url, is_admin, is_early_access, created_at, updated_at";

const SESSION_COLUMNS: &str = "session_id, user_id, tenant_name, access_token, refresh_token, \
     token_expires_at, user_agent, ip, created_at, updated_at, expires_at";

fn store_error(error: sqlx::Error) -> AuthError {
    AuthError::store(error)
}

fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, AuthError>
where
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| AuthError::store(format!("invalid {kind} id '{raw}': {e}")))
}

/// Row type for user queries.
#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    external_subject: String,
    username: String,
    display_name: String,
    email: Option<String>,
    tenant_name: String,
    avatar_url: Option<String>,
    is_admin: bool,
    is_early_access: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<User, AuthError> {
        Ok(User {
            id: parse_id("user", &self.id)?,
            external_subject: self.external_subject,
            username: self.username,
            display_name: self.display_name,
            email: self.email,
            tenant_name: self.tenant_name,
            avatar_url: self.avatar_url,
            is_admin: self.is_admin,
            is_early_access: self.is_early_access,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UpsertedUserRow {
    #[sqlx(flatten)]
    user: UserRow,
    created: bool,
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_id: Option<String>,
    tenant_name: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    user_agent: Option<String>,
    ip: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, AuthError> {
        Ok(Session {
            session_id: SessionId::new(self.session_id),
            user_id: self
                .user_id
                .as_deref()
                .map(|id| parse_id("user", id))
                .transpose()?,
            tenant_name: self.tenant_name,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_expires_at: self.token_expires_at,
            user_agent: self.user_agent,
            ip: self.ip,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

/// Account store on a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, Report<AuthError>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(row.map(UserRow::try_into_user).transpose()?)
    }

    async fn upsert_user(
        &self,
        user: UserUpsert,
        now: DateTime<Utc>,
    ) -> Result<UpsertedUser, Report<AuthError>> {
        // `xmax = 0` holds only for a freshly inserted tuple.
        let row: UpsertedUserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id, external_subject, username, display_name, email, tenant_name,
                               avatar_url, is_admin, is_early_access, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (external_subject) DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                email = COALESCE(EXCLUDED.email, users.email),
                tenant_name = EXCLUDED.tenant_name,
                avatar_url = COALESCE(EXCLUDED.avatar_url, users.avatar_url),
                is_admin = EXCLUDED.is_admin,
                is_early_access = EXCLUDED.is_early_access,
                updated_at = EXCLUDED.updated_at
            RETURNING {USER_COLUMNS}, (xmax = 0) AS created
            "#
        ))
        .bind(UserId::new().to_string())
        .bind(&user.external_subject)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(&user.tenant_name)
        .bind(&user.avatar_url)
        .bind(user.is_admin)
        .bind(user.is_early_access)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(UpsertedUser {
            user: row.user.try_into_user()?,
            created: row.created,
        })
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, Report<AuthError>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(SessionRow::try_into_session).transpose()?)
    }

    async fn upsert_session(
        &self,
        id: &SessionId,
        update: SessionUpdate,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Session, Report<AuthError>> {
        let row: SessionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO sessions (session_id, user_id, tenant_name, access_token, refresh_token,
                                  token_expires_at, user_agent, ip, created_at, updated_at,
                                  expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10)
            ON CONFLICT (session_id) DO UPDATE SET
                user_id = COALESCE(EXCLUDED.user_id, sessions.user_id),
                tenant_name = COALESCE(EXCLUDED.tenant_name, sessions.tenant_name),
                access_token = COALESCE(EXCLUDED.access_token, sessions.access_token),
                refresh_token = COALESCE(EXCLUDED.refresh_token, sessions.refresh_token),
                token_expires_at = COALESCE(EXCLUDED.token_expires_at, sessions.token_expires_at),
                user_agent = COALESCE(EXCLUDED.user_agent, sessions.user_agent),
                ip = COALESCE(EXCLUDED.ip, sessions.ip),
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .bind(update.user_id.map(|u| u.to_string()))
        .bind(update.tenant_name)
        .bind(update.access_token)
        .bind(update.refresh_token)
        .bind(update.token_expires_at)
        .bind(update.user_agent)
        .bind(update.ip)
        .bind(now)
        .bind(now + ttl)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.try_into_session()?)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, Report<AuthError>> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn adopt_session_settings(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, Report<AuthError>> {
        let rekeyed = sqlx::query(
            r#"
            UPDATE settings
            SET user_id = $2, session_id = NULL, updated_at = $3
            WHERE session_id = $1
              AND NOT EXISTS (SELECT 1 FROM settings WHERE user_id = $2)
            "#,
        )
        .bind(session_id.as_str())
        .bind(user_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await;

        match rekeyed {
            Ok(result) if result.rows_affected() > 0 => return Ok(result.rows_affected()),
            Ok(_) => {}
            // A concurrent login adopted settings for this user first.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {}
            Err(e) => return Err(store_error(e).into()),
        }

        // The user already has a document; drop the session's copy.
        let deleted = sqlx::query("DELETE FROM settings WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(deleted.rows_affected())
    }

    async fn insert_default_settings(&self, settings: Settings) -> Result<bool, Report<AuthError>> {
        let result = sqlx::query(
            r#"
            INSERT INTO settings (id, user_id, session_id, active_model,
                                  share_conversations_with_model_authors,
                                  ethics_modal_accepted_at, custom_prompts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(settings.id.to_string())
        .bind(settings.user_id.map(|u| u.to_string()))
        .bind(settings.session_id.map(|s| s.to_string()))
        .bind(settings.active_model)
        .bind(settings.share_conversations_with_model_authors)
        .bind(settings.ethics_modal_accepted_at)
        .bind(Json(settings.custom_prompts))
        .bind(settings.created_at)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reassign_conversations(
        &self,
        session_id: &SessionId,
        user_id: UserId,
    ) -> Result<u64, Report<AuthError>> {
        let result = sqlx::query(
            "UPDATE conversations SET user_id = $2, session_id = NULL WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_row(id: &str) -> UserRow {
        let now = Utc::now();
        UserRow {
            id: id.to_string(),
            external_subject: "sub-1".to_string(),
            username: "jane".to_string(),
            display_name: "Jane Doe".to_string(),
            email: None,
            tenant_name: "acme".to_string(),
            avatar_url: None,
            is_admin: false,
            is_early_access: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn user_row_round_trips_prefixed_id() {
        let id = UserId::new();
        let user = user_row(&id.to_string()).try_into_user().unwrap();
        assert_eq!(user.id, id);
    }

    #[test]
    fn corrupt_user_id_is_store_error() {
        let err = user_row("usr_not-a-ulid").try_into_user().unwrap_err();
        assert!(matches!(err, AuthError::Store { .. }));
    }

    #[test]
    fn anonymous_session_row_has_no_user() {
        let now = Utc::now();
        let session = SessionRow {
            session_id: "anon".to_string(),
            user_id: None,
            tenant_name: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            user_agent: Some("curl/8".to_string()),
            ip: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(1),
        }
        .try_into_session()
        .unwrap();

        assert_eq!(session.session_id.as_str(), "anon");
        assert!(session.user_id.is_none());
        assert!(!session.is_expired_at(now));
    }
}
