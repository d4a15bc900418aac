//! Login, session check, refresh and logout.
//!
//! The flow is stateless between [`LoginFlow::begin_login`] and
//! [`LoginFlow::complete_login`]: the only link between them is the signed
//! state, bound to the browser's `temp_session_id` cookie.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rootcause::prelude::Report;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::allow_list::AllowList;
use crate::claims::map_user_info;
use crate::error::AuthError;
use crate::reconcile::{ClientContext, ReconcileRequest, Reconciler, SessionTokens};
use crate::resolver::ClientResolver;
use crate::session::{Session, SessionId};
use crate::state::{StateCodec, random_nonce};
use crate::store::AccountStore;
use crate::user::User;
use crate::verify::TokenVerifier;

/// Query parameters of the provider's redirect back to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// The `iss` parameter, when the provider sends one.
    pub iss: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to send the browser to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub auth_url: Url,
    /// Must be stored in the `temp_session_id` cookie.
    pub temp_session_id: SessionId,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub user: User,
    pub is_new_user: bool,
    pub tenant: String,
    pub refresh_token: String,
}

/// Answer to a session check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub user: Option<User>,
}

impl SessionStatus {
    fn anonymous() -> Self {
        Self::default()
    }
}

/// A completed refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// The rotated refresh token, or the old one if the provider kept it.
    pub refresh_token: String,
    pub expires_in: Option<std::time::Duration>,
    pub session: Session,
}

/// Deployment-level policy for the flow.
#[derive(Debug, Clone)]
pub struct FlowPolicy {
    pub allow_list: AllowList,
    /// Where the provider sends the browser after logout, and the fallback
    /// when it has no end-session endpoint.
    pub post_logout_redirect: Url,
}

/// Drives the authorization-code flow and the session lifecycle.
#[derive(Clone)]
pub struct LoginFlow {
    resolver: ClientResolver,
    codec: StateCodec,
    verifier: Arc<dyn TokenVerifier>,
    store: Arc<dyn AccountStore>,
    reconciler: Reconciler,
    policy: FlowPolicy,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        resolver: ClientResolver,
        codec: StateCodec,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn AccountStore>,
        reconciler: Reconciler,
        policy: FlowPolicy,
    ) -> Self {
        Self {
            resolver,
            codec,
            verifier,
            store,
            reconciler,
            policy,
        }
    }

    /// Session lifetime used for new and refreshed sessions.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.reconciler.session_ttl()
    }

    /// Resolves the tenant and builds its authorization URL.
    ///
    /// A missing `session_id` gets a freshly generated one.
    #[instrument(skip(self, session_id))]
    pub async fn begin_login(
        &self,
        tenant: &str,
        session_id: Option<SessionId>,
    ) -> Result<LoginRedirect, Report<AuthError>> {
        let client = self.resolver.resolve(tenant).await?;
        let temp_session_id = session_id.unwrap_or_else(SessionId::generate);

        let nonce = random_nonce()?;
        let state = self.codec.mint(
            temp_session_id.as_str(),
            &client.redirect_uri,
            tenant,
            &nonce,
        )?;
        let auth_url = self
            .resolver
            .provider()
            .authorization_url(&client, &state, &nonce)?;

        info!(tenant, "login started");
        Ok(LoginRedirect {
            auth_url,
            temp_session_id,
        })
    }

    /// Finishes a login from the provider's callback.
    ///
    /// `temp_session_id` is the cookie set by [`Self::begin_login`] and
    /// becomes the new session id. `previous_session_id` is the browser's
    /// current `session` cookie, if any.
    #[instrument(skip_all)]
    pub async fn complete_login(
        &self,
        params: CallbackParams,
        temp_session_id: Option<&SessionId>,
        previous_session_id: Option<&SessionId>,
        context: ClientContext,
    ) -> Result<LoginOutcome, Report<AuthError>> {
        if let Some(error) = params.error {
            let reason = match params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(AuthError::upstream("identity provider", reason).into());
        }

        let temp_session_id = temp_session_id
            .ok_or_else(|| AuthError::csrf("no session for CSRF validation"))?;
        let verified = params
            .state
            .as_deref()
            .and_then(|state| self.codec.verify(state, temp_session_id.as_str()))
            .ok_or_else(|| AuthError::csrf("invalid or expired state"))?;
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::csrf("callback carries no authorization code"))?;

        let tenant = verified.tenant;
        let client = self.resolver.resolve(&tenant).await?;
        client.check_issuer_hint(params.iss.as_deref())?;

        let provider = self.resolver.provider();
        let grant = provider
            .exchange_code(&client, &code, &verified.redirect_url, &verified.nonce)
            .await?
            .into_grant()?;
        let claims = provider
            .fetch_user_info(&client, &grant.access_token)
            .await?;
        let identity = map_user_info(&claims, &client.name_claim)?;
        self.policy.allow_list.check(&identity)?;

        let expires_at = chrono::Duration::from_std(grant.expires_in)
            .ok()
            .map(|d| Utc::now() + d);
        let reconciled = self
            .reconciler
            .reconcile(ReconcileRequest {
                identity: Some(&identity),
                tokens: Some(SessionTokens {
                    access_token: grant.access_token,
                    refresh_token: Some(grant.refresh_token.clone()),
                    expires_at,
                }),
                session_id: temp_session_id,
                tenant: Some(&tenant),
                previous_session_id,
                context,
            })
            .await?;

        let user_id = reconciled
            .user_id
            .ok_or_else(|| AuthError::store("login finished without a user"))?;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AuthError::store(format!("user {user_id} vanished after login")))?;

        info!(%tenant, user_id = %user.id, new_user = reconciled.is_new_user, "login completed");
        Ok(LoginOutcome {
            session: reconciled.session,
            user,
            is_new_user: reconciled.is_new_user,
            tenant,
            refresh_token: grant.refresh_token,
        })
    }

    /// Reports whether the session cookie belongs to a logged-in user.
    ///
    /// Never fails: any problem reads as "not authenticated". The session
    /// row is left alone either way.
    #[instrument(skip_all)]
    pub async fn check_session(&self, session_id: Option<&SessionId>) -> SessionStatus {
        let Some(session_id) = session_id else {
            return SessionStatus::anonymous();
        };

        match self.authenticated_user(session_id).await {
            Ok(Some(user)) => SessionStatus {
                authenticated: true,
                user: Some(user),
            },
            Ok(None) => SessionStatus::anonymous(),
            Err(report) if matches!(report.current_context(), AuthError::ExpiredToken) => {
                debug!("access token no longer active");
                SessionStatus::anonymous()
            }
            Err(report) => {
                warn!(error = %report, "session check failed");
                SessionStatus::anonymous()
            }
        }
    }

    async fn authenticated_user(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<User>, Report<AuthError>> {
        let Some(session) = self.live_session(session_id).await? else {
            return Ok(None);
        };
        let (Some(user_id), Some(access_token), Some(tenant)) = (
            session.user_id,
            session.access_token.as_deref(),
            session.tenant_name.as_deref(),
        ) else {
            return Ok(None);
        };

        if !self.verifier.verify(access_token, tenant).await? {
            return Err(AuthError::ExpiredToken.into());
        }
        self.store.find_user(user_id).await
    }

    async fn live_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Session>, Report<AuthError>> {
        Ok(self
            .store
            .find_session(session_id)
            .await?
            .filter(|s| !s.is_expired()))
    }

    /// Exchanges the refresh token for a new token set.
    ///
    /// The tenant comes from the session row, falling back to the
    /// `account_info` cookie.
    #[instrument(skip_all)]
    pub async fn refresh_session(
        &self,
        refresh_token: Option<&str>,
        session_id: Option<&SessionId>,
        account_info: Option<&str>,
    ) -> Result<RefreshOutcome, Report<AuthError>> {
        let not_found = |id: Option<&SessionId>| AuthError::SessionNotFound {
            session_id: id.map(ToString::to_string).unwrap_or_default(),
        };

        let session_id = session_id.ok_or_else(|| not_found(None))?;
        let session = self
            .live_session(session_id)
            .await?
            .ok_or_else(|| not_found(Some(session_id)))?;
        let old_refresh = refresh_token
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| session.refresh_token.clone())
            .ok_or_else(|| not_found(Some(session_id)))?;
        let tenant = session
            .tenant_name
            .clone()
            .or_else(|| account_info.filter(|t| !t.is_empty()).map(str::to_string))
            .ok_or_else(|| AuthError::configuration("no tenant recorded for session"))?;

        let client = self.resolver.resolve(&tenant).await?;
        let response = self
            .resolver
            .provider()
            .refresh(&client, &old_refresh)
            .await?;

        let rotated = response.refresh_token.is_some();
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or(old_refresh);
        let expires_at = response
            .expires_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        let reconciled = self
            .reconciler
            .reconcile(ReconcileRequest {
                identity: None,
                tokens: Some(SessionTokens {
                    access_token: response.access_token,
                    refresh_token: Some(refresh_token.clone()),
                    expires_at,
                }),
                session_id,
                tenant: Some(&tenant),
                previous_session_id: None,
                context: ClientContext::default(),
            })
            .await?;

        info!(%tenant, rotated, "session refreshed");
        Ok(RefreshOutcome {
            refresh_token,
            expires_in: response.expires_in,
            session: reconciled.session,
        })
    }

    /// Deletes the session and returns where to send the browser.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        session_id: Option<&SessionId>,
        account_info: Option<&str>,
    ) -> Result<Url, Report<AuthError>> {
        let mut tenant = account_info.filter(|t| !t.is_empty()).map(str::to_string);

        if let Some(session_id) = session_id {
            if let Some(session) = self.store.find_session(session_id).await? {
                tenant = session.tenant_name.or(tenant);
            }
            self.store.delete_session(session_id).await?;
        }

        let fallback = self.policy.post_logout_redirect.clone();
        let Some(tenant) = tenant else {
            return Ok(fallback);
        };

        match self.resolver.resolve(&tenant).await {
            Ok(client) => {
                info!(%tenant, "logged out");
                Ok(self
                    .resolver
                    .provider()
                    .end_session_url(&client, &self.policy.post_logout_redirect)
                    .unwrap_or(fallback))
            }
            Err(report) => {
                warn!(%tenant, error = %report, "could not resolve tenant for logout");
                Ok(fallback)
            }
        }
    }
}
