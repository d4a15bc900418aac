//! Authentication routes: login start, callback, session check, refresh and
//! logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tenant_gate_access::{CallbackParams, ClientContext, SessionId, User};
use tracing::info;

use super::AppState;
use super::cookies::{ACCOUNT_INFO_COOKIE, REFRESH_TOKEN_COOKIE, TEMP_SESSION_COOKIE};
use crate::error::ApiError;

/// Query parameters for starting a login.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default, alias = "accountname")]
    tenant: Option<String>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    auth_url: String,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    iss: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl From<CallbackQuery> for CallbackParams {
    fn from(query: CallbackQuery) -> Self {
        Self {
            code: query.code,
            state: query.state,
            iss: query.iss,
            error: query.error,
            error_description: query.error_description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    authenticated: bool,
    user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    success: bool,
    expires_in: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    non_empty(jar.get(name).map(|c| c.value().to_string()))
}

fn session_cookie(state: &AppState, jar: &CookieJar) -> Option<SessionId> {
    cookie_value(jar, state.cookies.session_name()).map(SessionId::new)
}

/// User agent and client address, preferring the proxy's `X-Forwarded-For`.
pub fn client_context(headers: &HeaderMap, peer: SocketAddr) -> ClientContext {
    let header_str = |name| headers.get(name).and_then(|v| v.to_str().ok());
    let forwarded = header_str(header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    ClientContext {
        user_agent: header_str(header::USER_AGENT).map(str::to_string),
        ip: Some(forwarded.map_or_else(|| peer.ip().to_string(), str::to_string)),
    }
}

/// Starts a login and returns the provider URL for the browser.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let Some(tenant) = non_empty(query.tenant) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "tenant is required" })),
        )
            .into_response());
    };

    let redirect = state
        .flow
        .begin_login(&tenant, non_empty(query.session_id).map(SessionId::new))
        .await?;

    let jar = jar.add(state.cookies.temp_session(redirect.temp_session_id.as_str()));
    Ok((
        jar,
        Json(LoginResponse {
            auth_url: redirect.auth_url.to_string(),
        }),
    )
        .into_response())
}

/// Handles the provider's redirect back after the user authenticates.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let temp_session_id = cookie_value(&jar, TEMP_SESSION_COOKIE).map(SessionId::new);
    let previous_session_id = session_cookie(&state, &jar);

    let outcome = state
        .flow
        .complete_login(
            query.into(),
            temp_session_id.as_ref(),
            previous_session_id.as_ref(),
            client_context(&headers, peer),
        )
        .await?;

    let cookies = &state.cookies;
    let jar = jar
        .add(cookies.session(outcome.session.session_id.as_str()))
        .add(cookies.refresh_token(&outcome.refresh_token))
        .add(cookies.account_info(&outcome.tenant))
        .add(cookies.clear(TEMP_SESSION_COOKIE));

    Ok((jar, (StatusCode::FOUND, [(header::LOCATION, "/")])).into_response())
}

/// Reports the logged-in user, or 401.
pub async fn session(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let status = state
        .flow
        .check_session(session_cookie(&state, &jar).as_ref())
        .await;

    match status.user {
        Some(user) if status.authenticated => Json(SessionResponse {
            authenticated: true,
            user,
        })
        .into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Rotates the session's tokens. Any failure ends the session.
pub async fn refresh(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let refresh_token = cookie_value(&jar, REFRESH_TOKEN_COOKIE);
    let session_id = session_cookie(&state, &jar);
    let account_info = cookie_value(&jar, ACCOUNT_INFO_COOKIE);

    let result = state
        .flow
        .refresh_session(
            refresh_token.as_deref(),
            session_id.as_ref(),
            account_info.as_deref(),
        )
        .await;

    let cookies = &state.cookies;
    match result {
        Ok(outcome) => {
            let jar = jar
                .add(cookies.refresh_token(&outcome.refresh_token))
                .add(cookies.session(outcome.session.session_id.as_str()));
            (
                jar,
                Json(RefreshResponse {
                    success: true,
                    expires_in: outcome.expires_in.map(|d| d.as_secs()),
                }),
            )
                .into_response()
        }
        Err(report) => {
            info!(error = %report, "refresh failed, clearing session");
            let jar = jar
                .add(cookies.clear(cookies.session_name()))
                .add(cookies.clear(REFRESH_TOKEN_COOKIE));
            (
                StatusCode::UNAUTHORIZED,
                jar,
                Json(json!({ "error": "Failed to refresh token" })),
            )
                .into_response()
        }
    }
}

/// Ends the session and sends the browser to the provider's logout page.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session_id = session_cookie(&state, &jar);
    let account_info = cookie_value(&jar, ACCOUNT_INFO_COOKIE);

    let target = state
        .flow
        .logout(session_id.as_ref(), account_info.as_deref())
        .await?;

    let cookies = &state.cookies;
    let jar = jar
        .add(cookies.clear(cookies.session_name()))
        .add(cookies.clear(REFRESH_TOKEN_COOKIE))
        .add(cookies.clear(ACCOUNT_INFO_COOKIE))
        .add(cookies.clear(TEMP_SESSION_COOKIE));

    Ok((jar, Redirect::to(target.as_str())).into_response())
}
