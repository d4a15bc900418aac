//! Error types for the access crate.
//!
//! Every fallible operation returns a `rootcause::Report<AuthError>`. The
//! variant tells the HTTP layer how to answer; nothing below the routes formats
//! user-facing messages.

use std::fmt;

/// Errors from the login, refresh, and session paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or invalid tenant or deployment configuration.
    Configuration { reason: String },
    /// The tenant directory or identity provider failed or timed out.
    Upstream { service: String, reason: String },
    /// An upstream payload did not match its schema contract.
    Schema { payload: String, reason: String },
    /// The signed state was missing, invalid, or expired.
    Csrf { reason: String },
    /// The provider returned an incomplete or inconsistent token set.
    TokenExchange { reason: String },
    /// Required identity claims were absent.
    ClaimMapping { reason: String },
    /// The allow-list rejected the user.
    AccessDenied { reason: String },
    /// A refresh was attempted without a matching session.
    SessionNotFound { session_id: String },
    /// The verifier no longer accepts the session's access token.
    ExpiredToken,
    /// The account store failed.
    Store { reason: String },
}

impl AuthError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(payload: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            payload: payload.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn csrf(reason: impl Into<String>) -> Self {
        Self::Csrf {
            reason: reason.into(),
        }
    }

    pub(crate) fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Wraps a store failure.
    pub fn store(reason: impl fmt::Display) -> Self {
        Self::Store {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => {
                write!(f, "configuration error: {reason}")
            }
            Self::Upstream { service, reason } => {
                write!(f, "{service} request failed: {reason}")
            }
            Self::Schema { payload, reason } => {
                write!(f, "malformed {payload}: {reason}")
            }
            Self::Csrf { reason } => write!(f, "CSRF check failed: {reason}"),
            Self::TokenExchange { reason } => {
                write!(f, "token exchange failed: {reason}")
            }
            Self::ClaimMapping { reason } => {
                write!(f, "identity claims unusable: {reason}")
            }
            Self::AccessDenied { reason } => write!(f, "user not allowed: {reason}"),
            Self::SessionNotFound { session_id } => {
                write!(f, "no session found for '{session_id}'")
            }
            Self::ExpiredToken => write!(f, "access token has expired"),
            Self::Store { reason } => write!(f, "account store error: {reason}"),
        }
    }
}

impl std::error::Error for AuthError {}
