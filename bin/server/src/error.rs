//! Error types at the edges of the server: startup and HTTP responses.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::prelude::Report;
use serde_json::json;
use tenant_gate_access::AuthError;

/// Failures that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded or failed validation.
    Config { details: String },
    /// The HTTP client for outbound calls could not be built.
    HttpClient { details: String },
    /// Connecting to or migrating the database failed.
    Database { details: String },
    /// The listener could not be bound or the server loop failed.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::HttpClient { details } => {
                write!(f, "failed to build HTTP client: {details}")
            }
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// An access-library failure on its way to the browser.
///
/// Only the status and a fixed message leave the server; the full report is
/// logged here.
#[derive(Debug)]
pub struct ApiError(pub Report<AuthError>);

impl From<Report<AuthError>> for ApiError {
    fn from(report: Report<AuthError>) -> Self {
        Self(report)
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self(error.into())
    }
}

impl ApiError {
    /// Status code and user-safe message for the underlying error.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self.0.current_context() {
            AuthError::Csrf { .. } => (StatusCode::BAD_REQUEST, "Invalid login state"),
            AuthError::Configuration { .. } => {
                (StatusCode::BAD_REQUEST, "Unknown or misconfigured tenant")
            }
            AuthError::AccessDenied { .. } => (
                StatusCode::FORBIDDEN,
                "Access denied - you are not authorized to use this platform",
            ),
            AuthError::ClaimMapping { .. } => {
                (StatusCode::FORBIDDEN, "Identity lacks required claims")
            }
            AuthError::SessionNotFound { .. } | AuthError::ExpiredToken => {
                (StatusCode::UNAUTHORIZED, "Not authenticated")
            }
            AuthError::Upstream { .. }
            | AuthError::Schema { .. }
            | AuthError::TokenExchange { .. } => {
                (StatusCode::BAD_GATEWAY, "Identity provider request failed")
            }
            AuthError::Store { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, %status, "request failed");
        } else {
            tracing::info!(error = %self.0, %status, "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
