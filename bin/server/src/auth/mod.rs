//! HTTP side of authentication.
//!
//! The login flow itself lives in `tenant-gate-access`; this module supplies
//! the collaborators it needs (the OIDC provider, the tenant directory, token
//! verifiers and the Postgres account store) and exposes the flow as axum
//! handlers that speak cookies.

pub mod cookies;
pub mod db;
pub mod directory;
pub mod oidc;
pub mod routes;
pub mod verifier;

pub use cookies::CookiePolicy;
pub use routes::{callback, login, logout, refresh, session};

use tenant_gate_access::LoginFlow;

/// Shared application state.
pub struct AppState {
    /// The login flow and everything it orchestrates.
    pub flow: LoginFlow,
    /// Names and flags for the auth cookies.
    pub cookies: CookiePolicy,
}

impl AppState {
    pub fn new(flow: LoginFlow, cookies: CookiePolicy) -> Self {
        Self { flow, cookies }
    }
}
