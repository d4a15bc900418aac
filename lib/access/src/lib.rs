//! Multi-tenant OIDC login and session lifecycle for tenant-gate.
//!
//! This crate provides:
//! - Per-tenant client resolution with cached tenant config and discovery
//!   ([`ClientResolver`], [`TenantSource`])
//! - The signed, session-bound OAuth `state` ([`StateCodec`])
//! - The login, session check, refresh and logout flow ([`LoginFlow`])
//! - Reconciliation of logins into users, sessions and settings
//!   ([`Reconciler`], [`AccountStore`])
//!
//! Network access sits behind the [`IdentityProvider`], [`TenantSource`] and
//! [`TokenVerifier`] traits; the server crate implements them over HTTP.

pub mod allow_list;
pub mod cache;
pub mod claims;
pub mod error;
pub mod flow;
pub mod provider;
pub mod reconcile;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod state;
pub mod store;
pub mod tenant;
pub mod user;
pub mod verify;

#[cfg(test)]
mod fakes;

pub use allow_list::AllowList;
pub use cache::KeyedCache;
pub use claims::{Identity, PrivilegePolicy, Privileges, map_user_info};
pub use error::AuthError;
pub use flow::{
    CallbackParams, FlowPolicy, LoginFlow, LoginOutcome, LoginRedirect, RefreshOutcome,
    SessionStatus,
};
pub use provider::{ClientDescriptor, IdentityProvider, IssuerMetadata, TokenGrant, TokenResponse};
pub use reconcile::{ClientContext, ReconcileRequest, Reconciled, Reconciler, SessionTokens};
pub use resolver::ClientResolver;
pub use session::{Session, SessionId, SessionUpdate};
pub use settings::Settings;
pub use state::{StateCodec, VerifiedState};
pub use store::{AccountStore, MemoryStore, UpsertedUser};
pub use tenant::{StaticTenantSource, TenantClientConfig, TenantSource, parse_tenant_document};
pub use user::{User, UserUpsert};
pub use verify::TokenVerifier;
