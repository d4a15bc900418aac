//! tenant-gate HTTP server.
//!
//! Wires the access library to concrete collaborators: an `openidconnect`
//! identity provider, the tenant directory, JWT or introspection token
//! verification, a PostgreSQL account store, and the axum routes that carry
//! the auth cookies.

pub mod auth;
pub mod config;
pub mod error;
