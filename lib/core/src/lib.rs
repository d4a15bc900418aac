//! Shared identifier types for tenant-gate.

pub mod id;

pub use id::{ParseIdError, SettingsId, UserId};
