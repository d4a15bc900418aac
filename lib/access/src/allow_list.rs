//! Email allow-list applied before any user record is written.

use rootcause::prelude::Report;

use crate::claims::Identity;
use crate::error::AuthError;

/// Exact addresses and `.`-prefixed domains allowed to log in.
///
/// With both lists empty everyone is allowed. Matching is exact and
/// case-sensitive. Domain entries are compared literally against
/// `"." + domain`, so `.example.com` admits `a@example.com` but not
/// `a@sales.example.com`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    emails: Vec<String>,
    domains: Vec<String>,
}

impl AllowList {
    /// Builds an allow-list, rejecting domain entries without a leading `.`.
    pub fn new(emails: Vec<String>, domains: Vec<String>) -> Result<Self, Report<AuthError>> {
        if let Some(bad) = domains.iter().find(|d| !d.starts_with('.') || d.len() < 2) {
            return Err(AuthError::configuration(format!(
                "allowed domain '{bad}' must start with '.'"
            ))
            .into());
        }
        Ok(Self {
            emails,
            domains,
        })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.emails.is_empty() && self.domains.is_empty()
    }

    /// Checks an identity against the lists.
    pub fn check(&self, identity: &Identity) -> Result<(), Report<AuthError>> {
        if self.is_open() {
            return Ok(());
        }

        let Some(email) = identity.email.as_deref() else {
            return Err(AuthError::access_denied("no email address").into());
        };
        if identity.email_verified == Some(false) {
            return Err(AuthError::access_denied("email address is not verified").into());
        }

        if self.emails.iter().any(|allowed| allowed == email) {
            return Ok(());
        }

        let domain = email
            .rsplit_once('@')
            .map(|(_, domain)| format!(".{domain}"));
        if domain.is_some_and(|d| self.domains.contains(&d)) {
            return Ok(());
        }

        tracing::info!(subject = %identity.subject, "login rejected by allow-list");
        Err(AuthError::access_denied("email address is not on the allow-list").into())
    }
}
