//! Userinfo claim mapping.
//!
//! Turns the provider's userinfo document into an [`Identity`]. The display
//! name comes from the tenant's configured claim; the username comes from
//! `preferred_username`, then `upn`, then the email address.

use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AuthError;

/// Identity asserted by the provider after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The `sub` claim.
    pub subject: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    /// `None` when the provider did not send `email_verified`.
    pub email_verified: Option<bool>,
    pub avatar_url: Option<String>,
    /// Subjects of the organizations the user belongs to.
    pub orgs: Vec<String>,
}

#[derive(Deserialize)]
struct OrgClaim {
    sub: String,
}

#[derive(Deserialize)]
struct UserInfoClaims {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    orgs: Option<Vec<OrgClaim>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Validates userinfo claims and maps them to an [`Identity`].
pub fn map_user_info(claims: &Value, name_claim: &str) -> Result<Identity, Report<AuthError>> {
    let parsed = UserInfoClaims::deserialize(claims)
        .map_err(|e| AuthError::schema("userinfo", e.to_string()))?;

    if parsed.sub.is_empty() {
        return Err(AuthError::schema("userinfo", "sub is empty").into());
    }

    let email = non_empty(parsed.email);
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(AuthError::schema("userinfo", "email is not an address").into());
    }

    let username = non_empty(parsed.preferred_username)
        .or_else(|| non_empty(parsed.upn))
        .or_else(|| email.clone())
        .ok_or_else(|| AuthError::ClaimMapping {
            reason: "provider sent neither preferred_username nor email".to_string(),
        })?;

    let display_name = claims
        .get(name_claim)
        .and_then(Value::as_str)
        .map(str::to_string);
    let display_name = non_empty(display_name).unwrap_or_else(|| username.clone());

    Ok(Identity {
        subject: parsed.sub,
        username,
        display_name,
        email,
        email_verified: parsed.email_verified,
        avatar_url: non_empty(parsed.picture),
        orgs: parsed
            .orgs
            .unwrap_or_default()
            .into_iter()
            .map(|org| org.sub)
            .collect(),
    })
}

/// Organization ids that grant elevated flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegePolicy {
    pub admin_org: Option<String>,
    pub early_access_org: Option<String>,
}

/// Flags stored on the user record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privileges {
    pub is_admin: bool,
    pub is_early_access: bool,
}

impl PrivilegePolicy {
    /// Admin if the username is `{tenant}-admin` or the user belongs to the
    /// admin org. Early access comes only from the early-access org.
    #[must_use]
    pub fn evaluate(&self, identity: &Identity, tenant: &str) -> Privileges {
        let member_of = |org: &Option<String>| {
            org.as_deref()
                .filter(|o| !o.is_empty())
                .is_some_and(|o| identity.orgs.iter().any(|m| m == o))
        };

        let is_admin =
            identity.username == format!("{tenant}-admin") || member_of(&self.admin_org);
        let is_early_access = member_of(&self.early_access_org);

        Privileges {
            is_admin,
            is_early_access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_standard_claims() {
        let claims = json!({
            "sub": "f:1",
            "preferred_username": "jane",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "email_verified": true,
            "picture": "https://example.com/jane.png",
            "orgs": [{ "sub": "org-1", "name": "Org One" }]
        });

        let identity = map_user_info(&claims, "name").unwrap();
        assert_eq!(identity.subject, "f:1");
        assert_eq!(identity.username, "jane");
        assert_eq!(identity.display_name, "Jane Doe");
        assert_eq!(identity.email.as_deref(), Some("jane@example.com"));
        assert_eq!(identity.email_verified, Some(true));
        assert_eq!(identity.orgs, vec!["org-1"]);
    }

    #[test]
    fn upn_stands_in_for_preferred_username() {
        let claims = json!({ "sub": "f:1", "upn": "jane@corp", "name": "Jane" });
        let identity = map_user_info(&claims, "name").unwrap();
        assert_eq!(identity.username, "jane@corp");
    }

    #[test]
    fn email_stands_in_for_username() {
        let claims = json!({ "sub": "f:1", "email": "jane@example.com" });
        let identity = map_user_info(&claims, "name").unwrap();
        assert_eq!(identity.username, "jane@example.com");
        assert_eq!(identity.display_name, "jane@example.com");
    }

    #[test]
    fn configured_name_claim_is_used() {
        let claims = json!({
            "sub": "f:1",
            "preferred_username": "jane",
            "name": "Jane Doe",
            "nickname": "JD"
        });
        let identity = map_user_info(&claims, "nickname").unwrap();
        assert_eq!(identity.display_name, "JD");
    }

    #[test]
    fn neither_username_nor_email_is_claim_mapping_error() {
        let claims = json!({ "sub": "f:1", "name": "Jane" });
        let err = map_user_info(&claims, "name").unwrap_err();
        assert!(matches!(err.current_context(), AuthError::ClaimMapping { .. }));
    }

    #[test]
    fn missing_sub_is_schema_error() {
        let claims = json!({ "preferred_username": "jane" });
        let err = map_user_info(&claims, "name").unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Schema { .. }));
    }

    #[test]
    fn malformed_email_is_schema_error() {
        let claims = json!({ "sub": "f:1", "email": "not-an-address" });
        let err = map_user_info(&claims, "name").unwrap_err();
        assert!(matches!(err.current_context(), AuthError::Schema { .. }));
    }

    fn identity(username: &str, orgs: &[&str]) -> Identity {
        Identity {
            subject: "f:1".to_string(),
            username: username.to_string(),
            display_name: username.to_string(),
            email: None,
            email_verified: None,
            avatar_url: None,
            orgs: orgs.iter().map(|o| (*o).to_string()).collect(),
        }
    }

    #[test]
    fn tenant_admin_username_is_admin() {
        let policy = PrivilegePolicy::default();
        let flags = policy.evaluate(&identity("acme-admin", &[]), "acme");
        assert!(flags.is_admin);
        assert!(!flags.is_early_access);

        let flags = policy.evaluate(&identity("acme-admin", &[]), "globex");
        assert!(!flags.is_admin);
    }

    #[test]
    fn org_membership_grants_flags() {
        let policy = PrivilegePolicy {
            admin_org: Some("org-admin".to_string()),
            early_access_org: Some("org-early".to_string()),
        };

        let flags = policy.evaluate(&identity("jane", &["org-early"]), "acme");
        assert!(!flags.is_admin);
        assert!(flags.is_early_access);

        let flags = policy.evaluate(&identity("jane", &["org-admin"]), "acme");
        assert!(flags.is_admin);
        assert!(!flags.is_early_access);

        let flags = policy.evaluate(&identity("jane", &["org-admin", "org-early"]), "acme");
        assert_eq!(
            flags,
            Privileges {
                is_admin: true,
                is_early_access: true
            }
        );
    }

    #[test]
    fn unconfigured_orgs_grant_nothing() {
        let policy = PrivilegePolicy {
            admin_org: Some(String::new()),
            early_access_org: None,
        };
        let flags = policy.evaluate(&identity("jane", &[""]), "acme");
        assert_eq!(flags, Privileges::default());
    }
}
