//! Signed OAuth `state` parameter.
//!
//! The state survives the redirect to the identity provider without any
//! server-side record. It carries the redirect URL, the tenant, the ID token
//! nonce and an expiry, plus an HMAC-SHA256 signature over
//! `JSON(data) + "##" + session_id`, where the session id is the
//! `temp_session_id` cookie value of the browser that started the login. A
//! state minted for one browser session never verifies for another.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use url::Url;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 output length.
const SIGNATURE_LEN: usize = 64;

/// Default lifetime of a minted state, in seconds.
pub const DEFAULT_STATE_TTL_SECS: i64 = 60 * 60;

/// Random bytes in a login nonce.
const NONCE_BYTES: usize = 32;

/// A fresh hex-encoded nonce for one login attempt.
pub fn random_nonce() -> Result<String, Report<AuthError>> {
    let mut bytes = [0u8; NONCE_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|e| AuthError::configuration(format!("no randomness for nonce: {e}")))?;
    Ok(hex::encode(bytes))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateData {
    /// Expiry as milliseconds since the Unix epoch.
    expiration: i64,
    redirect_url: String,
    tenant: String,
    nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedState {
    data: StateData,
    signature: String,
}

/// The trusted contents of a state that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedState {
    pub redirect_url: Url,
    pub tenant: String,
    /// Must match the `nonce` claim of the ID token.
    pub nonce: String,
}

/// Mints and verifies signed state blobs.
#[derive(Clone)]
pub struct StateCodec {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("key", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl StateCodec {
    /// Creates a codec keyed by `secret` with the default one hour lifetime.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key: secret.into(),
            ttl: Duration::seconds(DEFAULT_STATE_TTL_SECS),
        }
    }

    /// Overrides the state lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn mint(
        &self,
        session_id: &str,
        redirect_url: &Url,
        tenant: &str,
        nonce: &str,
    ) -> Result<String, Report<AuthError>> {
        self.mint_at(session_id, redirect_url, tenant, nonce, Utc::now())
    }

    /// Mints a state as if the current time were `now`.
    pub fn mint_at(
        &self,
        session_id: &str,
        redirect_url: &Url,
        tenant: &str,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> Result<String, Report<AuthError>> {
        let data = StateData {
            expiration: (now + self.ttl).timestamp_millis(),
            redirect_url: redirect_url.to_string(),
            tenant: tenant.to_string(),
            nonce: nonce.to_string(),
        };
        let signature = self.sign(&data, session_id)?;

        let json = serde_json::to_vec(&SignedState { data, signature })
            .map_err(|e| AuthError::configuration(format!("failed to encode state: {e}")))?;
        Ok(STANDARD.encode(json))
    }

    /// Verifies `blob` against the browser's session id.
    ///
    /// Returns `None` for anything that is not a well-formed, correctly
    /// signed, unexpired state bound to `session_id`.
    #[must_use]
    pub fn verify(&self, blob: &str, session_id: &str) -> Option<VerifiedState> {
        self.verify_at(blob, session_id, Utc::now())
    }

    /// Verifies `blob` as if the current time were `now`.
    #[must_use]
    pub fn verify_at(
        &self,
        blob: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<VerifiedState> {
        let bytes = STANDARD
            .decode(blob)
            .inspect_err(|e| tracing::debug!(error = %e, "state is not valid base64"))
            .ok()?;
        let state: SignedState = serde_json::from_slice(&bytes)
            .inspect_err(|e| tracing::debug!(error = %e, "state is not valid JSON"))
            .ok()?;

        if state.signature.len() != SIGNATURE_LEN {
            tracing::debug!(len = state.signature.len(), "state signature has wrong length");
            return None;
        }
        let provided = hex::decode(&state.signature)
            .inspect_err(|e| tracing::debug!(error = %e, "state signature is not hex"))
            .ok()?;

        let mac = self.mac(&state.data, session_id).ok()?;
        if mac.verify_slice(&provided).is_err() {
            tracing::debug!("state signature mismatch");
            return None;
        }

        if state.data.expiration <= now.timestamp_millis() {
            tracing::debug!(expiration = state.data.expiration, "state expired");
            return None;
        }

        let redirect_url = Url::parse(&state.data.redirect_url)
            .inspect_err(|e| tracing::debug!(error = %e, "state redirect URL is invalid"))
            .ok()?;

        Some(VerifiedState {
            redirect_url,
            tenant: state.data.tenant,
            nonce: state.data.nonce,
        })
    }

    fn mac(&self, data: &StateData, session_id: &str) -> Result<HmacSha256, AuthError> {
        let json = serde_json::to_string(data)
            .map_err(|e| AuthError::configuration(format!("failed to encode state: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuthError::configuration(format!("invalid state secret: {e}")))?;
        mac.update(json.as_bytes());
        mac.update(b"##");
        mac.update(session_id.as_bytes());
        Ok(mac)
    }

    fn sign(&self, data: &StateData, session_id: &str) -> Result<String, AuthError> {
        let mac = self.mac(data, session_id)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
