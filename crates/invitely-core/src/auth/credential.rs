use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Claims we read from the token payload. Everything else is opaque to us.
#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Short-lived bearer token with its decoded expiry.
///
/// The token is never persisted and never logged: `Debug` redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    /// Wrap a raw bearer token, decoding its `exp` claim if it has one.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry embedded in the token, or `None` if it could not be decoded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Time left before expiry. Negative once expired, `None` if unknown.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|exp| exp - Utc::now())
    }

    pub fn is_expired(&self) -> bool {
        self.time_until_expiry()
            .map(|left| left <= Duration::zero())
            .unwrap_or(true)
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read the `exp` claim from a JWT-shaped token without verifying it.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    // Some issuers pad anyway
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}
