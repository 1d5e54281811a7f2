//! Unverified credential decoding
//!
//! Credentials are three-segment tokens (`header.claims.signature`). The
//! client never verifies the signature; it only reads the claim set to decide
//! locally whether a renewal is due and which role to display. Anything that
//! cannot be decoded is reported as expired.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// url-safe alphabet, accepting both padded and unpadded input
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InspectError {
    #[error("token has no claims segment")]
    MissingSegment,

    #[error("claims segment is not base64: {0}")]
    Base64(String),

    #[error("claims segment is not a JSON object: {0}")]
    Json(String),

    #[error("claims have no numeric exp")]
    MissingExpiry,
}

/// Decoded (unverified) claim set
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Expiry, seconds since the epoch
    pub exp: f64,
    /// Role granted, for display only
    pub role: Option<String>,
    /// User identifier (`sub`, `user_id` or `id`, first present wins)
    pub user_id: Option<String>,
    /// Every claim as sent
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Expiry as a `SystemTime`; `None` when `exp` lies beyond what the
    /// platform clock can represent
    pub fn expires_at(&self) -> Option<SystemTime> {
        let since_epoch = Duration::try_from_secs_f64(self.exp.max(0.0)).ok()?;
        UNIX_EPOCH.checked_add(since_epoch)
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        now_secs >= self.exp
    }
}

/// Decode the claims segment of `token` without verifying it.
pub fn decode_claims(token: &str) -> Result<Claims, InspectError> {
    let segment = token
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or(InspectError::MissingSegment)?;

    let bytes = URL_SAFE_LENIENT
        .decode(segment)
        .map_err(|e| InspectError::Base64(e.to_string()))?;

    let extra: Map<String, Value> =
        serde_json::from_slice(&bytes).map_err(|e| InspectError::Json(e.to_string()))?;

    let exp = extra
        .get("exp")
        .and_then(Value::as_f64)
        .filter(|exp| exp.is_finite())
        .ok_or(InspectError::MissingExpiry)?;

    let role = extra.get("role").and_then(Value::as_str).map(str::to_string);

    let user_id = ["sub", "user_id", "id"]
        .iter()
        .filter_map(|key| extra.get(*key))
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    Ok(Claims {
        exp,
        role,
        user_id,
        extra,
    })
}

/// Whether `token` is expired right now. Undecodable tokens are expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, SystemTime::now())
}

/// Whether `token` is expired at `now`. Undecodable tokens are expired.
pub fn is_expired_at(token: &str, now: SystemTime) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.is_expired_at(now),
        Err(_) => true,
    }
}

/// An opaque bearer credential
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn into_inner(self) -> String {
        self.token
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn claims(&self) -> Result<Claims, InspectError> {
        decode_claims(&self.token)
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.claims().ok().and_then(|c| c.expires_at())
    }

    pub fn is_expired(&self) -> bool {
        is_expired(&self.token)
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        is_expired_at(&self.token, now)
    }

    /// Identity granted by this credential, if its claims decode.
    pub fn session(&self) -> Option<Session> {
        let claims = self.claims().ok()?;
        Some(Session {
            user_id: claims.user_id.clone(),
            role: claims.role.clone(),
            expires_at: claims.expires_at(),
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Identity derived from the stored credential. Display only; the server
/// enforces authorization on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Option<String>,
    pub role: Option<String>,
    /// `None` when the expiry is too far out to represent
    pub expires_at: Option<SystemTime>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}
