//! Credential claim decoding
//!
//! Reads the payload segment of a compact three-part token. Signatures are
//! not verified: the claims are only used for diagnostics and for deciding
//! whether a locally stored credential still describes a live session.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::constants::ACCESS_TOKEN_KIND;

/// Why a credential could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("credential is not a three-segment token")]
    Malformed,

    #[error("credential payload is not base64url: {0}")]
    Base64(String),

    #[error("credential payload is not a JSON claim set: {0}")]
    Json(String),
}

/// Decoded view of a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: Option<String>,
    pub role: Option<String>,
    pub token_kind: Option<String>,
    /// Unix seconds
    pub expires_at: Option<u64>,
    pub username: Option<String>,
    pub must_change_password: bool,
}

impl Claims {
    /// False only when a token kind is present and differs from "access".
    pub fn is_access_kind(&self) -> bool {
        self.token_kind
            .as_deref()
            .is_none_or(|kind| kind == ACCESS_TOKEN_KIND)
    }

    /// `None` when there is no expiry or it lies beyond what `SystemTime` can hold.
    pub fn expires_at_time(&self) -> Option<SystemTime> {
        self.expires_at
            .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)))
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    must_change_password: Option<bool>,
}

fn id_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode the claims of a compact token.
pub fn decode(credential: &str) -> Result<Claims, DecodeError> {
    let mut segments = credential.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(DecodeError::Malformed);
    };
    if payload.is_empty() {
        return Err(DecodeError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    let raw: RawClaims =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    Ok(Claims {
        subject_id: raw.user_id.or(raw.sub).and_then(id_string),
        role: raw.role,
        token_kind: raw.token_type,
        expires_at: raw.exp,
        username: raw.username,
        must_change_password: raw.must_change_password.unwrap_or(false),
    })
}

/// Whether the claims' expiry is at or before `now`.
///
/// No expiry, or one too far out to represent, never expires.
pub fn is_expired(claims: &Claims, now: SystemTime) -> bool {
    match claims.expires_at_time() {
        Some(expires) => expires <= now,
        None => false,
    }
}

/// Pre-send diagnostics for an access credential.
///
/// A token-kind mismatch is logged, never rejected.
pub fn inspect_access(credential: &str) -> Option<Claims> {
    match decode(credential) {
        Ok(claims) => {
            if !claims.is_access_kind() {
                warn!(
                    token_kind = claims.token_kind.as_deref().unwrap_or(""),
                    "attached credential is not an access token"
                );
            }
            Some(claims)
        }
        Err(e) => {
            debug!(error = %e, "could not decode access credential before request");
            None
        }
    }
}
