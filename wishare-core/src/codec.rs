//! Bearer token decoding
//!
//! Tokens are JWTs issued by the Wishare backend:
//! - Access token: short-lived, attached to every API request
//! - Refresh token: long-lived, exchanged for a new access token
//!
//! Only the payload segment is read. The header and signature are never
//! checked here; the backend verifies them on every request. A token that
//! fails to decode is treated exactly like an expired one by every query in
//! this module.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Claims carried in a token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,
    /// Issued at (Unix timestamp, seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// "access" or "refresh"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Everything else in the payload
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Backend user id, accepting both numeric and string encodings
    pub fn user_id(&self) -> Option<String> {
        match self.extra.get("user_id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => self.sub.clone(),
        }
    }

    /// Expiry as a wall-clock time
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Token is empty")]
    Empty,

    #[error("Token must have three dot-separated segments, found {0}")]
    Segments(usize),

    #[error("Token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token payload is not a claims object: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Decode a token payload without verifying its signature
pub fn decode_claims(token: &str) -> Result<Claims, DecodeError> {
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Segments(segments.len()));
    }

    // Some issuers pad their segments
    let payload = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    Ok(serde_json::from_slice(&payload)?)
}

fn decode_present(token: Option<&str>) -> Option<Claims> {
    let token = token?;
    match decode_claims(token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("Treating undecodable token as expired: {}", e);
            None
        }
    }
}

/// True if the token is absent, malformed, or past its `exp`
pub fn is_expired(token: Option<&str>) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: Option<&str>, now: DateTime<Utc>) -> bool {
    decode_present(token).is_none_or(|claims| claims.exp <= now.timestamp())
}

/// True if the token expires in less than `threshold` (or is unusable)
pub fn expires_within(token: Option<&str>, threshold: Duration) -> bool {
    expires_within_at(token, threshold, Utc::now())
}

pub fn expires_within_at(token: Option<&str>, threshold: Duration, now: DateTime<Utc>) -> bool {
    let threshold = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
    decode_present(token)
        .is_none_or(|claims| claims.exp.saturating_sub(now.timestamp()) < threshold)
}

/// Expiry of the token, `None` when absent or undecodable
pub fn expiration_time(token: Option<&str>) -> Option<DateTime<Utc>> {
    decode_present(token).and_then(|claims| claims.expiration())
}

/// Signed time left before expiry; negative once expired
pub fn time_remaining_at(token: Option<&str>, now: DateTime<Utc>) -> Option<chrono::Duration> {
    expiration_time(token).map(|exp| exp - now)
}
