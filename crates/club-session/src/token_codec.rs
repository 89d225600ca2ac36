//! Expiry extraction from bearer tokens.
//!
//! Tokens are JWTs. Only the `exp` claim of the payload is read; the
//! signature is never checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

pub struct TokenCodec;

impl TokenCodec {
    /// Expiry of `token`, or `None` when the token is not a JWT or carries
    /// no usable `exp` claim.
    pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
        let mut segments = token.split('.');
        let _header = segments.next()?;
        let payload = segments.next()?;

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: Value = serde_json::from_slice(&bytes).ok()?;

        match claims.get("exp")? {
            Value::Number(exp) => {
                if let Some(secs) = exp.as_i64() {
                    DateTime::from_timestamp(secs, 0)
                } else {
                    let secs = exp.as_f64()?;
                    if !secs.is_finite() {
                        return None;
                    }
                    DateTime::from_timestamp_millis((secs * 1000.0) as i64)
                }
            }
            Value::String(exp) => DateTime::from_timestamp(exp.trim().parse().ok()?, 0),
            _ => None,
        }
    }

    /// Whether a token with expiry `expires_at` must be refreshed at `now`.
    ///
    /// An unknown expiry never needs a refresh. A leeway that pushes the
    /// deadline past the representable range always does.
    pub fn needs_refresh(
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        leeway: Duration,
    ) -> bool {
        match expires_at {
            Some(expires_at) => now
                .checked_add_signed(leeway)
                .map_or(true, |deadline| expires_at <= deadline),
            None => false,
        }
    }
}
