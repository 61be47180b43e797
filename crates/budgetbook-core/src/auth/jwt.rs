//! Expiry checks on bearer tokens.
//!
//! Only the payload segment is decoded. Signatures are NOT verified, so
//! nothing here says a token is authentic; it only estimates whether the
//! server will still accept it.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("Token has {0} segments, expected 3")]
    Segments(usize),

    #[error("Token payload is not valid base64: {0}")]
    Base64(String),

    #[error("Token payload is not valid JSON: {0}")]
    Json(String),

    #[error("Token payload has no numeric exp claim")]
    MissingExpiry,
}

/// Decode the payload (middle) segment of a JWT into JSON
pub fn decode_payload(token: &str) -> Result<serde_json::Value, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Segments(segments.len()));
    }

    // base64url -> standard alphabet, re-padded to a multiple of 4
    let mut payload: String = segments[1]
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while payload.len() % 4 != 0 {
        payload.push('=');
    }

    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))
}

/// The `exp` claim in epoch seconds
pub fn expires_at(token: &str) -> Result<i64, DecodeError> {
    let payload = decode_payload(token)?;
    let exp = payload.get("exp").ok_or(DecodeError::MissingExpiry)?;
    exp.as_i64()
        .or_else(|| exp.as_f64().filter(|v| v.is_finite()).map(|v| v.floor() as i64))
        .ok_or(DecodeError::MissingExpiry)
}

/// Whether `token` is expired at `now` (epoch seconds).
/// Anything that cannot be decoded counts as expired.
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match expires_at(token) {
        Ok(exp) => exp <= now,
        Err(_) => true,
    }
}

/// Whether `token` is expired right now
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

/// Whether `token` is expired or will expire within `leeway`
pub fn expires_within(token: &str, leeway: Duration) -> bool {
    let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
    is_expired_at(token, Utc::now().timestamp().saturating_add(leeway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_with_payload(payload: &str) -> String {
        format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    fn token_expiring_in(secs: i64) -> String {
        let exp = Utc::now().timestamp() + secs;
        token_with_payload(&format!(r#"{{"sub":"u-1","exp":{}}}"#, exp))
    }

    #[test]
    fn test_exp_one_is_expired() {
        assert!(is_expired("x.eyJleHAiOjF9.y"));
        assert_eq!(expires_at("x.eyJleHAiOjF9.y"), Ok(1));
    }

    #[test]
    fn test_future_exp_is_not_expired() {
        assert!(!is_expired(&token_expiring_in(3600)));
        assert!(is_expired(&token_expiring_in(-10)));
    }

    #[test]
    fn test_exp_boundary() {
        let token = token_with_payload(r#"{"exp":1000}"#);
        assert!(!is_expired_at(&token, 999));
        assert!(is_expired_at(&token, 1000));
        assert!(is_expired_at(&token, 1001));
    }

    #[test]
    fn test_float_exp_is_accepted() {
        let token = token_with_payload(r#"{"exp":1000.5}"#);
        assert_eq!(expires_at(&token), Ok(1000));
    }

    #[test]
    fn test_url_safe_characters_are_decoded() {
        let payload = r#"{"exp":4102444800,"note":"??>>~~"}"#;
        let token = token_with_payload(payload);
        assert!(token.contains('-') || token.contains('_'));
        assert_eq!(expires_at(&token), Ok(4_102_444_800));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        assert_eq!(expires_at("h.eyJleHAiOjU1fQ==.s"), Ok(55));
        assert_eq!(expires_at("h.eyJleHAiOjU1fQ.s"), Ok(55));
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        assert!(is_expired(""));
        assert!(is_expired("only.two"));
        assert!(is_expired("a.b.c.d"));
        assert!(is_expired("x.!!!not-base64!!!.y"));
        assert!(is_expired(&token_with_payload("not json")));
        assert!(is_expired(&token_with_payload(r#"{"sub":"u-1"}"#)));
        assert!(is_expired(&token_with_payload(r#"{"exp":"tomorrow"}"#)));

        assert_eq!(expires_at("only.two"), Err(DecodeError::Segments(2)));
        assert_eq!(
            expires_at(&token_with_payload(r#"{"sub":"u-1"}"#)),
            Err(DecodeError::MissingExpiry)
        );
    }

    #[test]
    fn test_expires_within_leeway() {
        let token = token_expiring_in(30);
        assert!(!is_expired(&token));
        assert!(expires_within(&token, Duration::from_secs(60)));
        assert!(!expires_within(&token, Duration::from_secs(5)));
    }
}
