//! JWT payload decoding for session restoration
//!
//! The client never verifies signatures: the backend is authoritative.
//! Decoded claims are used for display and for deciding *when* to refresh,
//! never for deciding what the user is allowed to do.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Refresh before a request when less than this many seconds remain.
pub const DEFAULT_REFRESH_THRESHOLD: i64 = 120;

/// Background refresh after fast-path restoration when less than this remains.
pub const BACKGROUND_REFRESH_THRESHOLD: i64 = 300;

/// base64url, padding optional
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    ExpiredToken,
}

/// Role carried in the access token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Recruiter,
}

/// Access token claims as issued by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub organization_id: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    /// True when fewer than `threshold` seconds remain before `exp`.
    pub fn expires_within(&self, threshold: i64, now: i64) -> bool {
        self.exp - now < threshold
    }

    /// Seconds left before expiry, negative once expired.
    pub fn remaining(&self, now: i64) -> i64 {
        self.exp - now
    }
}

/// Current time as epoch seconds
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::InvalidToken(
            "expected three dot-separated segments".to_string(),
        ));
    };

    if payload.is_empty() {
        return Err(TokenError::InvalidToken("empty payload segment".to_string()));
    }

    let bytes = PAYLOAD_ENGINE
        .decode(payload)
        .map_err(|e| TokenError::InvalidToken(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::InvalidToken(format!("payload is not valid claims JSON: {}", e)))
}

/// Decode and reject tokens that are already expired.
pub fn decode_unexpired(token: &str, now: i64) -> Result<Claims, TokenError> {
    let claims = decode(token)?;
    if claims.is_expired_at(now) {
        return Err(TokenError::ExpiredToken);
    }
    Ok(claims)
}

/// Unreadable tokens count as expired.
pub fn is_expired(token: &str, now: i64) -> bool {
    match decode(token) {
        Ok(claims) => claims.is_expired_at(now),
        Err(_) => true,
    }
}

/// Unreadable tokens are not considered close to expiry; they are sent as-is
/// and the 401 path deals with them.
pub fn is_close_to_expiry(token: &str, threshold: i64, now: i64) -> bool {
    match decode(token) {
        Ok(claims) => claims.expires_within(threshold, now),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const NOW: i64 = 1_760_000_000;

    fn claims(exp: i64) -> Claims {
        Claims {
            user_id: "u-42".to_string(),
            email: "a@b.com".to_string(),
            role: Role::Recruiter,
            organization_id: "org-7".to_string(),
            iat: exp - 900,
            exp,
        }
    }

    fn mint(claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(b"fixture-secret")).unwrap()
    }

    fn forge(payload: &str) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn test_decode_signed_token() {
        let original = claims(NOW + 600);
        let decoded = decode(&mint(&original)).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.organization_id, "org-7");
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        use base64::engine::general_purpose::URL_SAFE;
        let json = serde_json::to_string(&claims(NOW)).unwrap();
        let token = format!("h.{}.s", URL_SAFE.encode(json));
        assert_eq!(decode(&token).unwrap().exp, NOW);
    }

    #[test]
    fn test_decode_url_safe_alphabet() {
        // runs of '>' and '?' push the encoded payload into the '-'/'_' range
        let mut c = claims(NOW);
        c.email = "a>>>?@b.com".to_string();
        let token = mint(&c);
        assert_eq!(decode(&token).unwrap().email, "a>>>?@b.com");
    }

    #[test]
    fn test_expiry_boundary() {
        assert!(!is_expired(&mint(&claims(NOW + 1)), NOW));
        assert!(is_expired(&mint(&claims(NOW)), NOW));
        assert!(is_expired(&mint(&claims(NOW - 1)), NOW));
    }

    #[test]
    fn test_malformed_tokens() {
        let cases = [
            "".to_string(),
            "not-a-jwt".to_string(),
            "a.b".to_string(),
            "a.b.c.d".to_string(),
            "h..s".to_string(),
            "h.@@@.s".to_string(),
            forge("not json"),
            forge(r#"{"userId":"u"}"#),
        ];

        for token in &cases {
            assert!(
                matches!(decode(token), Err(TokenError::InvalidToken(_))),
                "expected InvalidToken for {:?}",
                token
            );
            assert!(is_expired(token, NOW), "malformed token must count as expired");
            assert!(!is_close_to_expiry(token, DEFAULT_REFRESH_THRESHOLD, NOW));
        }
    }

    #[test]
    fn test_close_to_expiry() {
        let token = mint(&claims(NOW + 30));
        assert!(is_close_to_expiry(&token, DEFAULT_REFRESH_THRESHOLD, NOW));
        assert!(!is_close_to_expiry(&token, 30, NOW));

        let fresh = mint(&claims(NOW + 3600));
        assert!(!is_close_to_expiry(&fresh, DEFAULT_REFRESH_THRESHOLD, NOW));
        assert!(!is_close_to_expiry(&fresh, BACKGROUND_REFRESH_THRESHOLD, NOW));
    }

    #[test]
    fn test_decode_unexpired() {
        assert!(decode_unexpired(&mint(&claims(NOW + 10)), NOW).is_ok());
        assert_eq!(
            decode_unexpired(&mint(&claims(NOW - 10)), NOW),
            Err(TokenError::ExpiredToken)
        );
    }

    #[test]
    fn test_role_wire_format() {
        let json = serde_json::to_string(&claims(NOW)).unwrap();
        assert!(json.contains(r#""role":"RECRUITER""#));
        assert!(json.contains(r#""organizationId":"org-7""#));
    }
}
