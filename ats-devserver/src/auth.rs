//! Credentials issued by the dev server
//!
//! - Access token: HS256 JWT carrying the claims the client decodes
//! - Refresh token: opaque random string, tracked server-side and rotated on
//!   every use
//!
//! Passwords are stored as Argon2 PHC strings.

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use ats_core::protocol::User;
use ats_core::token::{Claims, now_secs};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token encoding failed: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing failed: {0}")]
    HashError(String),
}

/// Signs and verifies access tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: u64,
    refresh_token_ttl: u64,
}

impl TokenIssuer {
    /// # Arguments
    /// * `secret` - HMAC secret for signing tokens (should be >= 32 bytes)
    /// * `access_token_ttl` - Access token lifetime in seconds
    /// * `refresh_token_ttl` - Refresh token lifetime in seconds
    pub fn new(secret: &[u8], access_token_ttl: u64, refresh_token_ttl: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_ttl,
            refresh_token_ttl,
        }
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = Claims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            organization_id: user.organization_id.clone(),
            iat: now,
            exp: now + self.access_token_ttl as i64,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Signature and expiry checked, no leeway
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }

    /// Unix timestamp a refresh token issued now stops working
    pub fn refresh_expiry(&self) -> i64 {
        now_secs() + self.refresh_token_ttl as i64
    }
}

/// Generate a secure random secret for JWT signing
pub fn generate_secret() -> [u8; 32] {
    rand::random()
}

pub fn generate_refresh_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::HashError(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::HashError(e.to_string()))?;
    Ok(phc.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
