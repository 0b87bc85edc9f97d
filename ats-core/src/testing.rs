//! In-process backend double for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;

use crate::backend::AuthBackend;
use crate::error::ApiError;
use crate::protocol::{
    AuthResponse, LoginCredentials, MessageResponse, Organization, RegisterData, TokenPair, User,
};
use crate::token::{now_secs, Claims, Role};

pub fn claims_expiring_in(seconds: i64) -> Claims {
    let now = now_secs();
    Claims {
        user_id: "u1".to_string(),
        email: "a@b.com".to_string(),
        role: Role::Recruiter,
        organization_id: "o1".to_string(),
        iat: now,
        exp: now + seconds,
    }
}

pub fn mint(claims: &Claims) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(b"unit-test-secret"))
        .expect("fixture token")
}

pub fn token_expiring_in(seconds: i64) -> String {
    mint(&claims_expiring_in(seconds))
}

pub fn organization() -> Organization {
    Organization {
        id: "o1".to_string(),
        name: "Acme".to_string(),
        slug: "acme".to_string(),
    }
}

pub fn user() -> User {
    User {
        id: "u1".to_string(),
        email: "a@b.com".to_string(),
        name: "Ada".to_string(),
        role: Role::Recruiter,
        organization_id: "o1".to_string(),
        last_login: None,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

/// Rotates refresh tokens `R0 -> R1 -> R2 ...` and records what it was sent
#[derive(Default)]
pub struct FakeBackend {
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    login_calls: AtomicUsize,
    presented: Mutex<Vec<String>>,
    revoked: Mutex<Vec<String>>,
    refresh_delay: Duration,
    fail_refresh: AtomicBool,
    fail_logout: bool,
    reject_login: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn failing_refresh(self) -> Self {
        self.fail_refresh.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn presented_refresh_tokens(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    /// Refresh tokens sent to logout, in call order
    pub fn revoked_refresh_tokens(&self) -> Vec<String> {
        self.revoked.lock().clone()
    }

    fn auth_response(&self) -> AuthResponse {
        AuthResponse {
            user: user(),
            organization: organization(),
            access_token: token_expiring_in(900),
            refresh_token: "R-login".to_string(),
        }
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn login(&self, _credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_login {
            return Err(ApiError::Unauthorized {
                message: "Invalid email or password".to_string(),
            });
        }
        Ok(self.auth_response())
    }

    async fn register(&self, _data: &RegisterData) -> Result<AuthResponse, ApiError> {
        Ok(self.auth_response())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.presented.lock().push(refresh_token.to_string());

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }

        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized {
                message: "Invalid refresh token".to_string(),
            });
        }

        Ok(TokenPair {
            access_token: token_expiring_in(900),
            refresh_token: format!("R{}", n),
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<MessageResponse, ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.revoked.lock().push(refresh_token.to_string());
        if self.fail_logout {
            return Err(ApiError::Api {
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(MessageResponse {
            message: "Logged out".to_string(),
        })
    }
}
