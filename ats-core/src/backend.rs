//! Auth endpoints of the backend

use async_trait::async_trait;

use crate::error::ApiError;
use crate::protocol::{
    AuthResponse, LoginCredentials, LogoutRequest, MessageResponse, RefreshRequest, RegisterData,
    TokenPair, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH,
};
use crate::transport::{HttpTransport, RequestOptions};

/// The four auth calls the session layer depends on
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError>;

    async fn register(&self, data: &RegisterData) -> Result<AuthResponse, ApiError>;

    /// Exchange a refresh token for a rotated pair. The presented token is
    /// invalid afterwards.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    async fn logout(&self, refresh_token: &str) -> Result<MessageResponse, ApiError>;
}

/// JSON-over-HTTP implementation
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    transport: HttpTransport,
}

impl HttpAuthBackend {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        self.transport
            .public_request(LOGIN_PATH, &RequestOptions::post(credentials)?)
            .await
    }

    async fn register(&self, data: &RegisterData) -> Result<AuthResponse, ApiError> {
        self.transport
            .public_request(REGISTER_PATH, &RequestOptions::post(data)?)
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.transport
            .public_request(REFRESH_PATH, &RequestOptions::post(&body)?)
            .await
    }

    async fn logout(&self, refresh_token: &str) -> Result<MessageResponse, ApiError> {
        let body = LogoutRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.transport
            .public_request(LOGOUT_PATH, &RequestOptions::post(&body)?)
            .await
    }
}
