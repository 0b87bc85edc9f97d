//! Authorized request path
//!
//! Every resource call in the application goes through
//! [`RequestGateway::authenticated_request`]:
//! - Proactive refresh when the access token is about to expire
//! - One reactive refresh and one retry on 401
//! - A refresh failure on the 401 path ends the session

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ApiError, RefreshError};
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;
use crate::token::{self, DEFAULT_REFRESH_THRESHOLD};
use crate::transport::{read_response, HttpTransport, RequestOptions};

/// Signals from the request path to whoever renders the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials are gone; send the user to the login entry point
    LoginRequired { redirect_to: String },
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Seconds of remaining validity below which a request refreshes first
    pub refresh_threshold: i64,
    /// Where terminal failures send the user
    pub login_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            login_path: crate::DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

pub struct RequestGateway {
    transport: HttpTransport,
    store: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    settings: GatewaySettings,
    events: broadcast::Sender<SessionEvent>,
}

impl RequestGateway {
    pub fn new(
        transport: HttpTransport,
        store: TokenStore,
        coordinator: Arc<RefreshCoordinator>,
        settings: GatewaySettings,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            transport,
            store,
            coordinator,
            settings,
            events,
        }
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Request without credentials (login, register)
    pub async fn public_request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.transport.public_request(path, &options).await
    }

    /// Request with the stored access token, refreshing as needed.
    pub async fn authenticated_request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let mut access_token = self.store.access_token();

        if let Some(current) = access_token.as_deref() {
            if token::is_close_to_expiry(current, self.settings.refresh_threshold, token::now_secs()) {
                tracing::debug!(path, "Access token close to expiry, refreshing before request");
                match self.coordinator.refresh().await {
                    Ok(pair) => access_token = Some(pair.access_token),
                    // the 401 path below picks this up
                    Err(e) => tracing::warn!(error = %e, "Proactive token refresh failed"),
                }
            }
        }

        let response = self
            .transport
            .send(path, &options, access_token.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return read_response(response).await;
        }

        tracing::debug!(path, "Request unauthorized, refreshing and retrying once");
        let pair = match self.coordinator.refresh().await {
            Ok(pair) => pair,
            // logged out meanwhile, nothing left to end
            Err(RefreshError::Superseded) => return Err(RefreshError::Superseded.into()),
            Err(e) => {
                self.end_session();
                return Err(e.into());
            }
        };

        let retry = self
            .transport
            .send(path, &options, Some(&pair.access_token))
            .await?;
        read_response(retry).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.authenticated_request(path, RequestOptions::get()).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.authenticated_request(path, RequestOptions::post(body)?).await
    }

    pub async fn put_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.authenticated_request(path, RequestOptions::put(body)?).await
    }

    pub async fn patch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.authenticated_request(path, RequestOptions::patch(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.authenticated_request(path, RequestOptions::delete()).await
    }

    /// Terminal failure: drop everything and ask for a fresh login.
    fn end_session(&self) {
        self.store.clear_all();
        tracing::warn!(redirect_to = %self.settings.login_path, "Session ended, login required");
        // no subscribers is fine
        let _ = self.events.send(SessionEvent::LoginRequired {
            redirect_to: self.settings.login_path.clone(),
        });
    }
}
