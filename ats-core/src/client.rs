//! Wiring for applications
//!
//! Must be constructed inside a Tokio runtime: the session listens for
//! gateway events on a spawned task.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::backend::{AuthBackend, HttpAuthBackend};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::gateway::{GatewaySettings, RequestGateway};
use crate::protocol::{User, ME_PATH};
use crate::refresh::RefreshCoordinator;
use crate::session::SessionManager;
use crate::store::TokenStore;
use crate::transport::HttpTransport;

pub struct AtsClient {
    gateway: Arc<RequestGateway>,
    session: Arc<SessionManager>,
    listener: JoinHandle<()>,
}

impl AtsClient {
    pub fn new(config: &ClientConfig, store: TokenStore) -> Result<Self, ApiError> {
        let transport = HttpTransport::with_timeout(&config.api_base_url, config.request_timeout())?;
        let backend = Arc::new(HttpAuthBackend::new(transport.clone()));
        Ok(Self::with_backend(config, store, transport, backend))
    }

    pub fn with_backend(
        config: &ClientConfig,
        store: TokenStore,
        transport: HttpTransport,
        backend: Arc<dyn AuthBackend>,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&backend),
            store.clone(),
            config.refresh_timeout(),
        ));

        let settings = GatewaySettings {
            refresh_threshold: config.refresh_threshold_secs,
            login_path: config.login_path.clone(),
        };
        let gateway = Arc::new(RequestGateway::new(
            transport,
            store.clone(),
            Arc::clone(&coordinator),
            settings,
        ));

        let session = Arc::new(
            SessionManager::new(backend, coordinator, store)
                .with_background_refresh_threshold(config.background_refresh_threshold_secs),
        );
        let listener = session.spawn_event_listener(gateway.subscribe());

        Self {
            gateway,
            session,
            listener,
        }
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Authorized GET against the API
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.gateway.get_json(path).await
    }

    /// The signed-in user as the backend sees it
    pub async fn me(&self) -> Result<User, ApiError> {
        self.gateway.get_json(ME_PATH).await
    }
}

impl Drop for AtsClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
