//! Refresh coalescing
//!
//! Refresh tokens are rotated on every use, so two refresh calls racing with
//! the same token invalidate each other and log the user out. The
//! coordinator keeps at most one refresh in flight; everyone who asks while
//! it runs awaits the same shared future and sees the same outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::backend::AuthBackend;
use crate::error::RefreshError;
use crate::protocol::TokenPair;
use crate::store::TokenStore;

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, RefreshError>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

pub struct RefreshCoordinator {
    backend: Arc<dyn AuthBackend>,
    store: TokenStore,
    timeout: Option<Duration>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(backend: Arc<dyn AuthBackend>, store: TokenStore, timeout: Option<Duration>) -> Self {
        Self {
            backend,
            store,
            timeout,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Refresh the stored pair, or join the refresh already running.
    pub async fn refresh(&self) -> Result<TokenPair, RefreshError> {
        let future = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.start(id);
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    /// The refresh runs on its own task so that waiters going away does not
    /// abandon a rotation halfway.
    fn start(&self, id: u64) -> RefreshFuture {
        let backend = Arc::clone(&self.backend);
        let store = self.store.clone();
        let timeout = self.timeout;
        let slot = Arc::clone(&self.in_flight);

        tracing::debug!(refresh_id = id, "Starting token refresh");

        let task = tokio::spawn(async move {
            let result = run_refresh(backend.as_ref(), &store, timeout).await;
            {
                let mut current = slot.lock();
                if current.as_ref().is_some_and(|f| f.id == id) {
                    *current = None;
                }
            }
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshError::Failed(format!("refresh task failed: {}", e))))
        }
        .boxed()
        .shared()
    }
}

async fn run_refresh(
    backend: &dyn AuthBackend,
    store: &TokenStore,
    timeout: Option<Duration>,
) -> Result<TokenPair, RefreshError> {
    let Some(refresh_token) = store.refresh_token() else {
        return Err(RefreshError::NoRefreshToken);
    };

    let call = backend.refresh(&refresh_token);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome.map_err(|e| RefreshError::Failed(e.to_string())),
            Err(_) => Err(RefreshError::TimedOut(limit)),
        },
        None => call.await.map_err(|e| RefreshError::Failed(e.to_string())),
    };

    // Logout or a new login may have replaced the pair while the call was out.
    // Only the session that presented the token gets to rotate or clear it.
    match outcome {
        Ok(pair) => {
            if store.rotate_pair(&refresh_token, &pair.access_token, &pair.refresh_token) {
                tracing::info!("Access token refreshed");
                return Ok(pair);
            }
            tracing::info!("Session changed during refresh, discarding rotated pair");
            // the rotated token is live on the backend until revoked
            if let Err(e) = backend.logout(&pair.refresh_token).await {
                tracing::debug!(error = %e, "Failed to revoke discarded refresh token");
            }
            current_pair(store)
        }
        Err(e) => {
            if store.clear_if_current(&refresh_token) {
                tracing::warn!(error = %e, "Token refresh failed, credentials cleared");
                return Err(e);
            }
            tracing::debug!(error = %e, "Token refresh failed for a session that already ended");
            current_pair(store)
        }
    }
}

/// Whatever pair replaced the one this refresh started from
fn current_pair(store: &TokenStore) -> Result<TokenPair, RefreshError> {
    match (store.access_token(), store.refresh_token()) {
        (Some(access_token), Some(refresh_token)) => Ok(TokenPair {
            access_token,
            refresh_token,
        }),
        _ => Err(RefreshError::Superseded),
    }
}
