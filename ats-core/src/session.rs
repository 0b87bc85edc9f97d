//! Session lifecycle
//!
//! ```text
//! Uninitialized -> Initializing -> Authenticated
//!                               -> Unauthenticated
//! ```
//!
//! Only the [`SessionManager`] changes the phase. Calling `initialize` again
//! after the first call is a no-op, so duplicate triggers from the UI layer
//! are harmless. `login`, `register`, `logout` and `expire` move between
//! `Authenticated` and `Unauthenticated` afterwards.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::AuthBackend;
use crate::error::ApiError;
use crate::gateway::SessionEvent;
use crate::protocol::{AuthResponse, Identity, LoginCredentials, Organization, RegisterData};
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;
use crate::token::{self, BACKGROUND_REFRESH_THRESHOLD};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// What the UI renders from. Derived from stored credentials, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub identity: Option<Identity>,
    pub organization: Option<Organization>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    /// Still working out whether a session exists
    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Uninitialized | SessionPhase::Initializing
        )
    }
}

pub struct SessionManager {
    backend: Arc<dyn AuthBackend>,
    coordinator: Arc<RefreshCoordinator>,
    store: TokenStore,
    background_refresh_threshold: i64,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        coordinator: Arc<RefreshCoordinator>,
        store: TokenStore,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            backend,
            coordinator,
            store,
            background_refresh_threshold: BACKGROUND_REFRESH_THRESHOLD,
            state,
        }
    }

    pub fn with_background_refresh_threshold(mut self, seconds: i64) -> Self {
        self.background_refresh_threshold = seconds;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn organization(&self) -> Option<Organization> {
        self.state.borrow().organization.clone()
    }

    /// Receives every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Restore a session on startup.
    ///
    /// Fast path: a readable, unexpired access token restores the session
    /// without touching the network. Slow path: exchange the refresh token.
    pub async fn initialize(&self) -> SessionState {
        let entered = self.state.send_if_modified(|state| {
            if state.phase == SessionPhase::Uninitialized {
                state.phase = SessionPhase::Initializing;
                true
            } else {
                false
            }
        });
        if !entered {
            tracing::debug!(phase = ?self.phase(), "Session already initialized");
            return self.state();
        }

        if self.restore_from_access_token() {
            return self.state();
        }

        self.restore_from_refresh_token().await;
        self.state()
    }

    fn restore_from_access_token(&self) -> bool {
        let Some(access_token) = self.store.access_token() else {
            return false;
        };

        let now = token::now_secs();
        let claims = match token::decode_unexpired(&access_token, now) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Stored access token unusable, falling back to refresh");
                return false;
            }
        };

        let organization = self.cached_organization();
        self.set_authenticated(Identity::from(&claims), organization);
        tracing::info!(user_id = %claims.user_id, "Session restored from access token");

        if claims.expires_within(self.background_refresh_threshold, now) {
            self.spawn_background_refresh();
        }
        true
    }

    async fn restore_from_refresh_token(&self) {
        if self.store.refresh_token().is_none() {
            tracing::debug!("No refresh token, starting unauthenticated");
            self.set_unauthenticated();
            return;
        }

        let pair = match self.coordinator.refresh().await {
            Ok(pair) => pair,
            // the coordinator already cleared whatever this refresh owned
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore session");
                self.set_unauthenticated();
                return;
            }
        };

        match token::decode(&pair.access_token) {
            Ok(claims) => {
                let organization = self.cached_organization();
                self.set_authenticated(Identity::from(&claims), organization);
                tracing::info!(user_id = %claims.user_id, "Session restored from refresh token");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refreshed access token is unreadable");
                self.store.clear_all();
                self.set_unauthenticated();
            }
        }
    }

    /// Failure is only logged: the restored session is still usable.
    fn spawn_background_refresh(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            match coordinator.refresh().await {
                Ok(_) => tracing::debug!("Background token refresh complete"),
                Err(e) => tracing::warn!(error = %e, "Background token refresh failed"),
            }
        });
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<SessionState, ApiError> {
        let response = self.backend.login(credentials).await?;
        self.accept(response);
        Ok(self.state())
    }

    pub async fn register(&self, data: &RegisterData) -> Result<SessionState, ApiError> {
        let response = self.backend.register(data).await?;
        self.accept(response);
        Ok(self.state())
    }

    /// The organization comes from the response, not the JWT, so it is never
    /// stale.
    fn accept(&self, response: AuthResponse) {
        self.store
            .set_pair(&response.access_token, &response.refresh_token);
        match serde_json::to_value(&response.organization) {
            Ok(value) => self.store.set_organization(&value),
            Err(e) => tracing::warn!(error = %e, "Could not cache organization"),
        }

        tracing::info!(user_id = %response.user.id, "Signed in");
        self.set_authenticated(Identity::from(&response.user), Some(response.organization));
    }

    /// Ends the session locally right away, then tells the backend on a
    /// best-effort basis. Never fails.
    pub async fn logout(&self) {
        let refresh_token = self.store.refresh_token();

        self.store.clear_all();
        self.set_unauthenticated();
        tracing::info!("Signed out");

        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.backend.logout(&refresh_token).await {
                tracing::warn!(error = %e, "Backend logout failed, ignoring");
            }
        }
    }

    /// Terminal refresh failure reported by the request path
    pub fn expire(&self) {
        self.store.clear_all();
        if self.phase() != SessionPhase::Unauthenticated {
            tracing::info!("Session expired");
        }
        self.set_unauthenticated();
    }

    /// Apply gateway events until the gateway goes away.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::LoginRequired { .. }) => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.expire();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Session event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn cached_organization(&self) -> Option<Organization> {
        let value = self.store.organization()?;
        match serde_json::from_value(value) {
            Ok(organization) => Some(organization),
            Err(e) => {
                tracing::debug!(error = %e, "Cached organization has an unexpected shape");
                None
            }
        }
    }

    fn set_authenticated(&self, identity: Identity, organization: Option<Organization>) {
        self.state.send_replace(SessionState {
            phase: SessionPhase::Authenticated,
            identity: Some(identity),
            organization,
        });
    }

    fn set_unauthenticated(&self) {
        self.state.send_replace(SessionState {
            phase: SessionPhase::Unauthenticated,
            identity: None,
            organization: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeBackend};
    use std::time::Duration;

    struct Harness {
        backend: Arc<FakeBackend>,
        store: TokenStore,
        manager: Arc<SessionManager>,
    }

    fn harness(backend: FakeBackend) -> Harness {
        let backend = Arc::new(backend);
        let store = TokenStore::in_memory();
        let coordinator = Arc::new(RefreshCoordinator::new(
            backend.clone(),
            store.clone(),
            Some(Duration::from_secs(2)),
        ));
        let manager = Arc::new(SessionManager::new(backend.clone(), coordinator, store.clone()));
        Harness {
            backend,
            store,
            manager,
        }
    }

    fn cache_organization(store: &TokenStore) {
        store.set_organization(&serde_json::to_value(testing::organization()).unwrap());
    }

    #[tokio::test]
    async fn test_fast_path_makes_no_calls() {
        let h = harness(FakeBackend::new());
        h.store.set_pair(&testing::token_expiring_in(3600), "R0");
        cache_organization(&h.store);

        let state = h.manager.initialize().await;

        assert_eq!(state.phase, SessionPhase::Authenticated);
        assert_eq!(state.identity.unwrap().user_id, "u1");
        assert_eq!(state.organization, Some(testing::organization()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_fast_path_refreshes_in_background_near_expiry() {
        let h = harness(FakeBackend::new());
        h.store.set_pair(&testing::token_expiring_in(200), "R0");

        let state = h.manager.initialize().await;
        assert!(state.is_authenticated());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_background_refresh_failure_keeps_session() {
        let h = harness(FakeBackend::new().failing_refresh());
        h.store.set_pair(&testing::token_expiring_in(200), "R0");

        h.manager.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(h.manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_slow_path_with_expired_access_token() {
        let h = harness(FakeBackend::new());
        h.store.set_pair(&testing::token_expiring_in(-10), "R0");
        cache_organization(&h.store);

        let state = h.manager.initialize().await;

        assert!(state.is_authenticated());
        assert_eq!(state.organization.unwrap().slug, "acme");
        assert_eq!(h.backend.presented_refresh_tokens(), vec!["R0".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_path_with_garbage_access_token() {
        let h = harness(FakeBackend::new());
        h.store.set_pair("garbage", "R0");

        let state = h.manager.initialize().await;

        assert!(state.is_authenticated());
        assert_eq!(h.backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_credentials_is_unauthenticated() {
        let h = harness(FakeBackend::new());

        let state = h.manager.initialize().await;

        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_path_failure_clears_everything() {
        let h = harness(FakeBackend::new().failing_refresh());
        h.store.set_refresh_token("R0");
        cache_organization(&h.store);

        let state = h.manager.initialize().await;

        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(h.store.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn test_initialize_twice_is_noop() {
        let h = harness(FakeBackend::new());
        h.store.set_refresh_token("R0");

        let (first, second) = tokio::join!(h.manager.initialize(), h.manager.initialize());
        let third = h.manager.initialize().await;

        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(first.is_authenticated());
        // the duplicate call returned while the first was still working
        assert_eq!(second.phase, SessionPhase::Initializing);
        assert!(third.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_stores_pair_and_organization() {
        let h = harness(FakeBackend::new());
        let credentials = LoginCredentials {
            email: "a@b.com".to_string(),
            password: "x".to_string(),
        };

        let state = h.manager.login(&credentials).await.unwrap();

        assert!(state.is_authenticated());
        assert_eq!(state.identity.unwrap().name.as_deref(), Some("Ada"));
        assert_eq!(h.store.refresh_token().as_deref(), Some("R-login"));
        assert_eq!(h.store.organization().unwrap()["slug"], "acme");
    }

    #[tokio::test]
    async fn test_login_failure_leaves_state_alone() {
        let h = harness(FakeBackend::new().rejecting_login());
        h.manager.initialize().await;
        let credentials = LoginCredentials {
            email: "a@b.com".to_string(),
            password: "wrong".to_string(),
        };

        let err = h.manager.login(&credentials).await.unwrap_err();

        assert!(matches!(err, ApiError::Unauthorized { .. }));
        assert_eq!(h.backend.login_calls(), 1);
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert!(h.store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_survives_backend_failure() {
        let h = harness(FakeBackend::new().failing_logout());
        h.store.set_pair(&testing::token_expiring_in(3600), "R0");
        cache_organization(&h.store);
        h.manager.initialize().await;

        h.manager.logout().await;

        assert_eq!(h.backend.logout_calls(), 1);
        assert_eq!(h.store.snapshot(), Default::default());
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert!(h.manager.identity().is_none());
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_skips_backend() {
        let h = harness(FakeBackend::new());
        h.manager.logout().await;
        assert_eq!(h.backend.logout_calls(), 0);
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            email: "a@b.com".to_string(),
            password: "x".to_string(),
        }
    }

    /// Restores a session whose access token is close enough to expiry that
    /// a background refresh of R0 is now running.
    async fn restore_with_refresh_running(h: &Harness) {
        h.store.set_pair(&testing::token_expiring_in(200), "R0");
        assert!(h.manager.initialize().await.is_authenticated());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.backend.presented_refresh_tokens(), vec!["R0".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_during_background_refresh_stays_logged_out() {
        let h = harness(FakeBackend::new().with_refresh_delay(Duration::from_millis(100)));
        restore_with_refresh_running(&h).await;

        h.manager.logout().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.store.snapshot(), Default::default());
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        // R0 on logout, then the pair the late refresh produced
        assert_eq!(
            h.backend.revoked_refresh_tokens(),
            vec!["R0".to_string(), "R1".to_string()]
        );

        // nothing left to restore on the next start
        let backend = Arc::new(FakeBackend::new());
        let coordinator = Arc::new(RefreshCoordinator::new(backend.clone(), h.store.clone(), None));
        let restarted = SessionManager::new(backend.clone(), coordinator, h.store.clone());
        assert_eq!(restarted.initialize().await.phase, SessionPhase::Unauthenticated);
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_during_background_refresh_keeps_new_pair() {
        let h = harness(FakeBackend::new().with_refresh_delay(Duration::from_millis(100)));
        restore_with_refresh_running(&h).await;

        h.manager.logout().await;
        h.manager.login(&credentials()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.store.refresh_token().as_deref(), Some("R-login"));
        assert!(h.store.organization().is_some());
        assert!(h.manager.is_authenticated());
        assert!(h.backend.revoked_refresh_tokens().contains(&"R1".to_string()));
    }

    #[tokio::test]
    async fn test_register_during_background_refresh_keeps_new_pair() {
        let h = harness(FakeBackend::new().with_refresh_delay(Duration::from_millis(100)));
        restore_with_refresh_running(&h).await;

        let data = RegisterData {
            email: "b@c.com".to_string(),
            password: "secret123".to_string(),
            name: "Grace".to_string(),
            organization_name: "Acme".to_string(),
        };
        h.manager.register(&data).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.store.refresh_token().as_deref(), Some("R-login"));
        assert!(h.manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_background_refresh_keeps_new_login() {
        let h = harness(
            FakeBackend::new()
                .with_refresh_delay(Duration::from_millis(100))
                .failing_refresh(),
        );
        restore_with_refresh_running(&h).await;

        h.manager.logout().await;
        h.manager.login(&credentials()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.store.refresh_token().as_deref(), Some("R-login"));
        assert!(h.store.access_token().is_some());
        assert!(h.store.organization().is_some());
        assert!(h.manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_background_refresh_after_logout() {
        let h = harness(
            FakeBackend::new()
                .with_refresh_delay(Duration::from_millis(100))
                .failing_refresh(),
        );
        restore_with_refresh_running(&h).await;

        h.manager.logout().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.store.snapshot(), Default::default());
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert_eq!(h.backend.revoked_refresh_tokens(), vec!["R0".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_during_slow_path_restore() {
        let h = harness(FakeBackend::new().with_refresh_delay(Duration::from_millis(100)));
        h.store.set_refresh_token("R0");

        let (state, ()) = tokio::join!(h.manager.initialize(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.manager.logout().await;
        });

        assert_eq!(state.phase, SessionPhase::Unauthenticated);
        assert_eq!(h.store.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn test_login_required_event_expires_session() {
        let h = harness(FakeBackend::new());
        h.manager.login(&LoginCredentials {
            email: "a@b.com".to_string(),
            password: "x".to_string(),
        })
        .await
        .unwrap();

        let (tx, rx) = broadcast::channel(4);
        let mut watcher = h.manager.subscribe();
        let listener = h.manager.spawn_event_listener(rx);

        tx.send(SessionEvent::LoginRequired {
            redirect_to: "/auth/login".to_string(),
        })
        .unwrap();
        watcher
            .wait_for(|state| state.phase == SessionPhase::Unauthenticated)
            .await
            .unwrap();

        assert!(h.store.refresh_token().is_none());
        drop(tx);
        listener.await.unwrap();
    }
}
