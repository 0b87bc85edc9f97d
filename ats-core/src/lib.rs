//! ats-core: Session and token lifecycle for the ATS client
//!
//! This crate provides:
//! - JWT payload decoding and expiry checks
//! - Two-scope credential storage
//! - An authorized request path with coalesced, rotating token refresh
//! - The session state machine (restore, login, logout)

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{AuthBackend, HttpAuthBackend};
pub use client::AtsClient;
pub use config::Config;
pub use error::{ApiError, RefreshError};
pub use gateway::{GatewaySettings, RequestGateway, SessionEvent};
pub use protocol::{AuthResponse, Identity, LoginCredentials, Organization, RegisterData, TokenPair, User};
pub use refresh::RefreshCoordinator;
pub use session::{SessionManager, SessionPhase, SessionState};
pub use store::{FileStore, KeyValueStore, MemoryStore, TokenStore};
pub use token::{Claims, Role, TokenError};
pub use transport::{HttpTransport, MultipartPart, RequestBody, RequestOptions};

/// Default backend API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// Client route the user lands on when the session ends
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";

/// Default port for ats-devserver
pub const DEFAULT_DEVSERVER_PORT: u16 = 3000;
