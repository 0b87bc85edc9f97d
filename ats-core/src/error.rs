//! Error taxonomy for requests and credential refresh

use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed refresh.
///
/// `Clone` because every caller coalesced onto one refresh receives the same
/// result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    Failed(String),

    #[error("Token refresh timed out after {0:?}")]
    TimedOut(Duration),

    /// Logout or a new login replaced the pair while the refresh was running
    #[error("Session changed while refreshing")]
    Superseded,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    NotFound { message: String },

    /// Any other non-2xx response
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status for errors that came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the session is over and the user has to log in again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApiError::Refresh(e) if *e != RefreshError::Superseded)
    }

    /// Text suitable for showing inline
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
