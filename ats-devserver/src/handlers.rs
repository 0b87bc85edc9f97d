//! HTTP handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::{get, post},
};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use ats_core::protocol::{
    AuthResponse, LOGIN_PATH, LOGOUT_PATH, LoginCredentials, LogoutRequest, ME_PATH,
    MessageResponse, REFRESH_PATH, REGISTER_PATH, RefreshRequest, RegisterData, TokenPair, User,
};

use crate::auth;
use crate::state::AppState;

pub type SharedState = Arc<RwLock<AppState>>;

/// Status plus the `{ "message": ... }` body the client reads
pub type Rejection = (StatusCode, Json<MessageResponse>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> Rejection {
    tracing::error!(error = %e, "Request failed");
    reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(LOGIN_PATH, post(login_handler))
        .route(REGISTER_PATH, post(register_handler))
        .route(REFRESH_PATH, post(refresh_handler))
        .route(LOGOUT_PATH, post(logout_handler))
        .route(ME_PATH, get(me_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ats-devserver"
    }))
}

pub async fn register_handler(
    State(state): State<SharedState>,
    Json(req): Json<RegisterData>,
) -> Result<(StatusCode, Json<AuthResponse>), Rejection> {
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(reject(StatusCode::BAD_REQUEST, "A valid email is required"));
    }
    if req.password.len() < 8 {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters",
        ));
    }
    if req.name.trim().is_empty() || req.organization_name.trim().is_empty() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Name and organization name are required",
        ));
    }

    let password_hash = auth::hash_password(&req.password).map_err(internal)?;

    let mut s = state.write().await;
    if s.find_by_email(email).is_some() {
        return Err(reject(StatusCode::CONFLICT, "Email already registered"));
    }

    let (user, organization) = s.register(
        email,
        password_hash,
        req.name.trim(),
        req.organization_name.trim(),
    );
    let pair = s.issue_pair(&user).map_err(internal)?;
    tracing::info!(user_id = %user.id, organization_id = %organization.id, "Registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user,
            organization,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }),
    ))
}

pub async fn login_handler(
    State(state): State<SharedState>,
    Json(req): Json<LoginCredentials>,
) -> Result<Json<AuthResponse>, Rejection> {
    let invalid = || reject(StatusCode::UNAUTHORIZED, "Invalid email or password");

    let mut s = state.write().await;
    let user_id = match s.find_by_email(req.email.trim()) {
        Some(record) if auth::verify_password(&record.password_hash, &req.password) => {
            record.user.id.clone()
        }
        _ => {
            tracing::info!("Rejected login");
            return Err(invalid());
        }
    };

    let user = s.touch_last_login(&user_id).ok_or_else(invalid)?;
    let organization = s
        .organization_of(&user)
        .ok_or_else(|| internal("user without organization"))?;
    let pair = s.issue_pair(&user).map_err(internal)?;
    tracing::info!(user_id = %user.id, "Logged in");

    Ok(Json(AuthResponse {
        user,
        organization,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

/// Rotates: the presented token is consumed and a new pair returned
pub async fn refresh_handler(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, Rejection> {
    let mut s = state.write().await;
    let Some(user) = s.redeem(&req.refresh_token) else {
        tracing::info!("Rejected refresh token");
        return Err(reject(StatusCode::UNAUTHORIZED, "Invalid refresh token"));
    };

    let pair = s.issue_pair(&user).map_err(internal)?;
    tracing::debug!(user_id = %user.id, "Rotated refresh token");
    Ok(Json(pair))
}

/// Always succeeds; unknown tokens are already as revoked as they get
pub async fn logout_handler(
    State(state): State<SharedState>,
    Json(req): Json<LogoutRequest>,
) -> Json<MessageResponse> {
    let revoked = state.write().await.revoke(&req.refresh_token);
    tracing::info!(revoked, "Logged out");
    Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    })
}

pub async fn me_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<User>, Rejection> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    let s = state.read().await;
    let claims = s
        .issuer
        .verify_access_token(token)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    s.users
        .get(&claims.user_id)
        .map(|r| Json(r.user.clone()))
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "User not found"))
}
