//! ats-devserver: Local auth backend for the ATS session client
//!
//! Implements the auth endpoints the client depends on:
//! - Register and login with Argon2-hashed passwords
//! - Short-lived HS256 access tokens
//! - Opaque refresh tokens, rotated on every refresh and revoked on logout
//!
//! Everything lives in memory and is gone on restart.

mod auth;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ats_core::Config;

use crate::auth::TokenIssuer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ats_devserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    });
    let server = &config.devserver;

    let jwt_secret = match server.jwt_secret {
        Some(ref secret) => base64::engine::general_purpose::STANDARD
            .decode(secret)
            .context("Invalid JWT secret (must be base64)")?,
        None => {
            tracing::info!("Generated random JWT secret (will change on restart)");
            auth::generate_secret().to_vec()
        }
    };

    let issuer = TokenIssuer::new(&jwt_secret, server.access_token_ttl, server.refresh_token_ttl);
    let state = Arc::new(RwLock::new(AppState::new(issuer)));
    let app = handlers::router(state);

    let addr = SocketAddr::from((
        server
            .listen_addr
            .parse::<std::net::IpAddr>()
            .context("Invalid listen address")?,
        server.port,
    ));
    tracing::info!("ats-devserver listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
