//! Documentation of the reading-credit server.
//!
//! The platform pays points for reading articles. This server decides whether a
//! reading session was real enough to pay for.
//!
//!
//!
//! # General Infrastructure
//! - User goes through the gateway, which authenticates and sets `x-user-id`
//! - Gateway forwards `/reading/*` to this server
//! - Server keeps read tokens and credits in Redis
//! - Points/achievement system reads the credits, this server never touches achievements
//!
//!
//!
//! # Preventing Free Points
//!
//! **Goal**: Make a script that opens an article and immediately calls "mark as read" earn nothing, without
//! bothering people who actually read.
//!
//! - Client opens an article and asks `/reading/start` for a token
//! - If the user already has credit for the article, no token, 409
//! - Otherwise we store (user, article, issued at, fingerprint) under a random id, HMAC the id, hand it out
//! - Client tracks scroll depth, scroll/pointer counts, focused time while the article is open
//! - Once the dwell time has passed, client sends the snapshot + token to `/reading/submit`
//! - Token is taken out of Redis on that first submit, whatever the verdict
//! - Too fast, no scroll, no interaction, or mostly backgrounded, we reject with a reason code
//! - Otherwise the ledger records the read once and we return the user's progress
//!
//! Fingerprint changes are logged but never the only reason to reject. It's a weak signal.
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! READ_TOKEN_SECRET=dev cargo run -p backend
//! ```
//!
//! Run without Redis.
//! ```sh
//! READ_STORE=memory READ_SEED_ARTICLES=intro:3,deep-dive:12 READ_TOKEN_SECRET=dev cargo run -p backend
//! ```
//!
//! Logs.
//! ```sh
//! RUST_LOG=server=debug cargo run -p backend
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use payloads::{START_READING_PATH, SUBMIT_READ_PATH};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod policy;
pub mod routes;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod tokens;
pub mod utils;

use routes::{health_handler, start_reading_handler, submit_read_handler};
use state::State;

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(START_READING_PATH, post(start_reading_handler))
        .route(SUBMIT_READ_PATH, post(submit_read_handler))
        .with_state(state)
}

fn cors(allowed_origin: Option<&str>) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Ok(match allowed_origin {
        Some(origin) => cors.allow_origin(
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid allowed origin {origin}"))?,
        ),
        None => cors,
    })
}

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let app = router(state.clone()).layer(cors(state.config.allowed_origin.as_deref())?);

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
