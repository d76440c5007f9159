//! Documentation of a single-choice ballot service.
//!
//!
//!
//! # General Infrastructure
//! - One process, one Redis instance
//! - Reverse proxy in front sets `X-Forwarded-For`, otherwise the peer address is used
//! - Static pages (`index.html`, `vote.html`, `terms.html`, `assets/`) are served from `STATIC_PATH`
//! - Terms answer on `/terms` and on the older `/termos-uso-privacidade` link
//!
//!
//!
//! # One Ballot Per Voter
//!
//! **Goal**: count each voter once, keep results instant.
//!
//! - Every request resolves to two identity keys, see [`identity`]
//! - A ballot is only written when neither key is already in the store
//! - Check, write and count happen under one lock in [`admission`]
//! - A ballot the store did not acknowledge is never counted
//!
//!
//!
//! # Notes
//!
//! ## Redis as the ballot log
//! Ballots are the source of truth, the in-memory [`tally`] is derived from them. On start we
//! replay the whole ballot list into the tally before binding the port, so nobody ever reads a
//! half built count. After that the tally only moves when a ballot has been acknowledged by Redis.
//!
//! Run Redis with AOF on. Without it an acknowledged ballot can be lost on a crash, and the
//! tally will shrink after restart.
//!
//! ## Identity
//! Address + `User-Agent` or a cookie. Clearing cookies and switching browsers gets a second
//! ballot, a shared NAT gets one ballot per browser. Good enough for a poll, not for an election.
//!
//!
//!
//! # Setup
//!
//! Environment
//! ```sh
//! RUST_PORT=8080
//! REDIS_HOST=127.0.0.1 REDIS_PORT=6379 REDIS_DB=0
//! REDIS_USER=votei  # optional
//! REDIS_PASSWORD=... # or /run/secrets/REDIS_PASSWORD
//! STATIC_PATH=./web/static
//! CANDIDATES=45,13
//! RUST_LOG=info
//! ```
//!
//! Run.
//! ```sh
//! cargo run --bin votei
//! ```
//!
//! Log every ballot in full.
//! ```sh
//! cargo run --bin votei --features server/verbose
//! ```
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, get_service},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admission;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod routes;
pub mod state;
pub mod tally;
pub mod utils;

use config::Config;
use error::StartupError;
use routes::{result_handler, result_json_handler, vote_handler};
use state::State;

const INDEX_FILE: &str = "index.html";
const VOTE_FILE: &str = "vote.html";
const TERMS_FILE: &str = "terms.html";
const TERMS_ROUTES: [&str; 2] = ["/terms", "/termos-uso-privacidade"];
const ASSETS_DIR: &str = "assets";

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let static_path = state.config.static_path.clone();

    let terms = ServeFile::new(static_path.join(TERMS_FILE));
    let router = TERMS_ROUTES
        .into_iter()
        .fold(Router::<Arc<State>>::new(), |router, path| {
            router.route_service(path, terms.clone())
        });

    router
        .route_service("/", ServeFile::new(static_path.join(INDEX_FILE)))
        .route(
            "/vote",
            get_service(ServeFile::new(static_path.join(VOTE_FILE))).post(vote_handler),
        )
        .nest_service("/assets", ServeDir::new(static_path.join(ASSETS_DIR)))
        .route("/result", get(result_handler))
        .route("/api/result", get(result_json_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), StartupError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
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
                error!("Failed to install signal handler: {e}");
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
