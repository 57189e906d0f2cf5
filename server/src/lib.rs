//! Backend for a personal portfolio site.
//!
//! # Endpoints
//!
//! - `POST /upload-resume`: multipart `resume` file plus admin `password`, replaces the served resume
//! - `GET /resume`: streams the current resume
//! - `POST /send-email`: relays a contact form (JSON or urlencoded) to a fixed inbox
//! - `GET /health`: liveness probe
//!
//!
//!
//! # State
//!
//! - One resume on disk at a time, under `UPLOAD_DIR` (default `uploads`)
//! - The current filename is mirrored to `UPLOAD_DIR/.current` so restarts keep serving it
//! - No database
//!
//!
//!
//! # Configuration
//!
//! Read from the environment (and an optional `.env`), with `/run/secrets/<NAME>` as a fallback.
//!
//! | Key | Default |
//! |---|---|
//! | `PORT` | `5000` |
//! | `UPLOAD_DIR` | `uploads` |
//! | `MAX_UPLOAD_BYTES` | `10485760` |
//! | `ADMIN_PASSWORD` | required |
//! | `SMTP_USER` / `EMAIL_USER` | required |
//! | `SMTP_PASS` / `EMAIL_PASS` | required |
//! | `SMTP_HOST` | `smtp.gmail.com` |
//! | `MAIL_FROM` | `SMTP_USER` |
//! | `CONTACT_RECIPIENT` | `MAIL_FROM` |
//! | `MAIL_MAX_RETRIES` | `2` |
//! | `MAIL_RETRY_BASE_MS` | `250` |
//! | `MAIL_TIMEOUT_SECS` | `30` |
//! | `CORS_ORIGIN` | any |
//!
//!
//!
//! # Setup
//!
//! Run locally.
//! ```sh
//! RUST_LOG=info cargo run
//! ```
//!
//! Upload a resume.
//! ```sh
//! curl -F resume=@resume.pdf -F password=$ADMIN_PASSWORD localhost:5000/upload-resume
//! ```
use std::{any::Any, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod error;
pub mod mail;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
pub mod utils;

use config::Config;
use error::StartupError;
use routes::{health_handler, resume_handler, send_email_handler, upload_handler};
use state::AppState;

pub async fn start_server() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let result = run().await;

    if let Err(e) = &result {
        error!("Server failed: {e}");
    }

    result
}

async fn run() -> Result<(), StartupError> {
    info!("Loading configuration...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");
    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let origin = match &state.config.cors_origin {
        Some(origin) => AllowOrigin::exact(origin.clone()),
        None => AllowOrigin::from(AnyOrigin),
    };

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/upload-resume", post(upload_handler))
        .route("/resume", get(resume_handler))
        .route("/send-email", post(send_email_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    error!("Handler panicked: {detail}");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Internal server error", "error": detail })),
    )
        .into_response()
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
            Ok(mut stream) => {
                stream.recv().await;
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
