//! HTTP control surface.
//!
//! Routes:
//!   GET  /api/health               → health check
//!   GET  /api/status               → session state and open target
//!   POST /api/bag_control          → `{"enable_recording": bool}`
//!   POST /api/bag_control/reset    → roll over to a new bag directory
//!
//! Control requests are only queued here; the listener thread applies
//! them in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use bagrec_common::protocol::{BagControl, HealthResponse, StatusResponse};

use crate::controller::SessionController;
use crate::listener::ControlSignal;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    controller: Arc<SessionController>,
    signals: Sender<ControlSignal>,
    start_time: Instant,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>, signals: Sender<ControlSignal>) -> Self {
        Self {
            controller,
            signals,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/bag_control", post(bag_control))
        .route("/api/bag_control/reset", post(reset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Blocks until shutdown.
pub async fn run(
    state: AppState,
    listen_addr: &str,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    info!("Control HTTP server listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

// ── route handlers ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    // The controller lock is held for the whole of a start or stop.
    let controller = state.controller.clone();
    tokio::task::spawn_blocking(move || controller.status())
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn bag_control(State(state): State<AppState>, Json(msg): Json<BagControl>) -> StatusCode {
    enqueue(&state, ControlSignal::from(msg))
}

async fn reset(State(state): State<AppState>) -> StatusCode {
    enqueue(&state, ControlSignal::Reset)
}

fn enqueue(state: &AppState, signal: ControlSignal) -> StatusCode {
    match state.signals.send(signal) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            warn!("Control listener is gone, dropping {signal}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
