//! jsonsync server - HTTP and WebSocket front for the sync core.
//!
//! This crate provides:
//! - A JSON file API (`/api/files`) backed by the document store
//! - A push channel (`/ws`) sending a snapshot, then live change events
//! - A health check (`/healthz`)

pub mod config;
pub mod error;
pub mod json;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::{Args, ServerConfig};
pub use error::ApiError;
pub use state::AppState;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .merge(routes::health::routes())
        // JSON file API
        .merge(routes::files::routes())
        // Push channel
        .route("/ws", get(ws::ws_sync))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
