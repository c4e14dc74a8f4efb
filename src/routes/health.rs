// File Path: src/routes/health.rs
//! Health Check Routes
//!
//! Provides health monitoring and instance status endpoints

use axum::{routing::get, Router};
use crate::api::{state::AppState, stats};

/// Health check endpoint
/// Returns "OK" if the server is running correctly
pub async fn health_check() -> &'static str {
    "OK"
}

/// Creates health-related routes and merges them into the main router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats::get_stats))
}
