// src/routes/mod.rs

//! # Routes Module
//!
//! Defines the main routing structure for the Axum server.

use axum::{routing::get, Router};
use crate::api::state::AppState;

pub mod groups;
pub mod health;
pub mod websocket;

/// Creates and configures the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat entry point: /chat/:group_id?user_id=..&token=..
        .route("/chat/:group_id", get(websocket::websocket_handler))
        .merge(health::routes())
        .merge(groups::routes())
        .with_state(state)
}
