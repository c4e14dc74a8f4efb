// File Path: src/routes/groups.rs

//! Group Membership Routes

use axum::{routing::post, Router};
use crate::api::{groups, state::AppState};

/// Creates membership routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Add a group to a connected user's membership set
        .route("/api/groups/:group_id/members/:user_id", post(groups::add_group_member))
}
