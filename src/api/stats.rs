// File Path: src/api/stats.rs

use axum::{extract::State, Json};

use crate::{api::state::AppState, models::InstanceStats};

/// Reports this instance's id and how many users are connected to it.
pub async fn get_stats(State(state): State<AppState>) -> Json<InstanceStats> {
    Json(InstanceStats {
        instance_id: state.instance_id.to_string(),
        online: state.connection_manager.len().await,
        bridge_enabled: state.bridge.is_some(),
    })
}
