// File Path: src/api/groups.rs
//! Group Membership Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    api::state::AppState,
    models::{ApiError, ApiResult, GroupId, UserId},
};

/// Adds a group to the membership set of a user connected to this instance.
///
/// Responds 404 when the user has no live connection here; nothing is created
/// for them.
pub async fn add_group_member(
    Path((group_id, user_id)): Path<(GroupId, UserId)>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    if state.add_group_id(user_id, group_id).await {
        info!(user_id, group_id, "User joined group");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "user {} is not connected to this instance",
            user_id
        )))
    }
}
