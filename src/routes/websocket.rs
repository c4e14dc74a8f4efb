// File Path: src/routes/websocket.rs

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    api::state::AppState,
    models::{ApiResult, GroupId, UserId},
    services::session,
};

/// Query parameters of the chat upgrade request.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub user_id: UserId,
    pub token: Option<String>,
}

/// Main entry point for the WebSocket upgrade.
///
/// The user is authenticated before upgrading. Their initial groups are the
/// directory's groups plus the group named in the path.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(group_id): Path<GroupId>,
    Query(params): Query<ChatQuery>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let user_id = state
        .authenticator
        .authenticate(params.user_id, params.token.as_deref())
        .map_err(|e| {
            warn!(user_id = params.user_id, "Chat connection rejected: {}", e);
            e
        })?;

    let mut groups = state.group_directory.groups_for(user_id);
    if !groups.contains(&group_id) {
        groups.push(group_id);
    }

    info!(user_id, group_id, "Chat connection authenticated");
    Ok(ws.on_upgrade(move |socket| session::run_connection(socket, state, user_id, groups)))
}
