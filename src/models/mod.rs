// File Path: src/models/mod.rs

// =========================================================================================
// SECTION 1: IMPORTS
// =========================================================================================

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of a logged-in user, as supplied by the authentication collaborator.
pub type UserId = i64;

/// Identity of a chat group (room).
pub type GroupId = i64;

// =========================================================================================
// SECTION 2: API ERROR HANDLING
// =========================================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::IoError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };

        let body = serde_json::json!({
            "error": error_message,
            "status": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

// =========================================================================================
// SECTION 3: CHAT MESSAGE MODELS
// =========================================================================================

/// Command code for one-to-one delivery.
pub const CMD_SINGLE_MSG: i64 = 10;
/// Command code for group (room) delivery.
pub const CMD_ROOM_MSG: i64 = 11;
/// Command code for liveness probes.
pub const CMD_HEART: i64 = 0;

/// Routing command carried by every chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Single,
    Group,
    Heartbeat,
    /// Any code this server does not know; accepted and ignored.
    Unknown(i64),
}

impl From<i64> for Command {
    fn from(code: i64) -> Self {
        match code {
            CMD_SINGLE_MSG => Command::Single,
            CMD_ROOM_MSG => Command::Group,
            CMD_HEART => Command::Heartbeat,
            other => Command::Unknown(other),
        }
    }
}

/// Wire shape of a chat message.
///
/// Only `userid`, `dstid` and `cmd` are typed; they drive routing. Everything
/// else (`id`, `media`, `content`, `pic`, `url`, `memo`, `amount`, ...) belongs to
/// the media schema and is kept as raw JSON in `extra`, whatever its type. The
/// dispatcher always forwards the original bytes, never a re-serialization of
/// this struct.
///
/// ```json
/// {"id":1,"userid":2,"dstid":3,"cmd":10,"media":1,"content":"hello"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender identity.
    #[serde(default)]
    pub userid: UserId,
    /// Target user for single delivery, target group for group delivery.
    #[serde(default)]
    pub dstid: i64,
    pub cmd: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn command(&self) -> Command {
        Command::from(self.cmd)
    }

    /// A media field, untouched.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

// =========================================================================================
// SECTION 4: STATS MODELS
// =========================================================================================

/// Response body of the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStats {
    pub instance_id: String,
    pub online: usize,
    pub bridge_enabled: bool,
}
