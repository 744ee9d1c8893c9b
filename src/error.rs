use thiserror::Error;

use crate::models::Ack;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Error kinds the routing engine surfaces. Event handlers fold these into
/// structured acks; only authentication failures surface at the HTTP layer.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication fails")]
    Auth,

    #[error("The chat room is either closed or doesn't exist.")]
    RoomClosed,

    #[error("The chat has reached the max capacity.")]
    CapacityExceeded,

    #[error("You are not allowed to perform this action.")]
    PermissionDenied,

    #[error("Missing/Invalid field: {0}")]
    Validation(String),

    #[error("{0} already exists.")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<ChatError> for Ack {
    fn from(e: ChatError) -> Self {
        Ack::err(e.to_string())
    }
}
