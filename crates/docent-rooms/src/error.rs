use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room is gone: {room_id}")]
    RoomGone { room_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RoomError>;
