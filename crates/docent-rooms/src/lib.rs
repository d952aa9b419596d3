pub mod error;
pub mod router;
pub mod types;

pub use error::{Result, RoomError};
pub use router::RoomRouter;
pub use types::ControlMessage;
