use serde::{Deserialize, Serialize};

/// Control messages written to a room's datachannel as UTF-8 JSON.
///
/// Every time-bearing variant carries `playout_ts` in server-timeline
/// milliseconds. The router serialises a message exactly once and never
/// re-encodes `playout_ts` — it is the server's authoritative timeline value
/// and must survive routing unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Fetch the image ahead of its show instant.
    ImgPreload {
        id: String,
        cdn_url: String,
        playout_ts: i64,
        ttl_ms: u64,
    },
    /// Crossfade the image in at `playout_ts`.
    ImgShow {
        id: String,
        playout_ts: i64,
        transition: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// The conversation is over; the client may return to its idle screen.
    EndChat,
    /// The session ended and no further messages will arrive.
    EndOfStream { session_id: String },
    /// Operator-facing remaining-time tick, emitted at 1 Hz.
    SessionTick { session_id: String, remaining_s: u64 },
}

impl ControlMessage {
    /// Wire tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            ControlMessage::ImgPreload { .. } => "img_preload",
            ControlMessage::ImgShow { .. } => "img_show",
            ControlMessage::EndChat => "end_chat",
            ControlMessage::EndOfStream { .. } => "end_of_stream",
            ControlMessage::SessionTick { .. } => "session_tick",
        }
    }

    /// Server-timeline instant carried by time-bearing messages.
    pub fn playout_ts(&self) -> Option<i64> {
        match self {
            ControlMessage::ImgPreload { playout_ts, .. }
            | ControlMessage::ImgShow { playout_ts, .. } => Some(*playout_ts),
            _ => None,
        }
    }
}
