use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, RoomError};
use crate::types::ControlMessage;

/// Broadcast backlog per room. A subscriber that falls further behind than
/// this is lagged out and must reattach.
const ROOM_CAPACITY: usize = 256;

/// Reliable, ordered broadcast of JSON control messages to every participant
/// in a room.
///
/// Messages from a single publisher reach all subscribers in send order.
/// `schedule` arms a timer against the server monotonic clock; scheduled
/// sends that outlive their room are dropped with a debug log rather than
/// surfacing an error.
pub struct RoomRouter {
    rooms: DashMap<String, Arc<Room>>,
}

struct Room {
    tx: broadcast::Sender<String>,
    cancel: CancellationToken,
    pending: AtomicUsize,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Create a room. Idempotent — an existing room is left untouched.
    pub fn create(&self, room_id: &str) {
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(room = %room_id, "room created");
            let (tx, _) = broadcast::channel(ROOM_CAPACITY);
            Arc::new(Room {
                tx,
                cancel: CancellationToken::new(),
                pending: AtomicUsize::new(0),
            })
        });
    }

    /// Subscribe to a room's control-message stream.
    pub fn subscribe(&self, room_id: &str) -> Result<broadcast::Receiver<String>> {
        let room = self.get(room_id)?;
        Ok(room.tx.subscribe())
    }

    /// Encode and broadcast a message to every participant right now.
    pub fn send(&self, room_id: &str, message: &ControlMessage) -> Result<()> {
        let room = self.get(room_id)?;
        broadcast_encoded(&room, room_id, message);
        Ok(())
    }

    /// Broadcast the message when `at` arrives; immediately if `at` has
    /// already passed. The timer is torn down when the room closes.
    pub fn schedule(&self, room_id: &str, message: ControlMessage, at: Instant) -> Result<()> {
        let room = self.get(room_id)?;
        if at <= Instant::now() {
            broadcast_encoded(&room, room_id, &message);
            return Ok(());
        }

        room.pending.fetch_add(1, Ordering::SeqCst);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = room.cancel.cancelled() => {
                    debug!(room = %room_id, tag = message.tag(), "room closed, scheduled send dropped");
                }
                _ = tokio::time::sleep_until(at) => {
                    broadcast_encoded(&room, &room_id, &message);
                }
            }
            room.pending.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Close a room: cancel every scheduled send and drop the fan-out.
    /// Returns false if the room was already gone.
    pub fn close(&self, room_id: &str) -> bool {
        match self.rooms.remove(room_id) {
            Some((_, room)) => {
                room.cancel.cancel();
                info!(room = %room_id, "room closed");
                true
            }
            None => false,
        }
    }

    /// Scheduled sends not yet fired or torn down for this room.
    pub fn pending_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|r| r.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn get(&self, room_id: &str) -> Result<Arc<Room>> {
        self.rooms
            .get(room_id)
            .map(|r| r.clone())
            .ok_or_else(|| RoomError::RoomGone {
                room_id: room_id.to_string(),
            })
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialise once and fan out. No subscribers is not an error — the payload
/// is silently dropped, matching a room nobody has attached to yet.
fn broadcast_encoded(room: &Room, room_id: &str, message: &ControlMessage) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            let delivered = room.tx.send(payload).unwrap_or(0);
            debug!(room = %room_id, tag = message.tag(), delivered, "control message broadcast");
        }
        Err(e) => {
            debug!(room = %room_id, tag = message.tag(), error = %e, "control message encode failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn show(id: &str, ts: i64) -> ControlMessage {
        ControlMessage::ImgShow {
            id: id.into(),
            playout_ts: ts,
            transition: "crossfade".into(),
            duration_ms: 400,
            caption: None,
        }
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let router = RoomRouter::new();
        router.create("r1");
        let mut rx = router.subscribe("r1").unwrap();

        router.send("r1", &show("a", 1)).unwrap();
        router.send("r1", &show("b", 2)).unwrap();

        let first: ControlMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: ControlMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.playout_ts(), Some(1));
        assert_eq!(second.playout_ts(), Some(2));
    }

    #[tokio::test]
    async fn send_to_missing_room_is_room_gone() {
        let router = RoomRouter::new();
        assert!(matches!(
            router.send("nope", &ControlMessage::EndChat),
            Err(RoomError::RoomGone { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_in_past_sends_immediately() {
        let router = RoomRouter::new();
        router.create("r1");
        let mut rx = router.subscribe("r1").unwrap();

        router
            .schedule("r1", show("a", 1), Instant::now())
            .unwrap();
        assert!(rx.try_recv().is_ok());
        assert_eq!(router.pending_count("r1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_send_fires_at_deadline() {
        let router = RoomRouter::new();
        router.create("r1");
        let mut rx = router.subscribe("r1").unwrap();

        router
            .schedule("r1", show("a", 1), Instant::now() + Duration::from_secs(2))
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(router.pending_count("r1"), 1);
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_ok());
        assert_eq!(router.pending_count("r1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_tears_down_scheduled_sends() {
        let router = RoomRouter::new();
        router.create("r1");
        let mut rx = router.subscribe("r1").unwrap();

        router
            .schedule("r1", show("a", 1), Instant::now() + Duration::from_secs(60))
            .unwrap();
        tokio::task::yield_now().await;
        assert!(router.close("r1"));
        assert!(!router.close("r1"));

        // The cancelled task never delivers.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed)
        ));
    }
}
