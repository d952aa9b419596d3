use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use docent_core::config::TICK_INTERVAL_MS;

use crate::registry::SessionRegistry;

/// Remaining-time broadcaster.
///
/// A single shared 1 Hz loop computes `remaining_s` for every active session,
/// publishes it to the operator room, and ends sessions whose hard duration
/// has expired. One cheap centralised ticker instead of per-session timers.
pub async fn run_ticker(registry: Arc<SessionRegistry>, mut shutdown: watch::Receiver<bool>) {
    info!("remaining-time broadcaster started");
    let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = interval.tick() => registry.tick(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("remaining-time broadcaster shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::config::{SessionConfig, OPERATOR_ROOM};
    use docent_rooms::{ControlMessage, RoomRouter};

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_to_operator_room_and_stops_after_end() {
        let router = Arc::new(RoomRouter::new());
        router.create(OPERATOR_ROOM);
        let registry = SessionRegistry::new(
            router.clone(),
            &SessionConfig {
                idle_timeout_ms: 600_000,
                duration_s: 2,
                sweep_interval_ms: 60_000,
            },
        );
        let mut operator = router.subscribe(OPERATOR_ROOM).unwrap();
        let entry = registry.create("kiosk-1");

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_ticker(registry.clone(), shutdown_rx));

        // Let the hard duration expire under the ticker.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!entry.is_active());

        let mut ticks = 0;
        while let Ok(payload) = operator.try_recv() {
            let msg: ControlMessage = serde_json::from_str(&payload).unwrap();
            if let ControlMessage::SessionTick { session_id, .. } = msg {
                assert_eq!(session_id, entry.id);
                ticks += 1;
            }
        }
        // Ticks were emitted while active, none after the session ended.
        assert!(ticks >= 2);
        assert!(ticks <= 4);
    }
}
