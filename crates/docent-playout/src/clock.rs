use tokio::time::Instant;
use tracing::info;

/// One-shot mapping from the server timeline to the local monotonic clock.
///
/// The first `playout_ts` seen learns the offset; it is never re-learned for
/// the rest of the session. That trades long-session drift accuracy for a
/// complete absence of scheduling jitter from re-sync events — within the
/// bounded session durations the drift stays below the show tolerance.
pub struct ClockSync {
    epoch: Instant,
    offset_ms: Option<i64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_ms: None,
        }
    }

    /// Milliseconds on the local monotonic clock.
    pub fn local_now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Learn the offset from the first server timestamp. Later calls are
    /// no-ops — the offset is immutable once set.
    pub fn initialise(&mut self, server_ts: i64) {
        if self.offset_ms.is_none() {
            let offset = server_ts - self.local_now_ms();
            info!(offset_ms = offset, "clock offset learned");
            self.offset_ms = Some(offset);
        }
    }

    /// Convert a server-timeline instant to local milliseconds.
    /// None until the offset has been learned.
    pub fn convert(&self, server_ts: i64) -> Option<i64> {
        self.offset_ms.map(|offset| server_ts - offset)
    }

    pub fn is_initialised(&self) -> bool {
        self.offset_ms.is_some()
    }

    /// Forget the offset (session reset).
    pub fn reset(&mut self) {
        self.offset_ms = None;
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}
