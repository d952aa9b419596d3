use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docent_core::config::{SessionConfig, SESSION_GRACE_SECS};
use docent_rooms::{ControlMessage, RoomRouter};

use crate::error::{Result, SessionError};
use crate::types::{EndReason, Session, SessionState};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle events observed by the gateway (history cleanup) and the
/// operator tick stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Ended {
        session_id: String,
        reason: EndReason,
    },
    Tick {
        session_id: String,
        remaining_s: u64,
    },
}

/// A live session inside the registry.
///
/// The entry owns everything that must be torn down when the session ends:
/// the inactivity watchdog (via `cancel`), the per-session turn gate, and
/// the room whose scheduled sends the router cancels on close.
pub struct SessionEntry {
    pub id: String,
    pub kiosk_id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_s: u64,
    /// Serialises conversation turns — held for the whole of one turn.
    pub turn_gate: tokio::sync::Mutex<()>,
    pub cancel: CancellationToken,
    /// Milliseconds on the registry's monotonic epoch.
    created_ms: i64,
    last_activity_ms: AtomicI64,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    state: SessionState,
    end_reason: Option<EndReason>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    pub fn is_active(&self) -> bool {
        self.lifecycle.lock().unwrap().state == SessionState::Active
    }

    fn snapshot(&self) -> Session {
        let lifecycle = self.lifecycle.lock().unwrap();
        let idle_ms = self.last_activity_ms.load(Ordering::SeqCst) - self.created_ms;
        Session {
            id: self.id.clone(),
            kiosk_id: self.kiosk_id.clone(),
            room_id: self.room_id.clone(),
            created_at: self.created_at,
            duration_s: self.duration_s,
            last_activity: self.created_at + chrono::Duration::milliseconds(idle_ms.max(0)),
            state: lifecycle.state,
            end_reason: lifecycle.end_reason,
            ended_at: lifecycle.ended_at,
        }
    }
}

/// Process-wide registry of kiosk sessions.
///
/// All state is in-memory: sessions are short-lived and survive neither the
/// process nor the one-hour post-end grace period. Operations are serialised
/// per session (turn gate + lifecycle lock); cross-session operations are
/// independent.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
    router: Arc<RoomRouter>,
    idle_timeout: Duration,
    duration_s: u64,
    sweep_interval: Duration,
    /// Monotonic origin for activity bookkeeping.
    epoch: Instant,
    events: broadcast::Sender<SessionEvent>,
    total_created: AtomicU64,
}

impl SessionRegistry {
    pub fn new(router: Arc<RoomRouter>, config: &SessionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            sessions: DashMap::new(),
            router,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            duration_s: config.duration_s,
            sweep_interval: Duration::from_millis(config.sweep_interval_ms),
            epoch: Instant::now(),
            events,
            total_created: AtomicU64::new(0),
        })
    }

    /// Create a session and its room, and arm the inactivity watchdog.
    pub fn create(self: &Arc<Self>, kiosk_id: &str) -> Arc<SessionEntry> {
        let id = Uuid::now_v7().to_string();
        let room_id = format!("room-{}", Uuid::new_v4().simple());
        let now_ms = self.now_ms();

        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            kiosk_id: kiosk_id.to_string(),
            room_id: room_id.clone(),
            created_at: Utc::now(),
            duration_s: self.duration_s,
            turn_gate: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            created_ms: now_ms,
            last_activity_ms: AtomicI64::new(now_ms),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Active,
                end_reason: None,
                ended_at: None,
            }),
        });

        self.router.create(&room_id);
        self.sessions.insert(id.clone(), entry.clone());
        self.total_created.fetch_add(1, Ordering::SeqCst);
        spawn_idle_watchdog(Arc::downgrade(self), entry.clone(), self.idle_timeout);

        info!(session_id = %id, kiosk_id, room = %room_id, "session created");
        entry
    }

    pub fn get_entry(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(session_id).map(|e| e.clone())
    }

    pub fn lookup(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|e| e.snapshot())
    }

    /// Reset the inactivity window. No-op when the session is not active.
    pub fn refresh(&self, session_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            if entry.is_active() {
                entry
                    .last_activity_ms
                    .store(self.now_ms(), Ordering::SeqCst);
                debug!(session_id, "session activity refreshed");
            }
        }
    }

    /// Transition active → ended. Idempotent: returns Ok(false) when the
    /// session had already ended. Room teardown is best-effort and never
    /// blocks the state transition.
    pub fn end(&self, session_id: &str, reason: EndReason) -> Result<bool> {
        let entry = self
            .get_entry(session_id)
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        {
            let mut lifecycle = entry.lifecycle.lock().unwrap();
            if lifecycle.state == SessionState::Ended {
                return Ok(false);
            }
            lifecycle.state = SessionState::Ended;
            lifecycle.end_reason = Some(reason);
            lifecycle.ended_at = Some(Utc::now());
        }

        // Watchdog and any other per-session work stop here.
        entry.cancel.cancel();

        // Tell attached clients the stream is over, then release the room;
        // closing cancels every scheduled send for this session.
        let _ = self.router.send(
            &entry.room_id,
            &ControlMessage::EndOfStream {
                session_id: session_id.to_string(),
            },
        );
        if !self.router.close(&entry.room_id) {
            warn!(session_id, room = %entry.room_id, "room already gone at session end");
        }

        let _ = self.events.send(SessionEvent::Ended {
            session_id: session_id.to_string(),
            reason,
        });
        info!(session_id, ?reason, "session ended");
        Ok(true)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.is_active()).count()
    }

    pub fn total_count(&self) -> u64 {
        self.total_created.load(Ordering::SeqCst)
    }

    /// Seconds left before the hard duration expires, clamped at zero.
    pub fn remaining_s(&self, entry: &SessionEntry) -> u64 {
        let elapsed_s = ((self.now_ms() - entry.created_ms) / 1_000).max(0) as u64;
        entry.duration_s.saturating_sub(elapsed_s)
    }

    /// One pass of the remaining-time broadcaster: emit ticks for active
    /// sessions and end those whose hard duration expired.
    pub fn tick(&self) {
        let active: Vec<Arc<SessionEntry>> = self
            .sessions
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.clone())
            .collect();

        for entry in active {
            let remaining = self.remaining_s(&entry);
            let _ = self.events.send(SessionEvent::Tick {
                session_id: entry.id.clone(),
                remaining_s: remaining,
            });
            let _ = self.router.send(
                docent_core::config::OPERATOR_ROOM,
                &ControlMessage::SessionTick {
                    session_id: entry.id.clone(),
                    remaining_s: remaining,
                },
            );
            if remaining == 0 {
                let _ = self.end(&entry.id, EndReason::Duration);
            }
        }
    }

    /// Delete sessions that ended more than the grace period ago.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("session sweeper started");
        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(SESSION_GRACE_SECS);
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            let lifecycle = entry.lifecycle.lock().unwrap();
            match lifecycle.ended_at {
                Some(ended_at) => ended_at > cutoff,
                None => true,
            }
        });
        let removed = before - self.sessions.len();
        if removed > 0 {
            info!(removed, "swept ended sessions");
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }
}

/// Per-session inactivity watchdog.
///
/// Sleeps until the current idle deadline, re-checks the activity stamp
/// (a refresh moves the deadline forward), and ends the session with reason
/// `timeout` on true expiry. Cancelled through the entry's token.
fn spawn_idle_watchdog(
    registry: Weak<SessionRegistry>,
    entry: Arc<SessionEntry>,
    idle: Duration,
) {
    tokio::spawn(async move {
        loop {
            let (epoch, last_ms) = match registry.upgrade() {
                Some(reg) => (reg.epoch, entry.last_activity_ms.load(Ordering::SeqCst)),
                None => return,
            };
            let deadline = epoch + Duration::from_millis(last_ms as u64) + idle;

            tokio::select! {
                _ = entry.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let Some(reg) = registry.upgrade() else { return };
            let still_idle =
                entry.last_activity_ms.load(Ordering::SeqCst) == last_ms;
            if still_idle {
                debug!(session_id = %entry.id, "inactivity window expired");
                let _ = reg.end(&entry.id, EndReason::Timeout);
                return;
            }
            // Activity arrived while we slept — loop re-arms on the new stamp.
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(idle_ms: u64, duration_s: u64) -> SessionConfig {
        SessionConfig {
            idle_timeout_ms: idle_ms,
            duration_s,
            sweep_interval_ms: 1_000,
        }
    }

    fn registry(idle_ms: u64, duration_s: u64) -> (Arc<SessionRegistry>, Arc<RoomRouter>) {
        let router = Arc::new(RoomRouter::new());
        router.create(docent_core::config::OPERATOR_ROOM);
        let reg = SessionRegistry::new(router.clone(), &test_config(idle_ms, duration_s));
        (reg, router)
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_lookup() {
        let (reg, router) = registry(10_000, 300);
        let entry = reg.create("kiosk-1");
        let snap = reg.lookup(&entry.id).unwrap();
        assert_eq!(snap.state, SessionState::Active);
        assert_eq!(snap.kiosk_id, "kiosk-1");
        assert!(router.subscribe(&entry.room_id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_ends_session_and_releases_room() {
        let (reg, router) = registry(5_000, 300);
        let mut events = reg.subscribe_events();
        let entry = reg.create("kiosk-1");

        tokio::time::sleep(Duration::from_millis(5_200)).await;

        let snap = reg.lookup(&entry.id).unwrap();
        assert_eq!(snap.state, SessionState::Ended);
        assert_eq!(snap.end_reason, Some(EndReason::Timeout));
        // Room gone: further sends fail.
        assert!(router.send(&entry.room_id, &ControlMessage::EndChat).is_err());

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::Ended { session_id, reason } => {
                    assert_eq!(session_id, entry.id);
                    assert_eq!(reason, EndReason::Timeout);
                    break;
                }
                SessionEvent::Tick { .. } => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_the_idle_window() {
        let (reg, _router) = registry(5_000, 300);
        let entry = reg.create("kiosk-1");

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        reg.refresh(&entry.id);
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(entry.is_active());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!entry.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn end_is_idempotent() {
        let (reg, _router) = registry(60_000, 300);
        let entry = reg.create("kiosk-1");
        assert!(reg.end(&entry.id, EndReason::Manual).unwrap());
        assert!(!reg.end(&entry.id, EndReason::Manual).unwrap());
        assert!(matches!(
            reg.end("missing", EndReason::Manual),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_after_end_is_a_noop() {
        let (reg, _router) = registry(60_000, 300);
        let entry = reg.create("kiosk-1");
        reg.end(&entry.id, EndReason::Manual).unwrap();
        let before = reg.lookup(&entry.id).unwrap().last_activity;
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        reg.refresh(&entry.id);
        assert_eq!(reg.lookup(&entry.id).unwrap().last_activity, before);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_duration_expiry_via_tick() {
        let (reg, _router) = registry(600_000, 3);
        let entry = reg.create("kiosk-1");

        reg.tick();
        assert!(entry.is_active());

        tokio::time::sleep(Duration::from_secs(4)).await;
        reg.tick();
        let snap = reg.lookup(&entry.id).unwrap();
        assert_eq!(snap.end_reason, Some(EndReason::Duration));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_sessions_inside_the_grace_period() {
        let (reg, _router) = registry(600_000, 300);
        let entry = reg.create("kiosk-1");
        reg.end(&entry.id, EndReason::Manual).unwrap();

        // Within the grace period the record is still queryable.
        reg.sweep();
        assert!(reg.lookup(&entry.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_track_lifecycle() {
        let (reg, _router) = registry(600_000, 300);
        let a = reg.create("kiosk-1");
        let _b = reg.create("kiosk-2");
        assert_eq!(reg.active_count(), 2);
        assert_eq!(reg.total_count(), 2);

        reg.end(&a.id, EndReason::Manual).unwrap();
        assert_eq!(reg.active_count(), 1);
        assert_eq!(reg.total_count(), 2);
    }
}
