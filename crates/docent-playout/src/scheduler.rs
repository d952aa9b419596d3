use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use docent_core::config::PlayoutConfig;
use docent_rooms::ControlMessage;

use crate::clock::ClockSync;
use crate::crossfade::Crossfader;
use crate::fetch::{ImageFetcher, ImageHandle};

/// Client-side playout scheduler.
///
/// Translates server-timeline `playout_ts` instants into local timers via
/// the one-shot clock offset, keeps the preload store ahead of show time,
/// and drives the two-buffer crossfade at the target instant. Owned by the
/// client session; `reset` releases every timer and image handle before the
/// session itself is dropped.
pub struct PlayoutScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    clock: Mutex<ClockSync>,
    fetcher: Arc<dyn ImageFetcher>,
    fader: tokio::sync::Mutex<Crossfader>,
    fallback: ImageHandle,
    preloaded: Mutex<HashMap<String, Preloaded>>,
    pending: Mutex<HashMap<String, AbortHandle>>,
    tolerance_ms: i64,
}

struct Preloaded {
    handle: ImageHandle,
    expires_at_ms: i64,
}

impl PlayoutScheduler {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        fader: Crossfader,
        fallback: ImageHandle,
        config: &PlayoutConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock: Mutex::new(ClockSync::new()),
                fetcher,
                fader: tokio::sync::Mutex::new(fader),
                fallback,
                preloaded: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                tolerance_ms: config.late_show_tolerance_ms as i64,
            }),
        }
    }

    /// Dispatch one datachannel message.
    pub async fn handle_message(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::ImgPreload {
                id,
                cdn_url,
                playout_ts,
                ttl_ms,
            } => self.preload(&id, &cdn_url, playout_ts, ttl_ms).await,
            ControlMessage::ImgShow {
                id,
                playout_ts,
                duration_ms,
                ..
            } => self.schedule_show(&id, playout_ts, duration_ms),
            ControlMessage::EndOfStream { .. } => self.reset(),
            ControlMessage::EndChat => info!("conversation ended"),
            // Operator-facing; nothing to do on the kiosk surface.
            ControlMessage::SessionTick { .. } => {}
        }
    }

    /// Fetch and store an image ahead of its show instant. Idempotent per id
    /// within one session.
    pub async fn preload(&self, id: &str, cdn_url: &str, playout_ts: i64, ttl_ms: u64) {
        self.inner.clock.lock().unwrap().initialise(playout_ts);

        if self.inner.preloaded.lock().unwrap().contains_key(id) {
            debug!(id, "image already preloaded");
            return;
        }

        match self.inner.fetcher.fetch(cdn_url).await {
            Ok(handle) => {
                let expires_at_ms =
                    self.inner.clock.lock().unwrap().local_now_ms() + ttl_ms as i64;
                self.inner.preloaded.lock().unwrap().insert(
                    id.to_string(),
                    Preloaded {
                        handle,
                        expires_at_ms,
                    },
                );
                debug!(id, "image preloaded");
            }
            // The id stays unregistered; a later show falls back.
            Err(e) => error!(id, url = cdn_url, error = %e, "image preload failed"),
        }
    }

    /// Convert the show instant to local time and arm (or fire, or drop).
    pub fn schedule_show(&self, id: &str, playout_ts: i64, duration_ms: u64) {
        let (local_ts, now) = {
            let mut clock = self.inner.clock.lock().unwrap();
            clock.initialise(playout_ts);
            let now = clock.local_now_ms();
            (clock.convert(playout_ts).unwrap_or(now), now)
        };
        let delay = local_ts - now;

        if delay > 0 {
            let inner = self.inner.clone();
            let id_owned = id.to_string();
            let task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                inner.pending.lock().unwrap().remove(&id_owned);
                inner.render(&id_owned, duration_ms).await;
            });
            self.inner
                .pending
                .lock()
                .unwrap()
                .insert(id.to_string(), task.abort_handle());
        } else if delay >= -self.inner.tolerance_ms {
            warn!(id, delay_ms = delay, "late show within tolerance, rendering now");
            let inner = self.inner.clone();
            let id_owned = id.to_string();
            tokio::spawn(async move {
                inner.render(&id_owned, duration_ms).await;
            });
        } else {
            warn!(id, delay_ms = delay, "show too late, dropped");
        }
    }

    /// Clear the offset, cancel every pending timer, and empty both stores.
    /// Invoked on session end or explicit restart.
    pub fn reset(&self) {
        info!("playout scheduler reset");
        self.inner.clock.lock().unwrap().reset();
        for (_, task) in self.inner.pending.lock().unwrap().drain() {
            task.abort();
        }
        self.inner.preloaded.lock().unwrap().clear();
    }

    pub fn is_synced(&self) -> bool {
        self.inner.clock.lock().unwrap().is_initialised()
    }

    pub fn preloaded_count(&self) -> usize {
        self.inner.preloaded.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

impl Inner {
    /// Swap in the preloaded image, or the configured fallback when the id
    /// is unknown or its TTL has lapsed.
    async fn render(&self, id: &str, duration_ms: u64) {
        let now = self.clock.lock().unwrap().local_now_ms();
        let handle = {
            let preloaded = self.preloaded.lock().unwrap();
            match preloaded.get(id) {
                Some(p) if p.expires_at_ms > now => p.handle.clone(),
                Some(_) => {
                    warn!(id, "preloaded image expired, using fallback");
                    self.fallback.clone()
                }
                None => {
                    warn!(id, "image not preloaded, using fallback");
                    self.fallback.clone()
                }
            }
        };

        let mut fader = self.fader.lock().await;
        fader
            .crossfade(&handle, Duration::from_millis(duration_ms))
            .await;
    }
}
