use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::synth::Synthesizer;

/// Nominal MP3 bitrate used when estimating playback duration.
const MP3_NOMINAL_KBPS: u64 = 128;

/// A fully synthesised audio artifact plus the metadata needed for
/// playout-duration estimation.
#[derive(Debug)]
pub struct CachedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub duration_ms: u64,
}

/// Content-addressed audio store keyed by `SHA-256(text)`.
///
/// Identical text yields byte-identical audio at near-zero cost on the second
/// request. Concurrent requests for one key share a single in-flight
/// synthesis; there is no cache-wide lock, only per-key coordination.
pub struct TtsCache {
    dir: PathBuf,
    enabled: bool,
    synth: Arc<dyn Synthesizer>,
    inflight: DashMap<String, Arc<OnceCell<Arc<CachedAudio>>>>,
    synth_calls: AtomicU64,
}

impl TtsCache {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool, synth: Arc<dyn Synthesizer>) -> Result<Self> {
        let dir = dir.into();
        if enabled {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            enabled,
            synth,
            inflight: DashMap::new(),
            synth_calls: AtomicU64::new(0),
        })
    }

    /// Lowercase hex digest addressing the audio for `text`.
    pub fn cache_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Return cached audio, joining an in-flight synthesis when one exists,
    /// synthesising otherwise. All concurrent callers for one text receive
    /// the same `Arc`, so the bytes are identical by construction.
    pub async fn get_or_synth(&self, text: &str) -> Result<Arc<CachedAudio>> {
        let key = Self::cache_key(text);
        let cell = self.inflight.entry(key.clone()).or_default().clone();

        let audio = cell
            .get_or_try_init(|| self.load_or_synthesize(key.clone(), text))
            .await?;
        Ok(audio.clone())
    }

    /// Number of completed entries on disk.
    pub fn entry_count(&self) -> usize {
        if !self.enabled {
            return self.inflight.iter().filter(|e| e.value().get().is_some()).count();
        }
        std::fs::read_dir(&self.dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_none())
                    .count()
            })
            .unwrap_or(0)
    }

    /// How many times the underlying synthesiser has actually been invoked.
    pub fn synth_invocations(&self) -> u64 {
        self.synth_calls.load(Ordering::SeqCst)
    }

    async fn load_or_synthesize(&self, key: String, text: &str) -> Result<Arc<CachedAudio>> {
        if self.enabled {
            let path = self.dir.join(&key);
            if let Ok(bytes) = tokio::fs::read(&path).await {
                debug!(%key, bytes = bytes.len(), "tts cache hit (disk)");
                return Ok(Arc::new(cached_from_bytes(bytes)));
            }
        }

        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        let audio = self.synth.synthesize(text).await?;
        let duration_ms = estimate_duration_ms(&audio.bytes, &audio.content_type);
        info!(
            key = %key,
            bytes = audio.bytes.len(),
            duration_ms,
            "tts synthesis complete"
        );

        if self.enabled {
            // Atomic publish: stream to a temp name, rename on completion.
            // The single-flight guarantee means one writer per key, so the
            // temp name cannot collide with itself.
            let path = self.dir.join(&key);
            let tmp = self.dir.join(format!("{key}.tmp"));
            if let Err(e) = write_atomic(&tmp, &path, &audio.bytes).await {
                warn!(%key, error = %e, "tts cache write failed, serving uncached");
            }
        }

        Ok(Arc::new(CachedAudio {
            bytes: audio.bytes,
            content_type: audio.content_type,
            duration_ms,
        }))
    }
}

async fn write_atomic(tmp: &PathBuf, path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(tmp, bytes).await?;
    tokio::fs::rename(tmp, path).await
}

fn cached_from_bytes(bytes: Vec<u8>) -> CachedAudio {
    let content_type = detect_content_type(&bytes).to_string();
    let duration_ms = estimate_duration_ms(&bytes, &content_type);
    CachedAudio {
        bytes,
        content_type,
        duration_ms,
    }
}

/// Sniff the byte format so disk entries need no sidecar metadata.
fn detect_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"RIFF") {
        "audio/wav"
    } else {
        "audio/mpeg"
    }
}

/// Nominal playback duration. WAV is probed exactly from its header; MP3 is
/// estimated from a nominal bitrate, which is plenty for scheduling the
/// end-of-speech marker.
pub fn estimate_duration_ms(bytes: &[u8], content_type: &str) -> u64 {
    if content_type.contains("wav") {
        if let Ok(reader) = hound::WavReader::new(Cursor::new(bytes)) {
            let spec = reader.spec();
            if spec.sample_rate > 0 {
                return reader.duration() as u64 * 1_000 / spec.sample_rate as u64;
            }
        }
    }
    bytes.len() as u64 * 8 / MP3_NOMINAL_KBPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TtsError;
    use crate::synth::{SineSynthesizer, SynthAudio};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Counts invocations and is slow enough that concurrent callers overlap.
    struct CountingSynth {
        calls: AtomicU32,
        fail_first: bool,
    }

    impl CountingSynth {
        fn new(fail_first: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl Synthesizer for CountingSynth {
        fn name(&self) -> &str {
            "counting"
        }

        async fn synthesize(&self, text: &str) -> Result<SynthAudio> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && call == 0 {
                return Err(TtsError::Api {
                    status: 503,
                    message: "transient".into(),
                });
            }
            Ok(SynthAudio {
                bytes: format!("audio:{text}").into_bytes(),
                content_type: "audio/mpeg".into(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(CountingSynth::new(false));
        let cache = Arc::new(TtsCache::new(dir.path(), true, synth.clone()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            handles.push(tokio::spawn(
                async move { cache.get_or_synth("welcome to the museum").await },
            ));
        }

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap().unwrap());
        }

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        for pair in outputs.windows(2) {
            assert_eq!(pair[0].bytes, pair[1].bytes);
        }
    }

    #[tokio::test]
    async fn disk_entry_survives_a_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache =
                TtsCache::new(dir.path(), true, Arc::new(CountingSynth::new(false))).unwrap();
            cache.get_or_synth("hello").await.unwrap();
            assert_eq!(cache.entry_count(), 1);
        }

        let synth = Arc::new(CountingSynth::new(false));
        let cache = TtsCache::new(dir.path(), true, synth.clone()).unwrap();
        let audio = cache.get_or_synth("hello").await.unwrap();
        assert_eq!(audio.bytes, b"audio:hello");
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_synthesis_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(CountingSynth::new(true));
        let cache = TtsCache::new(dir.path(), true, synth.clone()).unwrap();

        assert!(cache.get_or_synth("flaky").await.is_err());
        let audio = cache.get_or_synth("flaky").await.unwrap();
        assert_eq!(audio.bytes, b"audio:flaky");
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wav_duration_is_probed_from_header() {
        let audio = SineSynthesizer.synthesize("one two three").await.unwrap();
        let ms = estimate_duration_ms(&audio.bytes, &audio.content_type);
        // Three words at the placeholder pace.
        assert!((1_000..=1_400).contains(&ms), "unexpected duration {ms}");
    }

    #[test]
    fn keys_are_lowercase_hex_and_distinct() {
        let a = TtsCache::cache_key("a");
        let b = TtsCache::cache_key("b");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
