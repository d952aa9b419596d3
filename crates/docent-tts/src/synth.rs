use std::io::Cursor;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, TtsError};

/// Placeholder tone parameters. 22.05 kHz mono keeps the artifact small while
/// still decoding everywhere.
const SINE_SAMPLE_RATE: u32 = 22_050;
const SINE_FREQ_HZ: f32 = 440.0;
/// Rough speaking pace used to size the placeholder clip.
const MS_PER_WORD: u64 = 400;

/// Opaque audio artifact returned by a synthesiser tier.
#[derive(Debug, Clone)]
pub struct SynthAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A replaceable synthesis adapter. Tiers share this interface so the
/// fallback chain can treat cloud voices and the local placeholder alike.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Tier name for logging.
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<SynthAudio>;
}

/// Cloud voice tier — POST /synthesize on a configured base URL.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    label: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        &self.label
    }

    async fn synthesize(&self, text: &str) -> Result<SynthAudio> {
        let url = format!("{}/synthesize", self.base_url);
        debug!(tier = %self.label, chars = text.len(), "requesting synthesis");

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(tier = %self.label, status, "synthesiser returned error");
            return Err(TtsError::Api { status, message });
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();

        Ok(SynthAudio {
            bytes,
            content_type,
        })
    }
}

/// Last-resort tier: a constant sine tone sized to the text, as a real WAV.
/// Lets the kiosk keep its timeline anchor even with every voice down.
pub struct SineSynthesizer;

#[async_trait]
impl Synthesizer for SineSynthesizer {
    fn name(&self) -> &str {
        "sine-placeholder"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthAudio> {
        let words = text.split_whitespace().count().max(1) as u64;
        let duration_ms = (words * MS_PER_WORD).clamp(500, 15_000);
        let bytes = sine_wav(duration_ms)?;
        Ok(SynthAudio {
            bytes,
            content_type: "audio/wav".to_string(),
        })
    }
}

fn sine_wav(duration_ms: u64) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SINE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| TtsError::Encode(e.to_string()))?;
        let samples = SINE_SAMPLE_RATE as u64 * duration_ms / 1_000;
        for n in 0..samples {
            let t = n as f32 / SINE_SAMPLE_RATE as f32;
            let amp = (t * SINE_FREQ_HZ * 2.0 * std::f32::consts::PI).sin();
            writer
                .write_sample((amp * i16::MAX as f32 * 0.2) as i16)
                .map_err(|e| TtsError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| TtsError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sine_placeholder_emits_valid_wav() {
        let audio = SineSynthesizer.synthesize("hello there kiosk").await.unwrap();
        assert_eq!(audio.content_type, "audio/wav");

        let reader = hound::WavReader::new(Cursor::new(&audio.bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SINE_SAMPLE_RATE);
        assert!(reader.duration() > 0);
    }

    #[tokio::test]
    async fn sine_duration_tracks_word_count() {
        let short = SineSynthesizer.synthesize("hi").await.unwrap();
        let long = SineSynthesizer
            .synthesize("one two three four five six seven eight")
            .await
            .unwrap();
        assert!(long.bytes.len() > short.bytes.len());
    }
}
