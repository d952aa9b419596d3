use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Result, TtsError};
use crate::synth::{SynthAudio, Synthesizer};

/// Tries synthesiser tiers in declared order until one succeeds.
///
/// Which tier served a request is logged for observability; callers see only
/// the opaque audio artifact.
pub struct TieredSynthesizer {
    tiers: Vec<Box<dyn Synthesizer>>,
}

impl TieredSynthesizer {
    pub fn new(tiers: Vec<Box<dyn Synthesizer>>) -> Self {
        Self { tiers }
    }
}

#[async_trait]
impl Synthesizer for TieredSynthesizer {
    fn name(&self) -> &str {
        "tiered"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthAudio> {
        for tier in &self.tiers {
            match tier.synthesize(text).await {
                Ok(audio) => {
                    info!(tier = tier.name(), bytes = audio.bytes.len(), "synthesis served");
                    return Ok(audio);
                }
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "synthesiser tier failed, trying next");
                }
            }
        }
        Err(TtsError::AllTiersFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailTier;

    #[async_trait]
    impl Synthesizer for FailTier {
        fn name(&self) -> &str {
            "fail"
        }
        async fn synthesize(&self, _text: &str) -> Result<SynthAudio> {
            Err(TtsError::Api {
                status: 503,
                message: "down".into(),
            })
        }
    }

    struct OkTier;

    #[async_trait]
    impl Synthesizer for OkTier {
        fn name(&self) -> &str {
            "ok"
        }
        async fn synthesize(&self, _text: &str) -> Result<SynthAudio> {
            Ok(SynthAudio {
                bytes: vec![1, 2, 3],
                content_type: "audio/mpeg".into(),
            })
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_tier() {
        let tiered = TieredSynthesizer::new(vec![Box::new(FailTier), Box::new(OkTier)]);
        let audio = tiered.synthesize("hello").await.unwrap();
        assert_eq!(audio.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_tiers_down_is_an_error() {
        let tiered = TieredSynthesizer::new(vec![Box::new(FailTier), Box::new(FailTier)]);
        assert!(matches!(
            tiered.synthesize("hello").await,
            Err(TtsError::AllTiersFailed)
        ));
    }
}
