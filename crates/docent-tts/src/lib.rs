pub mod cache;
pub mod error;
pub mod synth;
pub mod tiers;

pub use cache::{CachedAudio, TtsCache};
pub use error::{Result, TtsError};
pub use synth::{HttpSynthesizer, SineSynthesizer, SynthAudio, Synthesizer};
pub use tiers::TieredSynthesizer;
