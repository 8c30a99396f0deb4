//! Text-to-speech seam for the voice endpoint.

use anyhow::{bail, Result};
use async_trait::async_trait;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Audio container of the bytes returned by [`synthesize`](Self::synthesize), e.g. `"mp3"`.
    fn audio_format(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Used when no synthesizer is configured; every request fails.
pub struct UnavailableSpeech;

#[async_trait]
impl SpeechSynthesizer for UnavailableSpeech {
    fn audio_format(&self) -> &str {
        "mp3"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        bail!("speech synthesis is not configured")
    }
}
