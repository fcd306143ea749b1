//! TTS adapter (§4.3): `synthesize(text, speaker_reference, language) →
//! {audio_bytes, sample_rate, duration_s}`.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;

/// Result of a TTS synthesis call.
#[derive(Debug, Clone)]
pub struct TtsOutput {
    pub audio_bytes: Vec<u8>,
    pub sample_rate: u32,
    pub duration_s: f64,
}

/// Uniform façade over a text-to-speech engine. Must accept a short
/// reference audio sample for voice cloning.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        speaker_reference: &[u8],
        language: &str,
    ) -> Result<TtsOutput>;
}

/// Deterministic in-process stub. Produces a fixed-rate silent WAV body
/// whose declared duration scales with input text length, so downstream
/// lip-sync and asset-store stages have a plausible artifact to work with.
#[derive(Debug)]
pub struct StubTtsAdapter {
    sample_rate: u32,
}

impl Default for StubTtsAdapter {
    fn default() -> Self {
        Self { sample_rate: 24_000 }
    }
}

#[async_trait]
impl TtsAdapter for StubTtsAdapter {
    async fn synthesize(
        &self,
        text: &str,
        _speaker_reference: &[u8],
        _language: &str,
    ) -> Result<TtsOutput> {
        if text.is_empty() {
            return Err(GatewayError::InvalidInput(
                "cannot synthesize empty text".to_owned(),
            ));
        }
        // ~12 characters per second of reference-deployment speech.
        let duration_s = (text.chars().count() as f64 / 12.0).max(0.3);
        let sample_count = (duration_s * f64::from(self.sample_rate)) as usize;
        let audio_bytes = vec![0u8; sample_count.saturating_mul(2)];
        Ok(TtsOutput {
            audio_bytes,
            sample_rate: self.sample_rate,
            duration_s,
        })
    }
}
