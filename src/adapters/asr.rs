//! ASR adapter (§4.3): `transcribe(audio_bytes, language_hint?) →
//! {text, detected_language, confidence}`.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;

/// Result of an ASR transcription call.
#[derive(Debug, Clone)]
pub struct AsrOutput {
    pub text: String,
    pub detected_language: String,
    pub confidence: f32,
}

/// Uniform façade over a speech-recognition engine. Implementations fail
/// with [`GatewayError::InvalidInput`] for unsupported formats,
/// [`GatewayError::AdapterFailure`] for model errors, or
/// [`GatewayError::AdapterTimeout`] when the call exceeds its budget —
/// callers are expected to apply the timeout via `tokio::time::timeout`
/// around the trait call rather than inside the implementation.
#[async_trait]
pub trait AsrAdapter: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8], language_hint: Option<&str>) -> Result<AsrOutput>;
}

/// Deterministic in-process stub. Accepts any non-empty byte payload and
/// reports a fixed transcript length proportional to the input so tests
/// can exercise the downstream chunker/pipeline without a real ASR engine.
#[derive(Debug, Default)]
pub struct StubAsrAdapter;

#[async_trait]
impl AsrAdapter for StubAsrAdapter {
    async fn transcribe(&self, audio_bytes: &[u8], language_hint: Option<&str>) -> Result<AsrOutput> {
        if audio_bytes.is_empty() {
            return Err(GatewayError::InvalidInput(
                "audio upload was empty".to_owned(),
            ));
        }
        Ok(AsrOutput {
            text: "Say something.".to_owned(),
            detected_language: language_hint.unwrap_or("en").to_owned(),
            confidence: 0.95,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_audio_is_invalid_input() {
        let adapter = StubAsrAdapter;
        let result = adapter.transcribe(&[], None).await;
        assert!(matches!(result, Err(GatewayError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn language_hint_is_echoed_when_present() {
        let adapter = StubAsrAdapter;
        let out = adapter.transcribe(b"audio", Some("fr")).await.unwrap();
        assert_eq!(out.detected_language, "fr");
    }

    #[tokio::test]
    async fn default_language_is_en() {
        let adapter = StubAsrAdapter;
        let out = adapter.transcribe(b"audio", None).await.unwrap();
        assert_eq!(out.detected_language, "en");
    }
}
