//! Inference adapters (C3): uniform call contracts over the ASR, LLM,
//! TTS, and lip-sync engines. Engine internals are out of scope; each
//! adapter here is a narrow `async_trait` capability interface plus a
//! deterministic in-process stub implementation, mirroring the one
//! struct-per-engine shape used for speech engines elsewhere in this
//! codebase (e.g. a single `ParakeetStt`-style struct per capability),
//! but expressed as a trait so a stub and a real network-backed engine
//! both satisfy the same contract.

pub mod asr;
pub mod fallback;
pub mod lipsync;
pub mod llm;
pub mod tts;

pub use asr::{AsrAdapter, AsrOutput, StubAsrAdapter};
pub use lipsync::{LipSyncAdapter, LipSyncOptions, LipSyncOutput, StubLipSyncAdapter};
pub use llm::{DialogueRole, FallbackLlmAdapter, HistoryEntry, LlmAdapter, LlmOutput, StubLlmAdapter};
pub use tts::{StubTtsAdapter, TtsAdapter, TtsOutput};

/// The bundle of adapters a Turn is driven through. Held as trait objects
/// so configuration can select stub or real implementations uniformly.
pub struct AdapterSet {
    pub asr: Box<dyn AsrAdapter>,
    pub llm: Box<dyn LlmAdapter>,
    pub tts: Box<dyn TtsAdapter>,
    pub lipsync: Box<dyn LipSyncAdapter>,
}

impl AdapterSet {
    /// Builds a set of deterministic in-process stub adapters, suitable for
    /// tests and for driving the pipeline without GPU or network
    /// dependencies.
    #[must_use]
    pub fn stubs(config: &crate::config::LlmConfig) -> Self {
        Self {
            asr: Box::new(StubAsrAdapter),
            llm: Box::new(FallbackLlmAdapter::new(
                vec![Box::new(StubLlmAdapter)],
                config.clone(),
            )),
            tts: Box::new(StubTtsAdapter::default()),
            lipsync: Box::new(StubLipSyncAdapter),
        }
    }
}
