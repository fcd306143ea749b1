//! Turn pipeline (C4, §4.4): drives one conversational Turn end to end —
//! ASR, LLM (with recoverable fallback), chunking, then a strictly
//! sequential per-chunk TTS → store → lip-sync → store loop — emitting an
//! SSE event after each externally observable milestone.

pub mod history;

use crate::adapters::AdapterSet;
use crate::chunker::TextChunker;
use crate::config::{LlmConfig, PipelineConfig};
use crate::error::{GatewayError, Result};
use crate::sse::{CompletePayload, ErrorPayload, LlmResponsePayload, SseWriter, TranscriptionPayload, VideoChunkPayload};
use crate::store::{ArtifactKind, AssetStore};
use history::DialogueHistory;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Everything one Turn needs that isn't specific to the request: the
/// adapter bundle, durable storage, the chunker, dialogue history, and
/// tuning knobs. Cheap to clone; every field is itself a cheap handle.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: std::sync::Arc<AssetStore>,
    pub chunker: std::sync::Arc<TextChunker>,
    pub history: DialogueHistory,
    pub pipeline_config: PipelineConfig,
    pub llm_config: LlmConfig,
}

/// The per-request inputs to one Turn, bundled so [`run_turn`] takes a
/// single borrow instead of a parameter per upload field.
pub struct TurnInput<'a> {
    pub user_audio: &'a [u8],
    pub language_hint: Option<&'a str>,
    pub portrait_ref: &'a [u8],
    pub voice_ref: &'a [u8],
}

/// Drives one Turn to completion, writing every milestone to `sse`.
///
/// Returns `Ok(())` once a terminal event (`complete`, an `error` event, or
/// early cancellation) has been emitted. Adapter failures other than an LLM
/// failure are terminal: an `error` event is emitted and the Turn ends
/// after the last successfully emitted chunk (§7).
///
/// # Errors
///
/// Returns an error only if the SSE channel itself cannot accept further
/// events (the client disconnected); adapter and storage failures are
/// reported as `error` events on the stream, not as a `Result::Err` here.
pub async fn run_turn(
    adapters: &AdapterSet,
    context: &PipelineContext,
    sse: &SseWriter,
    cancellation: &CancellationToken,
    input: &TurnInput<'_>,
) -> Result<()> {
    let TurnInput {
        user_audio,
        language_hint,
        portrait_ref,
        voice_ref,
    } = *input;
    let turn_start = Instant::now();

    if cancellation.is_cancelled() {
        tracing::info!(turn_id = %sse.turn_id(), "turn cancelled before transcription");
        return Ok(());
    }

    let asr_budget = context.pipeline_config.timeout_ms("asr", 30_000);
    let asr_start = Instant::now();
    let asr_out = match tokio::time::timeout(
        Duration::from_millis(asr_budget),
        adapters.asr.transcribe(user_audio, language_hint),
    )
    .await
    {
        Ok(Ok(out)) => out,
        Ok(Err(err)) => return emit_terminal_error(sse, &err).await,
        Err(_) => {
            let err = GatewayError::AdapterTimeout {
                stage: "asr",
                elapsed_ms: asr_start.elapsed().as_millis() as u64,
            };
            return emit_terminal_error(sse, &err).await;
        }
    };
    sse.emit(
        "transcription",
        TranscriptionPayload {
            text: asr_out.text.clone(),
            language: asr_out.detected_language.clone(),
            time: asr_start.elapsed().as_secs_f64(),
        },
    )
    .await?;

    if cancellation.is_cancelled() {
        tracing::info!(turn_id = %sse.turn_id(), "turn cancelled before llm response");
        return Ok(());
    }

    let history_snapshot = context.history.snapshot();
    let llm_budget = context.pipeline_config.timeout_ms("llm", 60_000);
    let response_text = match tokio::time::timeout(
        Duration::from_millis(llm_budget),
        adapters
            .llm
            .respond(&asr_out.text, &history_snapshot, ""),
    )
    .await
    {
        Ok(Ok(out)) => out.response_text,
        Ok(Err(err)) => {
            tracing::warn!(turn_id = %sse.turn_id(), error = %err, "llm adapter failed; substituting canned response");
            context.llm_config.fallback_response.clone()
        }
        Err(_) => {
            tracing::warn!(turn_id = %sse.turn_id(), "llm adapter timed out; substituting canned response");
            context.llm_config.fallback_response.clone()
        }
    };
    sse.emit(
        "llm_response",
        LlmResponsePayload {
            text: response_text.clone(),
        },
    )
    .await?;

    let fragments = context.chunker.split(&response_text);

    let tts_budget = context.pipeline_config.timeout_ms("tts", 30_000);
    let lipsync_budget = context.pipeline_config.timeout_ms("lipsync", 60_000);

    for (index, fragment) in fragments.iter().enumerate() {
        if cancellation.is_cancelled() {
            tracing::info!(turn_id = %sse.turn_id(), chunk_index = index, "turn cancelled mid-stream");
            return Ok(());
        }

        let chunk_start = Instant::now();

        let tts_out = match tokio::time::timeout(
            Duration::from_millis(tts_budget),
            adapters.tts.synthesize(fragment, voice_ref, &asr_out.detected_language),
        )
        .await
        {
            Ok(Ok(out)) => out,
            Ok(Err(err)) => return emit_terminal_error(sse, &err).await,
            Err(_) => {
                let err = GatewayError::AdapterTimeout {
                    stage: "tts",
                    elapsed_ms: chunk_start.elapsed().as_millis() as u64,
                };
                return emit_terminal_error(sse, &err).await;
            }
        };

        let audio_artifact = match context.store.put(&tts_out.audio_bytes, ArtifactKind::Audio).await {
            Ok(artifact) => artifact,
            Err(err) => return emit_terminal_error(sse, &err).await,
        };

        let lipsync_start = Instant::now();
        let lipsync_out = match tokio::time::timeout(
            Duration::from_millis(lipsync_budget),
            adapters
                .lipsync
                .animate(&tts_out.audio_bytes, portrait_ref, &Default::default()),
        )
        .await
        {
            Ok(Ok(out)) => out,
            Ok(Err(err)) => return emit_terminal_error(sse, &err).await,
            Err(_) => {
                let err = GatewayError::AdapterTimeout {
                    stage: "lipsync",
                    elapsed_ms: lipsync_start.elapsed().as_millis() as u64,
                };
                return emit_terminal_error(sse, &err).await;
            }
        };

        let video_artifact = match context.store.put(&lipsync_out.video_bytes, ArtifactKind::Video).await {
            Ok(artifact) => artifact,
            Err(err) => return emit_terminal_error(sse, &err).await,
        };
        if let Err(err) = context.store.confirm_stable(&video_artifact).await {
            return emit_terminal_error(sse, &err).await;
        }
        // audio is an intermediate artifact; only the video is served.
        let _ = audio_artifact;

        sse.emit(
            "video_chunk",
            VideoChunkPayload {
                chunk_index: index as u32,
                video_url: format!("/videos/{}", video_artifact.id),
                text_chunk: fragment.clone(),
                chunk_time: chunk_start.elapsed().as_secs_f64(),
                audio_duration_s: tts_out.duration_s,
                video_duration_s: lipsync_out.duration_s,
            },
        )
        .await?;
    }

    context.history.record_turn(&asr_out.text, &response_text);

    sse.emit(
        "complete",
        CompletePayload {
            total_time: turn_start.elapsed().as_secs_f64(),
            chunk_count: fragments.len() as u32,
        },
    )
    .await?;
    sse.close();
    Ok(())
}

async fn emit_terminal_error(sse: &SseWriter, err: &GatewayError) -> Result<()> {
    tracing::warn!(turn_id = %sse.turn_id(), error = %err, kind = err.wire_kind(), "turn aborted");
    let result = sse
        .emit(
            "error",
            ErrorPayload {
                error: err.to_string(),
                kind: err.wire_kind(),
            },
        )
        .await;
    sse.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        LipSyncAdapter, LipSyncOptions, LipSyncOutput, StubAsrAdapter, StubLlmAdapter, StubTtsAdapter,
    };
    use crate::config::{AssetStoreConfig, ChunkerConfig};
    use async_trait::async_trait;

    fn stub_adapters() -> AdapterSet {
        AdapterSet::stubs(&LlmConfig {
            retry_attempts: 1,
            retry_backoff_ms: 0,
            ..LlmConfig::default()
        })
    }

    fn context() -> (PipelineContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(&AssetStoreConfig {
            root_dir: dir.path().to_path_buf(),
            stable_size_poll_ms: 5,
            stable_size_budget_ms: 200,
            stable_size_read_budget_ms: 50,
        })
        .unwrap();
        let context = PipelineContext {
            store: std::sync::Arc::new(store),
            chunker: std::sync::Arc::new(TextChunker::new(ChunkerConfig::default())),
            history: DialogueHistory::new(),
            pipeline_config: PipelineConfig::default(),
            llm_config: LlmConfig {
                retry_attempts: 1,
                retry_backoff_ms: 0,
                ..LlmConfig::default()
            },
        };
        (context, dir)
    }

    #[tokio::test]
    async fn happy_path_emits_transcription_response_chunks_and_complete() {
        let adapters = stub_adapters();
        let (context, _dir) = context();
        let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
        let cancellation = CancellationToken::new();

        run_turn(
            &adapters,
            &context,
            &sse,
            &cancellation,
            &TurnInput {
                user_audio: b"audio",
                language_hint: None,
                portrait_ref: b"portrait",
                voice_ref: b"voice",
            },
        )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            kinds.push(frame.kind);
        }
        assert!(kinds.contains(&"transcription"));
        assert!(kinds.contains(&"llm_response"));
        assert!(kinds.contains(&"video_chunk"));
        assert_eq!(kinds.last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn completed_turn_records_history() {
        let adapters = stub_adapters();
        let (context, _dir) = context();
        let (sse, _rx) = SseWriter::open(uuid::Uuid::new_v4());
        let cancellation = CancellationToken::new();

        run_turn(
            &adapters,
            &context,
            &sse,
            &cancellation,
            &TurnInput {
                user_audio: b"audio",
                language_hint: None,
                portrait_ref: b"portrait",
                voice_ref: b"voice",
            },
        )
            .await
            .unwrap();

        assert_eq!(context.history.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn empty_audio_emits_error_event_not_a_rust_error() {
        let adapters = stub_adapters();
        let (context, _dir) = context();
        let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
        let cancellation = CancellationToken::new();

        run_turn(
            &adapters,
            &context,
            &sse,
            &cancellation,
            &TurnInput {
                user_audio: b"",
                language_hint: None,
                portrait_ref: b"portrait",
                voice_ref: b"voice",
            },
        )
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.kind, "error");
        assert!(context.history.snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancellation_before_start_emits_nothing() {
        let adapters = stub_adapters();
        let (context, _dir) = context();
        let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        run_turn(
            &adapters,
            &context,
            &sse,
            &cancellation,
            &TurnInput {
                user_audio: b"audio",
                language_hint: None,
                portrait_ref: b"portrait",
                voice_ref: b"voice",
            },
        )
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    struct FailingLipSync;

    #[async_trait]
    impl LipSyncAdapter for FailingLipSync {
        async fn animate(
            &self,
            _audio_bytes: &[u8],
            _portrait_image: &[u8],
            _options: &LipSyncOptions,
        ) -> Result<LipSyncOutput> {
            Err(GatewayError::AdapterFailure {
                stage: "lipsync",
                message: "simulated failure".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn lipsync_failure_aborts_turn_with_error_event() {
        let adapters = AdapterSet {
            asr: Box::new(StubAsrAdapter),
            llm: Box::new(StubLlmAdapter),
            tts: Box::new(StubTtsAdapter::default()),
            lipsync: Box::new(FailingLipSync),
        };
        let (context, _dir) = context();
        let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
        let cancellation = CancellationToken::new();

        run_turn(
            &adapters,
            &context,
            &sse,
            &cancellation,
            &TurnInput {
                user_audio: b"audio",
                language_hint: None,
                portrait_ref: b"portrait",
                voice_ref: b"voice",
            },
        )
            .await
            .unwrap();

        let mut saw_error = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.kind == "error" {
                saw_error = true;
            }
            assert_ne!(frame.kind, "complete");
        }
        assert!(saw_error);
    }
}
