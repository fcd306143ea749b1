//! End-to-end scenarios for the Turn pipeline (§8: S4, S5, S6 plus the
//! chunk-index-density and artifact-readiness invariants), driven directly
//! through `run_turn` with purpose-built adapters standing in for a failing
//! or slow inference engine.

use async_trait::async_trait;
use avatar_gateway::adapters::{
    AdapterSet, FallbackLlmAdapter, HistoryEntry, LipSyncAdapter, LipSyncOptions,
    LipSyncOutput, LlmAdapter, LlmOutput, StubAsrAdapter, StubLipSyncAdapter, StubLlmAdapter,
    StubTtsAdapter,
};
use avatar_gateway::config::{AssetStoreConfig, ChunkerConfig, LlmConfig, PipelineConfig};
use avatar_gateway::pipeline::history::DialogueHistory;
use avatar_gateway::pipeline::{run_turn, PipelineContext, TurnInput};
use avatar_gateway::sse::SseWriter;
use avatar_gateway::store::AssetStore;
use avatar_gateway::{GatewayError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn long_paragraph() -> &'static str {
    "Hi there. How are you doing on this fine afternoon. \
     I wanted to let you know that everything is proceeding smoothly. \
     The weather report says it will rain later today. \
     Please remember to bring an umbrella when you leave the building."
}

fn context_with(llm: impl LlmAdapter + 'static) -> (AdapterSet, PipelineContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::new(&AssetStoreConfig {
        root_dir: dir.path().to_path_buf(),
        stable_size_poll_ms: 5,
        stable_size_budget_ms: 200,
        stable_size_read_budget_ms: 50,
    })
    .unwrap();
    let context = PipelineContext {
        store: Arc::new(store),
        chunker: Arc::new(avatar_gateway::chunker::TextChunker::new(ChunkerConfig::default())),
        history: DialogueHistory::new(),
        pipeline_config: PipelineConfig::default(),
        llm_config: LlmConfig {
            retry_attempts: 1,
            retry_backoff_ms: 0,
            ..LlmConfig::default()
        },
    };
    let adapters = AdapterSet {
        asr: Box::new(StubAsrAdapter),
        llm: Box::new(llm),
        tts: Box::new(StubTtsAdapter::default()),
        lipsync: Box::new(StubLipSyncAdapter),
    };
    (adapters, context, dir)
}

fn turn_input<'a>(audio: &'a [u8]) -> TurnInput<'a> {
    TurnInput {
        user_audio: audio,
        language_hint: None,
        portrait_ref: b"portrait",
        voice_ref: b"voice",
    }
}

fn extract_seqs(data: &str) -> u64 {
    let marker = "\"seq\":";
    let start = data.find(marker).unwrap() + marker.len();
    let end = data[start..].find(',').map(|i| i + start).unwrap();
    data[start..end].parse().unwrap()
}

fn extract_u32(data: &str, field: &str) -> u32 {
    let marker = format!("\"{field}\":");
    let start = data.find(&marker).unwrap() + marker.len();
    let rest = &data[start..];
    let end = rest.find([',', '}']).unwrap();
    rest[..end].parse().unwrap()
}

struct LongTextLlm;

#[async_trait]
impl LlmAdapter for LongTextLlm {
    async fn respond(&self, _user_text: &str, _history: &[HistoryEntry], _system_prompt: &str) -> Result<LlmOutput> {
        Ok(LlmOutput {
            response_text: long_paragraph().to_owned(),
        })
    }
}

struct FailingLlm;

#[async_trait]
impl LlmAdapter for FailingLlm {
    async fn respond(&self, _user_text: &str, _history: &[HistoryEntry], _system_prompt: &str) -> Result<LlmOutput> {
        Err(GatewayError::AdapterFailure {
            stage: "llm",
            message: "provider unreachable".to_owned(),
        })
    }
}

struct FailOnNthLipSync {
    fail_at: u32,
    calls: AtomicU32,
}

#[async_trait]
impl LipSyncAdapter for FailOnNthLipSync {
    async fn animate(&self, audio_bytes: &[u8], portrait_image: &[u8], options: &LipSyncOptions) -> Result<LipSyncOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_at {
            return Err(GatewayError::AdapterFailure {
                stage: "lipsync",
                message: "simulated failure at chunk".to_owned(),
            });
        }
        StubLipSyncAdapter.animate(audio_bytes, portrait_image, options).await
    }
}

/// S1/S7: a short two-sentence reply fits in few chunks, dense seq, and
/// `complete` is the terminal event.
#[tokio::test]
async fn s1_short_reply_emits_dense_seq_and_terminates_with_complete() {
    let (adapters, context, _dir) = context_with(StubLlmAdapter);
    let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
    let cancellation = CancellationToken::new();

    run_turn(&adapters, &context, &sse, &cancellation, &turn_input(b"Say something."))
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    assert!(!frames.is_empty());
    for (expected, frame) in frames.iter().enumerate() {
        assert_eq!(extract_seqs(&frame.data), expected as u64);
    }
    assert_eq!(frames.last().unwrap().kind, "complete");
}

/// S2/invariant 7: a long multi-sentence reply yields a dense,
/// zero-based `chunk_index` sequence across its `video_chunk` events.
#[tokio::test]
async fn chunk_index_is_dense_for_a_multi_chunk_reply() {
    let (adapters, context, _dir) = context_with(LongTextLlm);
    let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
    let cancellation = CancellationToken::new();

    run_turn(&adapters, &context, &sse, &cancellation, &turn_input(b"tell me about your day"))
        .await
        .unwrap();

    let mut chunk_indices = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if frame.kind == "video_chunk" {
            chunk_indices.push(extract_u32(&frame.data, "chunk_index"));
        }
    }
    assert!(chunk_indices.len() > 1, "expected multiple chunks from a long reply");
    let expected: Vec<u32> = (0..chunk_indices.len() as u32).collect();
    assert_eq!(chunk_indices, expected);
}

/// S5: an LLM adapter failure is recovered locally via the fallback
/// response; transcription, llm_response, chunks, and complete all still
/// fire.
#[tokio::test]
async fn s5_llm_failure_recovers_via_fallback_response_and_completes() {
    let (mut adapters, context, _dir) = context_with(FailingLlm);
    adapters.llm = Box::new(FallbackLlmAdapter::new(
        vec![Box::new(FailingLlm)],
        context.llm_config.clone(),
    ));
    let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
    let cancellation = CancellationToken::new();

    run_turn(&adapters, &context, &sse, &cancellation, &turn_input(b"audio"))
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

/// S6: a lip-sync failure partway through a multi-chunk reply emits the
/// successful chunks before it, then a terminal `error` event with no
/// further chunks and no `complete`.
#[tokio::test]
async fn s6_lipsync_failure_mid_stream_stops_after_last_good_chunk() {
    let (mut adapters, context, _dir) = context_with(LongTextLlm);
    adapters.lipsync = Box::new(FailOnNthLipSync {
        fail_at: 2,
        calls: AtomicU32::new(0),
    });
    let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
    let cancellation = CancellationToken::new();

    run_turn(&adapters, &context, &sse, &cancellation, &turn_input(b"audio"))
        .await
        .unwrap();

    let mut video_chunks = 0;
    let mut saw_error = false;
    let mut saw_complete = false;
    while let Ok(frame) = rx.try_recv() {
        match frame.kind {
            "video_chunk" => video_chunks += 1,
            "error" => saw_error = true,
            "complete" => saw_complete = true,
            _ => {}
        }
    }
    assert_eq!(video_chunks, 2, "chunks 0 and 1 should have succeeded before the failure at call index 2");
    assert!(saw_error);
    assert!(!saw_complete);
}

/// Invariant 8 (artifact readiness): once a `video_chunk` event has been
/// emitted, its artifact is immediately retrievable in full through the
/// store's own stability check — never a truncated read.
#[tokio::test]
async fn artifact_is_fully_readable_as_soon_as_its_chunk_event_fires() {
    let (adapters, context, _dir) = context_with(StubLlmAdapter);
    let (sse, mut rx) = SseWriter::open(uuid::Uuid::new_v4());
    let cancellation = CancellationToken::new();

    run_turn(&adapters, &context, &sse, &cancellation, &turn_input(b"Say something."))
        .await
        .unwrap();

    let mut saw_chunk = false;
    while let Ok(frame) = rx.try_recv() {
        if frame.kind != "video_chunk" {
            continue;
        }
        saw_chunk = true;
        let marker = "\"video_url\":\"";
        let start = frame.data.find(marker).unwrap() + marker.len();
        let rest = &frame.data[start..];
        let end = rest.find('"').unwrap();
        let video_url = &rest[..end];
        let artifact_id_str = video_url.rsplit('/').next().unwrap();
        let artifact_id: uuid::Uuid = artifact_id_str.parse().unwrap();

        let artifact = context.store.get(artifact_id).expect("artifact must exist");
        context.store.confirm_stable(&artifact).await.expect("artifact must already be stable");
    }
    assert!(saw_chunk);
}
