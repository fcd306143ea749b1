//! SSE dispatcher (C5, §4.5): serializes pipeline events onto one response
//! body with strict per-session ordering, timestamping, and flush
//! guarantees. Grounded on the versioned event-envelope pattern used for
//! host-bridge events and on the `{turn_id, seq, event_kind, wall_time,
//! bytes_written}` instrumentation style from the host latency harness,
//! here driving `axum::response::sse::Event` production the way the LLM
//! completion server turns an internal channel into an SSE stream via
//! `async_stream`.

use crate::error::{GatewayError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One encoded SSE frame: an event kind and its already-serialized JSON
/// payload. Transport-agnostic so it can be turned into an
/// `axum::response::sse::Event` (or asserted on directly in tests)
/// without this module depending on axum's response types.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub kind: &'static str,
    pub data: String,
}

/// `transcription` event payload (§6.2).
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionPayload {
    pub text: String,
    pub language: String,
    pub time: f64,
}

/// `llm_response` event payload (§6.2).
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponsePayload {
    pub text: String,
}

/// `video_chunk` event payload (§6.2).
#[derive(Debug, Clone, Serialize)]
pub struct VideoChunkPayload {
    pub chunk_index: u32,
    pub video_url: String,
    pub text_chunk: String,
    pub chunk_time: f64,
    pub audio_duration_s: f64,
    pub video_duration_s: f64,
}

/// `complete` event payload (§6.2).
#[derive(Debug, Clone, Serialize)]
pub struct CompletePayload {
    pub total_time: f64,
    pub chunk_count: u32,
}

/// `error` event payload (§6.2, §7).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: &'static str,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    seq: u64,
    server_timestamp: f64,
    #[serde(flatten)]
    payload: T,
}

/// Binds one Turn's write side. Holds the session-local, strictly
/// monotonic sequence counter; never shared across tasks.
pub struct SseWriter {
    turn_id: Uuid,
    seq: AtomicU64,
    start: Instant,
    tx: mpsc::Sender<SseFrame>,
    closed: AtomicBool,
}

impl SseWriter {
    /// Opens a new session for `turn_id`, returning the writer and the
    /// receiving half of the channel the transport layer drains into an
    /// SSE response body.
    #[must_use]
    pub fn open(turn_id: Uuid) -> (Self, mpsc::Receiver<SseFrame>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Self {
                turn_id,
                seq: AtomicU64::new(0),
                start: Instant::now(),
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    #[must_use]
    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    /// Assigns the next `seq`, stamps `server_timestamp`, encodes the
    /// event in SSE wire format, and writes it to the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already [`close`](Self::close)d
    /// or if the receiving end has been dropped (client disconnected).
    pub async fn emit<T: Serialize>(&self, event_kind: &'static str, payload: T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Sse(format!(
                "emit({event_kind}) after close"
            )));
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let server_timestamp = self.start.elapsed().as_secs_f64();
        let envelope = Envelope {
            seq,
            server_timestamp,
            payload,
        };
        let data = serde_json::to_string(&envelope)
            .map_err(|e| GatewayError::Sse(format!("encode {event_kind}: {e}")))?;
        let bytes_written = data.len();
        let frame = SseFrame {
            kind: event_kind,
            data,
        };

        self.tx
            .send(frame)
            .await
            .map_err(|_| GatewayError::Sse("client disconnected".to_owned()))?;

        tracing::info!(
            turn_id = %self.turn_id,
            seq,
            event_kind,
            wall_time = server_timestamp,
            bytes_written,
            "sse emit"
        );
        Ok(())
    }

    /// Marks the stream terminated. Any later `emit` call returns an error.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
