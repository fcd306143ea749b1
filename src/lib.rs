//! Conversational avatar gateway: a streaming pipeline that turns one
//! user voice clip into an ordered sequence of short lip-synced video
//! clips delivered to a browser while later clips are still being
//! produced.
//!
//! # Architecture
//!
//! One Turn flows through a cascade of independent stages:
//! upload → ASR → LLM → chunker → per-chunk (TTS → lip-sync → store → SSE)
//!
//! - [`chunker`] splits assistant text into utterance fragments tuned for
//!   fast time-to-first-frame.
//! - [`store`] is the durable filesystem area holding generated audio/video
//!   artifacts, with fsync + size-stability primitives.
//! - [`adapters`] defines narrow capability traits over the ASR/LLM/TTS/
//!   lip-sync engines (themselves out of scope) plus deterministic stubs.
//! - [`pipeline`] drives one Turn end to end.
//! - [`sse`] serializes pipeline events onto one ordered, timestamped
//!   response body.
//! - [`video_server`] serves artifacts with Range support and freshness
//!   guarantees.
//! - [`server`] binds the above to HTTP endpoints.

pub mod adapters;
pub mod chunker;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod sse;
pub mod store;
pub mod video_server;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
