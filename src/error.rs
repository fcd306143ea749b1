//! Error types for the avatar gateway.

/// Top-level error type for the streaming gateway.
///
/// Variants map onto the error taxonomy (`invalid_input`, `adapter_timeout`,
/// `adapter`, `artifact_not_ready`, `storage`, `internal`) that the `error`
/// SSE event's `kind` field reports to clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Upload missing a required field or wrong field shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An adapter (ASR/LLM/TTS/LipSync) exceeded its timeout budget.
    #[error("{stage} timed out after {elapsed_ms}ms")]
    AdapterTimeout { stage: &'static str, elapsed_ms: u64 },

    /// An adapter returned a structured failure.
    #[error("{stage} failed: {message}")]
    AdapterFailure { stage: &'static str, message: String },

    /// Chunker input or configuration was invalid.
    #[error("chunker error: {0}")]
    Chunker(String),

    /// Asset Store cannot accept or serve a write/read.
    #[error("storage error: {0}")]
    Storage(String),

    /// `GET /videos/{id}` raced the writer; artifact not yet stable.
    #[error("artifact not ready: {0}")]
    ArtifactNotReady(String),

    /// SSE dispatcher misuse (e.g. `emit` after `close`).
    #[error("sse dispatcher error: {0}")]
    Sse(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// An invariant documented in the data model or component design was
    /// violated. Always a bug, never an expected runtime condition.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// The wire-format `kind` string reported in an `error` SSE event (§6.2, §7).
    #[must_use]
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AdapterTimeout { .. } => "adapter_timeout",
            Self::AdapterFailure { .. } => "adapter",
            Self::Chunker(_) => "internal",
            Self::Storage(_) => "storage",
            Self::ArtifactNotReady(_) => "artifact_not_ready",
            Self::Sse(_) => "internal",
            Self::Config(_) => "internal",
            Self::Internal(_) => "internal",
            Self::Io(_) => "storage",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GatewayError>;
