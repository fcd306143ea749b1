//! Configuration types for the avatar gateway.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Text chunker tuning (C1, §4.1/§6.4).
    pub chunker: ChunkerConfig,
    /// Asset store durability knobs (C2, §4.2/§6.4).
    pub asset_store: AssetStoreConfig,
    /// Pipeline timeouts and concurrency (C4, §5).
    pub pipeline: PipelineConfig,
    /// LLM fallback behavior (C3, §7).
    pub llm: LlmConfig,
    /// Transport surface bind address, protocol, worker count (C7, §4.7).
    pub transport: TransportConfig,
}

/// Text chunker configuration (§4.1, §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Hard cap for fragments at index ≥ 1.
    pub max_chars: usize,
    /// Hard cap for fragment 0 after adaptive buffering.
    pub first_chunk_hard_limit: usize,
    /// Trailing periods in these words are masked before sentence splitting.
    pub abbreviation_set: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 120,
            first_chunk_hard_limit: 125,
            abbreviation_set: default_abbreviations(),
        }
    }
}

fn default_abbreviations() -> Vec<String> {
    ["Mr.", "Mrs.", "Ms.", "Dr.", "D.C.", "U.S.", "e.g.", "i.e."]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Asset store configuration (§4.2, §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetStoreConfig {
    /// Root directory for durable artifacts.
    pub root_dir: PathBuf,
    /// Poll interval used by `confirm_stable`.
    pub stable_size_poll_ms: u64,
    /// Total budget the write path (`AssetStore::confirm_stable`) is
    /// allowed to spend polling after `put`.
    pub stable_size_budget_ms: u64,
    /// Total budget the read path (`AssetStore::confirm_stable_for_read`,
    /// used by the video range server's pre-send freshness check) is
    /// allowed to spend polling. Kept well under the write-path budget
    /// per §4.6: a racing GET must fail fast into a retryable 503 rather
    /// than blocking the response for seconds.
    pub stable_size_read_budget_ms: u64,
}

impl Default for AssetStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: default_asset_root_dir(),
            stable_size_poll_ms: 100,
            stable_size_budget_ms: 2_000,
            stable_size_read_budget_ms: 100,
        }
    }
}

fn default_asset_root_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(dir).join("avatar-gateway").join("artifacts")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home)
            .join(".cache")
            .join("avatar-gateway")
            .join("artifacts")
    } else {
        PathBuf::from("/tmp/avatar-gateway/artifacts")
    }
}

/// Per-stage adapter timeouts and cross-turn concurrency (§4.4, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-stage timeout budgets in milliseconds.
    pub adapter_timeouts_ms: HashMap<String, u64>,
    /// Maximum Turns allowed to run concurrently (the GPU-bound lip-sync
    /// stage is typically a single-resource bottleneck; default models that).
    pub max_concurrent_turns: usize,
    /// Grace period after `complete` before an artifact becomes eligible
    /// for eviction.
    pub artifact_grace_period_s: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut adapter_timeouts_ms = HashMap::new();
        adapter_timeouts_ms.insert("asr".to_owned(), 30_000);
        adapter_timeouts_ms.insert("llm".to_owned(), 60_000);
        adapter_timeouts_ms.insert("tts".to_owned(), 30_000);
        adapter_timeouts_ms.insert("lipsync".to_owned(), 60_000);
        Self {
            adapter_timeouts_ms,
            max_concurrent_turns: 1,
            artifact_grace_period_s: 300,
        }
    }
}

impl PipelineConfig {
    /// Looks up a stage's configured timeout, falling back to `default_ms`
    /// when the stage is absent from `adapter_timeouts_ms`.
    #[must_use]
    pub fn timeout_ms(&self, stage: &str, default_ms: u64) -> u64 {
        self.adapter_timeouts_ms
            .get(stage)
            .copied()
            .unwrap_or(default_ms)
    }
}

/// LLM fallback configuration (§7, grounded on `llm::fallback::FallbackChain`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Whether a canned response is substituted when the LLM adapter fails.
    pub fallback_enabled: bool,
    /// Text returned when the LLM adapter fails and `fallback_enabled` is set.
    pub fallback_response: String,
    /// Number of retry attempts before a stage is reported as exhausted.
    pub retry_attempts: u32,
    /// Backoff between retries, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            fallback_response: "Sorry, I couldn't come up with a response just now.".to_owned(),
            retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Transport surface configuration (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bind address for the HTTP server.
    pub bind_addr: String,
    /// Required transport protocol. Always `"h2c"` in this deployment;
    /// HTTP/1.1-only clients are still served (h2c negotiation is
    /// per-connection), but the listener always offers HTTP/2.
    pub protocol: String,
    /// Number of request-handling workers (tokio runtime worker threads).
    pub workers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_owned(),
            protocol: "h2c".to_owned(),
            workers: 4,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::GatewayError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/avatar-gateway/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("avatar-gateway")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("avatar-gateway")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/avatar-gateway-config/config.toml")
        }
    }

    /// Overlay environment-variable overrides onto an already-loaded config.
    ///
    /// Only the bind address is commonly overridden in deployment; other
    /// fields are expected to come from the TOML file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("AVATAR_GATEWAY_BIND_ADDR") {
            self.transport.bind_addr = addr;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert_eq!(config.chunker.max_chars, 120);
        assert_eq!(config.chunker.first_chunk_hard_limit, 125);
        assert!(config.chunker.abbreviation_set.contains(&"Dr.".to_owned()));
        assert_eq!(config.asset_store.stable_size_poll_ms, 100);
        assert_eq!(config.asset_store.stable_size_budget_ms, 2_000);
        assert_eq!(config.pipeline.max_concurrent_turns, 1);
        assert!(config.llm.fallback_enabled);
        assert_eq!(config.transport.protocol, "h2c");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join("avatar-gateway-test-config-roundtrip");
        let path = dir.join("config.toml");

        let mut config = GatewayConfig::default();
        config.chunker.max_chars = 90;
        config.transport.bind_addr = "0.0.0.0:9090".to_owned();

        config.save_to_file(&path).unwrap();
        assert!(path.exists());

        let loaded = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(loaded.chunker.max_chars, 90);
        assert_eq!(loaded.transport.bind_addr, "0.0.0.0:9090");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = GatewayConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("avatar-gateway-test-config-invalid");
        let path = dir.join("bad.toml");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "this is not valid toml {{{").unwrap();

        let result = GatewayConfig::from_file(&path);
        assert!(result.is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pipeline_timeout_defaults_match_spec() {
        let config = PipelineConfig::default();
        assert_eq!(config.timeout_ms("asr", 0), 30_000);
        assert_eq!(config.timeout_ms("llm", 0), 60_000);
        assert_eq!(config.timeout_ms("tts", 0), 30_000);
        assert_eq!(config.timeout_ms("lipsync", 0), 60_000);
        assert_eq!(config.timeout_ms("unknown", 42), 42);
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = GatewayConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("avatar-gateway"));
    }

    #[test]
    fn missing_toml_sections_use_defaults() {
        let toml_str = "[chunker]\nmax_chars = 80";
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunker.max_chars, 80);
        assert_eq!(config.chunker.first_chunk_hard_limit, 125);
        assert_eq!(config.pipeline.max_concurrent_turns, 1);
    }
}
