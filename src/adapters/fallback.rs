//! Retry/fallback chain for recoverable adapter failures (§7: "LLM errors
//! are recoverable"). Reused near-verbatim from the production fallback
//! policy for external LLM providers — ordered provider list, transient
//! errors retried up to [`RETRY_ATTEMPTS`] times before skipping, permanent
//! errors skip immediately.

use std::collections::HashMap;
use tracing::{info, warn};

/// Number of retry attempts for a transient error before trying the next provider.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Delay in milliseconds between transient-error retries.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Errors reported by a provider attempt.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// A transient error (timeout, 5xx, connection refused).
    ///
    /// The chain will retry up to [`RETRY_ATTEMPTS`] times before skipping to
    /// the next provider.
    Transient(String),
    /// A permanent error (auth failure, 4xx).
    ///
    /// The chain skips this provider immediately without retrying.
    Permanent(String),
}

/// Per-provider failure tracking.
#[derive(Debug, Default)]
struct ProviderState {
    transient_failures: u32,
    permanently_failed: bool,
}

/// Ordered fallback chain over provider names.
#[derive(Debug)]
pub struct FallbackChain {
    providers: Vec<String>,
    state: HashMap<String, ProviderState>,
    current_index: usize,
    any_success: bool,
    max_retries: u32,
}

impl FallbackChain {
    /// Create a new chain with the given ordered provider names.
    pub fn new(providers: Vec<String>) -> Self {
        Self::with_max_retries(providers, RETRY_ATTEMPTS)
    }

    /// Create a chain with a caller-supplied retry threshold (§6.4 exposes
    /// this as `llm.fallback_enabled`'s sibling knob, driven from
    /// [`crate::config::LlmConfig::retry_attempts`]).
    pub fn with_max_retries(providers: Vec<String>, max_retries: u32) -> Self {
        Self {
            state: providers
                .iter()
                .map(|p| (p.clone(), ProviderState::default()))
                .collect(),
            providers,
            current_index: 0,
            any_success: false,
            max_retries,
        }
    }

    /// Return the name of the currently active provider, if any.
    pub fn current_provider(&self) -> Option<&str> {
        self.providers.get(self.current_index).map(String::as_str)
    }

    /// Return the next provider to try, advancing past exhausted ones.
    pub fn next_provider(&mut self) -> Option<String> {
        while self.current_index < self.providers.len() {
            let name = &self.providers[self.current_index];
            let (permanently_failed, transient_failures) = self
                .state
                .get(name)
                .map(|s| (s.permanently_failed, s.transient_failures))
                .unwrap_or_default();

            if permanently_failed || transient_failures >= self.max_retries {
                info!(
                    provider = name.as_str(),
                    "fallback chain: skipping exhausted provider"
                );
                self.current_index += 1;
                continue;
            }

            return Some(name.clone());
        }
        None
    }

    /// Report a failure for the named provider.
    pub fn report_failure(&mut self, provider: &str, error: ProviderError) {
        let state = self.state.entry(provider.to_owned()).or_default();
        match error {
            ProviderError::Transient(ref msg) => {
                state.transient_failures += 1;
                warn!(
                    provider,
                    failures = state.transient_failures,
                    max = RETRY_ATTEMPTS,
                    error = msg.as_str(),
                    "provider transient failure"
                );
            }
            ProviderError::Permanent(ref msg) => {
                state.permanently_failed = true;
                warn!(
                    provider,
                    error = msg.as_str(),
                    "provider permanent failure — skipping"
                );
                if self.providers.get(self.current_index).map(String::as_str) == Some(provider) {
                    self.current_index += 1;
                }
            }
        }
    }

    /// Report a successful completion for the named provider.
    pub fn report_success(&mut self, provider: &str) {
        info!(provider, "provider request succeeded");
        if let Some(state) = self.state.get_mut(provider) {
            state.transient_failures = 0;
        }
        self.any_success = true;
    }

    /// Return `true` if the chain is fully exhausted (all providers failed).
    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.providers.len()
    }

    /// Return the number of providers in the chain.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Return `true` if the chain has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
