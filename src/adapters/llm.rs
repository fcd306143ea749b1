//! LLM adapter (§4.3, §7): `respond(user_text, dialogue_history,
//! system_prompt) → {response_text}`. LLM failures are the one
//! recoverable adapter failure in the error taxonomy: [`FallbackLlmAdapter`]
//! retries/skips across an ordered provider chain and, if every provider is
//! exhausted, substitutes a configured canned response rather than failing
//! the Turn.

use crate::adapters::fallback::{FallbackChain, ProviderError};
use crate::config::LlmConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;

/// Speaker role of one dialogue-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueRole {
    User,
    Assistant,
}

/// One turn of prior dialogue, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: DialogueRole,
    pub text: String,
}

/// Result of an LLM completion call.
#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub response_text: String,
}

/// Uniform façade over a dialogue-model provider (remote API or local
/// model). A single call is expected to be time-bounded by the caller.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn respond(
        &self,
        user_text: &str,
        history: &[HistoryEntry],
        system_prompt: &str,
    ) -> Result<LlmOutput>;
}

/// Deterministic in-process stub. Echoes the user's text into a fixed
/// conversational template so the pipeline has a real response to chunk
/// and synthesize without a real model.
#[derive(Debug, Default)]
pub struct StubLlmAdapter;

#[async_trait]
impl LlmAdapter for StubLlmAdapter {
    async fn respond(
        &self,
        user_text: &str,
        _history: &[HistoryEntry],
        _system_prompt: &str,
    ) -> Result<LlmOutput> {
        if user_text.trim().is_empty() {
            return Ok(LlmOutput {
                response_text: String::new(),
            });
        }
        Ok(LlmOutput {
            response_text: format!("You said: {user_text}. Here is my reply."),
        })
    }
}

/// Wraps an ordered list of [`LlmAdapter`] providers behind a
/// [`FallbackChain`]. Each provider is retried per the chain's policy;
/// once every provider is exhausted, `respond` returns the configured
/// canned fallback text instead of propagating an error, matching the
/// pipeline's "LLM errors are recoverable" rule (§4.4 step 3, §7).
pub struct FallbackLlmAdapter {
    providers: Vec<Box<dyn LlmAdapter>>,
    config: LlmConfig,
}

impl FallbackLlmAdapter {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn LlmAdapter>>, config: LlmConfig) -> Self {
        Self { providers, config }
    }

    fn provider_names(&self) -> Vec<String> {
        (0..self.providers.len())
            .map(|i| format!("provider-{i}"))
            .collect()
    }
}

#[async_trait]
impl LlmAdapter for FallbackLlmAdapter {
    async fn respond(
        &self,
        user_text: &str,
        history: &[HistoryEntry],
        system_prompt: &str,
    ) -> Result<LlmOutput> {
        let mut chain = FallbackChain::with_max_retries(self.provider_names(), self.config.retry_attempts);

        while let Some(name) = chain.next_provider() {
            let index: usize = name
                .strip_prefix("provider-")
                .and_then(|s| s.parse().ok())
                .unwrap_or(usize::MAX);
            let Some(provider) = self.providers.get(index) else {
                break;
            };

            match provider.respond(user_text, history, system_prompt).await {
                Ok(output) => {
                    chain.report_success(&name);
                    return Ok(output);
                }
                Err(err) => {
                    chain.report_failure(&name, ProviderError::Transient(err.to_string()));
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.config.retry_backoff_ms,
                    ))
                    .await;
                }
            }
        }

        if self.config.fallback_enabled {
            Ok(LlmOutput {
                response_text: self.config.fallback_response.clone(),
            })
        } else {
            Err(GatewayError::AdapterFailure {
                stage: "llm",
                message: "all providers exhausted".to_owned(),
            })
        }
    }
}
