//! LLM provider trait.
//!
//! Defines the interface every language-model backend must implement.
//! This crate ships no concrete HTTP-backed provider; callers bring their
//! own (Anthropic, OpenAI-compatible, etc.) by implementing [`LlmProvider`].
//! See [`crate::scripted::ScriptedProvider`] for a deterministic fake used
//! in tests.

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::types::{GenerateOptions, GenerateResponse, Message, ModelMetadata};

/// Language-model provider.
///
/// Implementors give the runtime access to a model's `generate` endpoint
/// plus enough metadata (context window, per-token cost) to drive context
/// management and cost accounting.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// The model id this provider instance is bound to.
    fn model_id(&self) -> &str;

    /// Generate a completion for `messages` under `options`.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> LlmResult<GenerateResponse>;

    /// Pricing and capability metadata for `model_id`, if known to this
    /// provider.
    fn model_metadata(&self, model_id: &str) -> Option<ModelMetadata>;

    /// Approximate token count for `text`, used for local context
    /// accounting when no exact tokenizer is available.
    fn count_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }

    /// Context window of the bound model, in tokens.
    fn max_context_length(&self) -> usize {
        self.model_metadata(self.model_id())
            .map_or(8192, |m| m.context_window)
    }
}

/// Blanket implementation allowing `Box<dyn LlmProvider>` to be used
/// wherever `P: LlmProvider` is required (e.g. a generic agent runtime).
#[async_trait]
impl LlmProvider for Box<dyn LlmProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> LlmResult<GenerateResponse> {
        (**self).generate(messages, options).await
    }

    fn model_metadata(&self, model_id: &str) -> Option<ModelMetadata> {
        (**self).model_metadata(model_id)
    }

    fn count_tokens(&self, text: &str) -> usize {
        (**self).count_tokens(text)
    }

    fn max_context_length(&self) -> usize {
        (**self).max_context_length()
    }
}
