//! A deterministic, queue-based [`LlmProvider`] for tests.
//!
//! [`ScriptedProvider`] replays pre-configured turns so that turn-loop,
//! tool-dispatch, and context-management tests can exercise the runtime
//! without a real model behind it.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LlmError, LlmResult};
use crate::provider::LlmProvider;
use crate::types::{
    Choice, GenerateOptions, GenerateResponse, Message, ModelMetadata, ToolCall, Usage,
};

/// A single scripted turn that [`ScriptedProvider`] will replay.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// A plain text response.
    Text {
        /// The assistant's text.
        text: String,
        /// Optional `(input, output)` usage override.
        usage: Option<(usize, usize)>,
    },
    /// One or more tool calls.
    ToolCalls {
        /// The calls to emit.
        calls: Vec<ScriptedToolCall>,
        /// Optional `(input, output)` usage override.
        usage: Option<(usize, usize)>,
    },
    /// Fail the call outright.
    Error(String),
}

impl ScriptedTurn {
    /// A text turn with default usage.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            usage: None,
        }
    }

    /// A text turn with explicit usage.
    #[must_use]
    pub fn text_with_usage(text: impl Into<String>, input: usize, output: usize) -> Self {
        Self::Text {
            text: text.into(),
            usage: Some((input, output)),
        }
    }

    /// A tool-calls turn with default usage.
    #[must_use]
    pub fn tool_calls(calls: Vec<ScriptedToolCall>) -> Self {
        Self::ToolCalls { calls, usage: None }
    }

    /// An error turn.
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }
}

/// A single tool call specification for [`ScriptedTurn::ToolCalls`].
#[derive(Debug, Clone)]
pub struct ScriptedToolCall {
    /// Call id.
    pub id: String,
    /// Tool name, e.g. `"filesystem:read_file"`.
    pub name: String,
    /// JSON arguments.
    pub arguments: Value,
}

impl ScriptedToolCall {
    /// Create a call with an auto-generated id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("scripted-call-{}", Uuid::new_v4()),
            name: name.into(),
            arguments,
        }
    }

    /// Create a call with an explicit id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Deterministic, queue-based [`LlmProvider`].
///
/// Turns are popped from the front of the queue on each call to
/// [`generate`](LlmProvider::generate). An exhausted queue is an error.
/// Every call's messages are captured and can be inspected afterwards via
/// [`Self::captured_messages`].
pub struct ScriptedProvider {
    model_id: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    call_count: Mutex<usize>,
    captured_messages: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    /// Create a provider preloaded with `turns`, bound to a placeholder
    /// model id.
    #[must_use]
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self::with_model_id("scripted-model", turns)
    }

    /// Create a provider bound to a specific model id, for tests that
    /// exercise model-metadata lookups.
    #[must_use]
    pub fn with_model_id(model_id: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            model_id: model_id.into(),
            turns: Mutex::new(VecDeque::from(turns)),
            call_count: Mutex::new(0),
            captured_messages: Mutex::new(Vec::new()),
        }
    }

    /// Number of times [`generate`](LlmProvider::generate) has been called.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().expect("lock poisoned")
    }

    /// Snapshot of every message slice passed to `generate`, in call order.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn captured_messages(&self) -> Vec<Vec<Message>> {
        self.captured_messages.lock().expect("lock poisoned").clone()
    }

    fn next_turn(&self, messages: &[Message]) -> LlmResult<ScriptedTurn> {
        {
            let mut count = self.call_count.lock().expect("lock poisoned");
            *count = count.saturating_add(1);
        }
        {
            let mut captured = self.captured_messages.lock().expect("lock poisoned");
            captured.push(messages.to_vec());
        }

        let mut turns = self.turns.lock().expect("lock poisoned");
        turns
            .pop_front()
            .ok_or_else(|| LlmError::RequestFailed("ScriptedProvider: no more turns queued".to_string()))
    }

    fn default_usage() -> (usize, usize) {
        (100, 50)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> LlmResult<GenerateResponse> {
        let turn = self.next_turn(messages)?;

        match turn {
            ScriptedTurn::Text { text, usage } => {
                let (input, output) = usage.unwrap_or_else(Self::default_usage);
                Ok(GenerateResponse {
                    choices: vec![Choice {
                        content: Some(text),
                        tool_calls: Vec::new(),
                        generation_info: Value::Null,
                    }],
                    usage: Usage {
                        input,
                        output,
                        cache: 0,
                        reasoning: 0,
                    },
                })
            }
            ScriptedTurn::ToolCalls { calls, usage } => {
                let (input, output) = usage.unwrap_or_else(Self::default_usage);
                let tool_calls: Vec<ToolCall> = calls
                    .into_iter()
                    .map(|c| ToolCall::new(c.id, c.name).with_arguments(c.arguments))
                    .collect();

                Ok(GenerateResponse {
                    choices: vec![Choice {
                        content: None,
                        tool_calls,
                        generation_info: Value::Null,
                    }],
                    usage: Usage {
                        input,
                        output,
                        cache: 0,
                        reasoning: 0,
                    },
                })
            }
            ScriptedTurn::Error(msg) => Err(LlmError::RequestFailed(msg)),
        }
    }

    fn model_metadata(&self, model_id: &str) -> Option<ModelMetadata> {
        Some(ModelMetadata {
            context_window: 200_000,
            input_cost_per_1m: 0.0,
            output_cost_per_1m: 0.0,
            cached_input_cost_per_1m: 0.0,
            reasoning_cost_per_1m: None,
            provider: format!("scripted:{model_id}"),
        })
    }

    fn max_context_length(&self) -> usize {
        200_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_turns_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::text("hi"),
            ScriptedTurn::tool_calls(vec![ScriptedToolCall::new(
                "calc:add",
                serde_json::json!({"a": 1, "b": 2}),
            )]),
        ]);

        let first = provider
            .generate(&[Message::human("hello")], &GenerateOptions::new())
            .await
            .expect("first turn");
        assert_eq!(first.first_choice().unwrap().content.as_deref(), Some("hi"));

        let second = provider
            .generate(&[], &GenerateOptions::new())
            .await
            .expect("second turn");
        assert!(second.first_choice().unwrap().has_tool_calls());

        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.captured_messages().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_queue_errors() {
        let provider = ScriptedProvider::new(Vec::new());
        let result = provider.generate(&[], &GenerateOptions::new()).await;
        assert!(result.is_err());
    }
}
