//! Wire types for LLM messages, tool definitions, and generation results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in the conversation.
///
/// The system message, if present, must be first in a message list
/// (providers reject it otherwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: MessageRole,
    /// Ordered content parts.
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a human (user) message.
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a human message carrying an image alongside text, in the
    /// image-first ordering some providers require.
    #[must_use]
    pub fn human_with_image(image: ContentPart, text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            parts: vec![image, ContentPart::Text { text: text.into() }],
        }
    }

    /// Create an assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: calls.into_iter().map(ContentPart::ToolCall).collect(),
        }
    }

    /// Create a tool-result message.
    #[must_use]
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: MessageRole::Tool,
            parts: vec![ContentPart::ToolResult(result)],
        }
    }

    /// Concatenated text of every [`ContentPart::Text`] part, or `None` if
    /// the message has no text parts.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Tool calls carried by this message, if any.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// System message (instructions). Must be first when present.
    System,
    /// Human (end-user) message.
    Human,
    /// Assistant message.
    Assistant,
    /// Tool result.
    Tool,
}

/// A single part of a message's content.
///
/// Every `ToolCall` part emitted by a model must be followed, before the
/// next assistant message, by a matching `ToolResult` part -- providers
/// reject the turn otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image, either inlined as base64 or referenced by URL.
    Image {
        /// MIME type, e.g. `image/png`.
        mime: String,
        /// Inline base64-encoded bytes, if supplied this way.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        base64: Option<String>,
        /// A URL the provider should fetch the image from, if supplied
        /// this way.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        url: Option<String>,
    },
    /// A tool call requested by the model.
    ToolCall(ToolCall),
    /// The result of a previously requested tool call.
    ToolResult(ToolCallResult),
}

impl ContentPart {
    /// Build an inline base64 image part.
    pub fn inline_image(mime: impl Into<String>, base64: impl Into<String>) -> Self {
        Self::Image {
            mime: mime.into(),
            base64: Some(base64.into()),
            url: None,
        }
    }

    /// Build a URL-referenced image part.
    pub fn url_image(mime: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Image {
            mime: mime.into(),
            base64: None,
            url: Some(url.into()),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call id, echoed back on the matching [`ToolCallResult`].
    pub id: String,
    /// Tool name, conventionally `"<server>:<tool>"`.
    pub name: String,
    /// Tool arguments as a JSON value.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call with empty arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set arguments.
    #[must_use]
    pub fn with_arguments(mut self, args: Value) -> Self {
        self.arguments = args;
        self
    }

    /// Split `"server:tool"` into its two halves.
    #[must_use]
    pub fn parse_name(&self) -> Option<(&str, &str)> {
        self.name.split_once(':')
    }
}

/// Result of a tool call, matched back to its [`ToolCall`] by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the tool call this responds to.
    pub tool_call_id: String,
    /// Tool name, carried for providers that require it on the result part.
    pub name: String,
    /// Result content, already rendered to text.
    pub content: String,
    /// Whether this result represents an error.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Create a successful result.
    pub fn success(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: error.into(),
            is_error: true,
        }
    }
}

/// Tool definition as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolDefinition {
    /// Tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: Option<String>,
    /// JSON schema of the tool's input.
    pub input_schema: Value,
}

impl LlmToolDefinition {
    /// Create a new tool definition with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// How the model should decide whether to call a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide.
    #[default]
    Auto,
    /// Forbid tool calls this turn.
    None,
    /// Force a call to the named tool.
    Named(String),
}

/// Options recognized by [`crate::provider::LlmProvider::generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<usize>,
    /// Tools available to the model this turn.
    pub tools: Vec<LlmToolDefinition>,
    /// Tool-calling policy.
    pub tool_choice: ToolChoice,
    /// Request strict JSON output.
    pub json_mode: bool,
}

impl GenerateOptions {
    /// Start from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attach tool definitions.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<LlmToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the tool-choice policy.
    #[must_use]
    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    /// Require strict JSON output.
    #[must_use]
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// One candidate completion.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Text content of the choice, if any.
    pub content: Option<String>,
    /// Tool calls requested by this choice.
    pub tool_calls: Vec<ToolCall>,
    /// Provider-specific generation metadata (stop reason, log probs, ...).
    pub generation_info: Value,
}

impl Choice {
    /// True if the model asked to call at least one tool.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Result of [`crate::provider::LlmProvider::generate`].
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Candidate completions. Non-streaming providers return exactly one.
    pub choices: Vec<Choice>,
    /// Token usage for the call.
    pub usage: Usage,
}

impl GenerateResponse {
    /// The first choice, if any.
    #[must_use]
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// Token usage for a single generation call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Input (prompt) tokens.
    pub input: usize,
    /// Output (completion) tokens.
    pub output: usize,
    /// Tokens served from a prompt cache, if the provider reports one.
    pub cache: usize,
    /// Reasoning tokens, for models that bill them separately.
    pub reasoning: usize,
}

impl Usage {
    /// Total billed tokens across all categories.
    #[must_use]
    pub fn total(&self) -> usize {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache)
            .saturating_add(self.reasoning)
    }
}

/// Per-model pricing and capability metadata, returned by
/// [`crate::provider::LlmProvider::model_metadata`].
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    /// Maximum context window, in tokens.
    pub context_window: usize,
    /// USD cost per 1M input tokens.
    pub input_cost_per_1m: f64,
    /// USD cost per 1M output tokens.
    pub output_cost_per_1m: f64,
    /// USD cost per 1M cached input tokens.
    pub cached_input_cost_per_1m: f64,
    /// USD cost per 1M reasoning tokens, for models that bill them.
    pub reasoning_cost_per_1m: Option<f64>,
    /// Provider name, e.g. `"anthropic"`.
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_joins_text_parts() {
        let human = Message::human("Hello");
        assert_eq!(human.role, MessageRole::Human);
        assert_eq!(human.text().as_deref(), Some("Hello"));
    }

    #[test]
    fn tool_call_name_parses_server_prefix() {
        let call = ToolCall::new("123", "filesystem:read_file")
            .with_arguments(serde_json::json!({"path": "/tmp/test.txt"}));
        assert_eq!(call.parse_name(), Some(("filesystem", "read_file")));
    }

    #[test]
    fn tool_result_error_flag() {
        let success = ToolCallResult::success("123", "read_file", "file contents");
        assert!(!success.is_error);

        let error = ToolCallResult::error("123", "read_file", "file not found");
        assert!(error.is_error);
    }

    #[test]
    fn assistant_tool_calls_roundtrip_through_parts() {
        let call = ToolCall::new("1", "calc:add");
        let msg = Message::assistant_tool_calls(vec![call]);
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.tool_calls()[0].name, "calc:add");
    }

    #[test]
    fn usage_total_sums_all_categories() {
        let usage = Usage {
            input: 10,
            output: 5,
            cache: 2,
            reasoning: 1,
        };
        assert_eq!(usage.total(), 18);
    }
}
