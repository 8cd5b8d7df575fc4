//! Event types that make up the correlated event tree.

use chrono::{DateTime, Utc};
use conductor_core::{SessionId, SpanId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata stamped onto every event by the [`crate::EventEmitter`] before
/// fan-out. Corresponds to the spec's `EventNode` envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// This event's own span id.
    pub span_id: SpanId,
    /// The span this event is a child (or sibling, per the hierarchy rules) of.
    pub parent_id: Option<SpanId>,
    /// Depth in the event tree.
    pub hierarchy_level: u32,
    /// Groups a start/end pair (and any events emitted between them) together.
    pub correlation_id: Option<SpanId>,
    /// The session this event belongs to. Defaults to `"global"`; also serves
    /// as the `trace_id`.
    pub session_id: SessionId,
    /// The component that raised this event (e.g. `"turn_loop"`, `"registry"`).
    pub component: String,
    /// Wall-clock time the event was created.
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Construct bare metadata; the emitter fills in `span_id`/`parent_id`/
    /// `hierarchy_level`/`correlation_id` during `emit`.
    #[must_use]
    pub fn new(component: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            span_id: SpanId::new(),
            parent_id: None,
            hierarchy_level: 0,
            correlation_id: None,
            session_id,
            component: component.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Every event the core can raise. Payloads are `serde_json::Value` rather
/// than per-variant typed fields for most entries because downstream tracer
/// sinks (UI event logs, test assertions) consume them structurally; the
/// handful of fields the core itself branches on (tool name, call id) are
/// kept as typed fields for convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    /// A new conversation (agent turn-loop invocation) began.
    ConversationStart {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// The triggering user message, if any.
        last_user_message: Option<String>,
    },
    /// One iteration of the turn loop is about to call the LLM.
    ConversationTurn {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// 0-based turn index.
        turn: u32,
        /// The exact messages about to be sent, serialized.
        messages: Value,
    },
    /// The LLM call for a turn started.
    LlmGenerationStart {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Model id in use.
        model_id: String,
    },
    /// The LLM call for a turn finished (successfully or not).
    LlmGenerationEnd {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Whether the call succeeded.
        success: bool,
        /// Reported usage, if the call succeeded.
        usage: Option<Value>,
    },
    /// Phase 1 of the parallel tool executor planned a call.
    ToolCallStart {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// The tool-call id this event corresponds to.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
    },
    /// A tool call completed successfully.
    ToolCallEnd {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// The tool-call id this event corresponds to.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Wall-clock duration of the call.
        duration_ms: u64,
    },
    /// A tool call failed (any reason other than broken-pipe recovery success).
    ToolCallError {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// The tool-call id this event corresponds to.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Error description fed back to the model.
        error: String,
    },
    /// Reported token usage for a completed LLM call.
    TokenUsage {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Prompt tokens reported by the provider.
        prompt: u64,
        /// Completion tokens reported by the provider.
        completion: u64,
        /// Cache-read tokens (subset of prompt).
        cache: u64,
        /// Reasoning tokens (disjoint from completion).
        reasoning: u64,
    },
    /// A recoverable conversation-level error (e.g. loop detection) occurred.
    ConversationError {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Stable error kind, e.g. `"loop_detection"`.
        kind: String,
        /// Human-readable detail.
        detail: String,
    },
    /// A synthesized message was appended for UI/operator visibility.
    UserMessage {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Message text.
        text: String,
    },
    /// The agent produced a final textual answer and the turn loop ended.
    UnifiedCompletion {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Final answer text.
        text: String,
        /// Total turns taken.
        turns: u32,
    },
    /// A tool call's transport looked like a broken pipe / dead child process.
    BrokenPipeDetected {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// MCP server name.
        server_name: String,
        /// Tool name being retried.
        tool_name: String,
    },
    /// Broken-pipe recovery's single retry succeeded.
    BrokenPipeRetrySuccess {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// MCP server name.
        server_name: String,
        /// Tool name that was retried.
        tool_name: String,
    },
    /// Any stage was aborted due to caller cancellation.
    Cancelled {
        /// Stamped envelope.
        metadata: EventMetadata,
        /// Where cancellation was observed, e.g. `"turn_start"`, `"tool_dispatch"`.
        stage: String,
    },
}

impl ConductorEvent {
    /// Borrow this event's envelope.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::ConversationStart { metadata, .. }
            | Self::ConversationTurn { metadata, .. }
            | Self::LlmGenerationStart { metadata, .. }
            | Self::LlmGenerationEnd { metadata, .. }
            | Self::ToolCallStart { metadata, .. }
            | Self::ToolCallEnd { metadata, .. }
            | Self::ToolCallError { metadata, .. }
            | Self::TokenUsage { metadata, .. }
            | Self::ConversationError { metadata, .. }
            | Self::UserMessage { metadata, .. }
            | Self::UnifiedCompletion { metadata, .. }
            | Self::BrokenPipeDetected { metadata, .. }
            | Self::BrokenPipeRetrySuccess { metadata, .. }
            | Self::Cancelled { metadata, .. } => metadata,
        }
    }

    /// Mutably borrow this event's envelope; used by the emitter to stamp
    /// hierarchy fields after construction.
    pub fn metadata_mut(&mut self) -> &mut EventMetadata {
        match self {
            Self::ConversationStart { metadata, .. }
            | Self::ConversationTurn { metadata, .. }
            | Self::LlmGenerationStart { metadata, .. }
            | Self::LlmGenerationEnd { metadata, .. }
            | Self::ToolCallStart { metadata, .. }
            | Self::ToolCallEnd { metadata, .. }
            | Self::ToolCallError { metadata, .. }
            | Self::TokenUsage { metadata, .. }
            | Self::ConversationError { metadata, .. }
            | Self::UserMessage { metadata, .. }
            | Self::UnifiedCompletion { metadata, .. }
            | Self::BrokenPipeDetected { metadata, .. }
            | Self::BrokenPipeRetrySuccess { metadata, .. }
            | Self::Cancelled { metadata, .. } => metadata,
        }
    }

    /// Stable event-type string, stamped into logs and used by tests.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationStart { .. } => "conversation_start",
            Self::ConversationTurn { .. } => "conversation_turn",
            Self::LlmGenerationStart { .. } => "llm_generation_start",
            Self::LlmGenerationEnd { .. } => "llm_generation_end",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolCallError { .. } => "tool_call_error",
            Self::TokenUsage { .. } => "token_usage",
            Self::ConversationError { .. } => "conversation_error",
            Self::UserMessage { .. } => "user_message",
            Self::UnifiedCompletion { .. } => "unified_completion",
            Self::BrokenPipeDetected { .. } => "broken_pipe_detected",
            Self::BrokenPipeRetrySuccess { .. } => "broken_pipe_retry_success",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// True for the "start" half of a start/end pair.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            Self::ConversationStart { .. }
                | Self::ConversationTurn { .. }
                | Self::LlmGenerationStart { .. }
                | Self::ToolCallStart { .. }
        )
    }
}
