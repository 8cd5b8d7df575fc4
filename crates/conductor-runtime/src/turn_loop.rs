//! Turn Loop (C9): the per-turn algorithm that drives one agent call from
//! its initial messages to a final textual answer.

use std::sync::Arc;

use conductor_core::SessionId;
use conductor_events::{ConductorEvent, EventEmitter};
use conductor_llm::{
    ContentPart, GenerateOptions, GenerateResponse, LlmProvider, Message, MessageRole, ModelMetadata, ToolChoice, Usage,
};
use conductor_tools::{LoopDetector, ToolCatalog, ToolDescriptor, VirtualToolDispatcher};
use tracing::{instrument, warn};

use crate::context::{ContextManager, TokenLedger};
use crate::executor::ParallelToolExecutor;
use crate::error::{RuntimeError, RuntimeResult};

/// Default `max_tokens` sent on every LLM call unless overridden.
pub const DEFAULT_MAX_TOKENS: usize = 40_000;

/// Default number of turns before the forced-final-answer call fires.
pub const DEFAULT_MAX_TURNS: u32 = 25;

/// Per-agent options the turn loop consults every turn.
#[derive(Debug, Clone)]
pub struct TurnLoopConfig {
    /// Turn index (0-based) at which the loop stops asking and forces a
    /// final answer instead (runs as turn `max_turns + 1`).
    pub max_turns: u32,
    /// `max_tokens` sent on every call.
    pub default_max_tokens: usize,
    /// Sampling temperature; omitted entirely for reasoning-only models.
    pub temperature: Option<f64>,
    /// Tool-calling policy sent to the model.
    pub tool_choice: ToolChoice,
    /// Whether the bound model is reasoning-only (temperature unsupported).
    pub reasoning_model: bool,
    /// Whether tool batches run through the parallel executor or one at a time.
    pub parallel_tools: bool,
}

impl Default for TurnLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            tool_choice: ToolChoice::Auto,
            reasoning_model: false,
            parallel_tools: true,
        }
    }
}

/// Drives one agent call: repeatedly calls the LLM, executes any requested
/// tools, and feeds the results back, until the model answers with text and
/// no tool calls or `max_turns` is exhausted.
pub struct TurnLoop {
    llm: Arc<dyn LlmProvider>,
    fallback_llms: Vec<Arc<dyn LlmProvider>>,
    executor: ParallelToolExecutor,
    context: ContextManager,
    virtual_dispatcher: Arc<VirtualToolDispatcher>,
    active_tools: Vec<ToolDescriptor>,
    system_prompt: Option<String>,
    emitter: EventEmitter,
    session: SessionId,
    loop_detector: LoopDetector,
    token_ledger: TokenLedger,
    config: TurnLoopConfig,
}

impl TurnLoop {
    /// Build a turn loop bound to one conversation.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executor: ParallelToolExecutor,
        context: ContextManager,
        virtual_dispatcher: Arc<VirtualToolDispatcher>,
        active_tools: Vec<ToolDescriptor>,
        system_prompt: Option<String>,
        emitter: EventEmitter,
        session: SessionId,
        config: TurnLoopConfig,
    ) -> Self {
        Self {
            llm,
            fallback_llms: Vec::new(),
            executor,
            context,
            virtual_dispatcher,
            active_tools,
            system_prompt,
            emitter,
            session,
            loop_detector: LoopDetector::new(),
            token_ledger: TokenLedger::default(),
            config,
        }
    }

    /// Attach a cross-provider fallback chain, tried in order when the
    /// primary provider returns an empty-content response.
    #[must_use]
    pub fn with_fallback_llms(mut self, fallbacks: Vec<Arc<dyn LlmProvider>>) -> Self {
        self.fallback_llms = fallbacks;
        self
    }

    /// Restore persisted per-session state (context manager, token ledger,
    /// loop detector) into a freshly built loop, so the facade can rebuild
    /// the executor/active-tool list every call (to pick up newly
    /// registered custom tools) while carrying the session's accumulated
    /// state forward.
    #[must_use]
    pub fn with_state(mut self, context: ContextManager, token_ledger: TokenLedger, loop_detector: LoopDetector) -> Self {
        self.context = context;
        self.token_ledger = token_ledger;
        self.loop_detector = loop_detector;
        self
    }

    /// Extract the per-session state back out after a call, for the facade
    /// to persist until the session's next call.
    #[must_use]
    pub fn into_state(self) -> (ContextManager, TokenLedger, LoopDetector) {
        (self.context, self.token_ledger, self.loop_detector)
    }

    /// Current token ledger, for the facade's cost/usage reporting.
    #[must_use]
    pub fn token_ledger(&self) -> &TokenLedger {
        &self.token_ledger
    }

    /// Run the loop to completion, mutating `messages` in place and
    /// returning the agent's final textual answer.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] for cancellation, context overflow, a
    /// non-empty-content LLM failure, or an unrecoverable executor error.
    /// Individual tool failures never surface here.
    #[instrument(skip_all, fields(session = %self.session))]
    pub async fn run(&mut self, messages: &mut Vec<Message>, cancelled: impl Fn() -> bool + Copy) -> RuntimeResult<String> {
        if cancelled() {
            return self.cancel("turn_start");
        }
        self.ensure_system_prompt(messages)?;

        let last_user_message = messages.iter().rev().find(|m| m.role == MessageRole::Human).and_then(Message::text);
        self.emitter.emit(ConductorEvent::ConversationStart {
            metadata: self.emitter.metadata("turn_loop"),
            last_user_message,
        });

        let mut turn: u32 = 0;
        let mut last_response = String::new();

        loop {
            if cancelled() {
                return self.cancel("turn_start");
            }

            self.context.compact(messages, turn, &self.session).await?;
            if self.context.should_summarize(&self.token_ledger, turn) {
                self.context.summarize(messages, self.llm.as_ref(), turn, &mut self.token_ledger).await?;
            }

            if turn >= self.config.max_turns {
                return self.forced_final_answer(messages, turn, last_response).await;
            }

            let options = self.build_options();
            ContextManager::preflight_check(messages, self.llm.as_ref())?;

            self.emitter.emit(ConductorEvent::ConversationTurn {
                metadata: self.emitter.metadata("turn_loop"),
                turn,
                messages: serde_json::to_value(&*messages).unwrap_or(serde_json::Value::Null),
            });

            let response = self.generate_with_fallback(messages, &options).await?;
            self.record_usage(&response.usage);

            let Some(choice) = response.first_choice().cloned() else {
                return Err(RuntimeError::Llm(conductor_llm::LlmError::InvalidResponse(
                    "provider returned zero choices".to_string(),
                )));
            };

            // Split: text and tool calls go into separate assistant messages,
            // never mixed in one (some providers reject mixed parts).
            if let Some(text) = choice.content.clone() {
                if !text.is_empty() {
                    messages.push(Message::assistant(text.clone()));
                    last_response = text;
                }
            }
            if choice.has_tool_calls() {
                messages.push(Message::assistant_tool_calls(choice.tool_calls.clone()));
            }

            if !choice.has_tool_calls() {
                let text = choice.content.unwrap_or_default();
                self.emitter.emit(ConductorEvent::UnifiedCompletion {
                    metadata: self.emitter.metadata("turn_loop"),
                    text: text.clone(),
                    turns: turn + 1,
                });
                return Ok(text);
            }

            if cancelled() {
                return self.cancel("tool_dispatch");
            }

            let batch = self
                .executor
                .execute_batch(
                    &choice.tool_calls,
                    &self.session,
                    &self.emitter,
                    &mut self.loop_detector,
                    self.config.parallel_tools,
                    cancelled,
                )
                .await?;

            for message in &batch.messages {
                for part in &message.parts {
                    if let ContentPart::ToolResult(result) = part {
                        self.context.record_tool_result(result.tool_call_id.clone(), turn);
                    }
                }
            }
            messages.extend(batch.messages);

            if batch.catalog_dirty {
                if let Some(active) = self.virtual_dispatcher.active_tools().await {
                    self.active_tools = active;
                }
            }

            turn += 1;
        }
    }

    fn ensure_system_prompt(&self, messages: &mut Vec<Message>) -> RuntimeResult<()> {
        if messages.iter().any(|m| m.role == MessageRole::System) {
            return Ok(());
        }
        match &self.system_prompt {
            Some(prompt) => {
                messages.insert(0, Message::system(prompt.clone()));
                Ok(())
            },
            None => Err(RuntimeError::MissingSystemPrompt),
        }
    }

    fn build_options(&self) -> GenerateOptions {
        let mut options = GenerateOptions::new()
            .with_max_tokens(self.config.default_max_tokens)
            .with_tools(ToolCatalog::to_llm_definitions(&self.active_tools))
            .with_tool_choice(self.config.tool_choice.clone());
        if !self.config.reasoning_model {
            if let Some(temperature) = self.config.temperature {
                options = options.with_temperature(temperature);
            }
        }
        options
    }

    /// Call the primary provider; on an empty-content response (no text, no
    /// tool calls -- distinct from a provider-level error), try each
    /// configured fallback once, in order, keeping the first non-empty
    /// response.
    async fn generate_with_fallback(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> RuntimeResult<GenerateResponse> {
        self.emitter.emit(ConductorEvent::LlmGenerationStart {
            metadata: self.emitter.metadata("turn_loop"),
            model_id: self.llm.model_id().to_string(),
        });

        let primary = self.llm.generate(messages, options).await;
        let primary = match primary {
            Ok(response) => response,
            Err(error) => {
                self.emitter.emit(ConductorEvent::LlmGenerationEnd {
                    metadata: self.emitter.metadata("turn_loop"),
                    success: false,
                    usage: None,
                });
                return Err(RuntimeError::Llm(error));
            },
        };

        if !is_empty_response(&primary) {
            self.emitter.emit(ConductorEvent::LlmGenerationEnd {
                metadata: self.emitter.metadata("turn_loop"),
                success: true,
                usage: Some(usage_json(&primary.usage)),
            });
            return Ok(primary);
        }

        self.emitter.emit(ConductorEvent::LlmGenerationEnd {
            metadata: self.emitter.metadata("turn_loop"),
            success: false,
            usage: None,
        });
        warn!("empty-content response from primary provider, trying fallback chain");

        for fallback in &self.fallback_llms {
            self.emitter.emit(ConductorEvent::LlmGenerationStart {
                metadata: self.emitter.metadata("turn_loop"),
                model_id: fallback.model_id().to_string(),
            });
            match fallback.generate(messages, options).await {
                Ok(response) if !is_empty_response(&response) => {
                    self.emitter.emit(ConductorEvent::LlmGenerationEnd {
                        metadata: self.emitter.metadata("turn_loop"),
                        success: true,
                        usage: Some(usage_json(&response.usage)),
                    });
                    return Ok(response);
                },
                _ => {
                    self.emitter.emit(ConductorEvent::LlmGenerationEnd {
                        metadata: self.emitter.metadata("turn_loop"),
                        success: false,
                        usage: None,
                    });
                },
            }
        }

        // No fallback produced anything better; hand back the primary's
        // empty response rather than failing the turn outright.
        Ok(primary)
    }

    async fn forced_final_answer(
        &mut self,
        messages: &mut Vec<Message>,
        turn: u32,
        last_response: String,
    ) -> RuntimeResult<String> {
        messages.push(Message::human(
            "You have used all available turns. Provide your final answer now, based only on \
             the information already gathered above.",
        ));
        let options = GenerateOptions::new().with_max_tokens(self.config.default_max_tokens);

        self.emitter.emit(ConductorEvent::ConversationTurn {
            metadata: self.emitter.metadata("turn_loop"),
            turn,
            messages: serde_json::to_value(&*messages).unwrap_or(serde_json::Value::Null),
        });

        match self.llm.generate(messages, &options).await {
            Ok(response) => {
                self.record_usage(&response.usage);
                let text = response.first_choice().and_then(|c| c.content.clone()).unwrap_or(last_response);
                messages.push(Message::assistant(text.clone()));
                self.emitter.emit(ConductorEvent::UnifiedCompletion {
                    metadata: self.emitter.metadata("turn_loop"),
                    text: text.clone(),
                    turns: turn + 1,
                });
                Ok(text)
            },
            Err(error) => {
                warn!(error = %error, "forced final-answer call failed, returning last response");
                Ok(last_response)
            },
        }
    }

    fn record_usage(&mut self, usage: &Usage) {
        let metadata = self.llm.model_metadata(self.llm.model_id());
        let ledger = &mut self.token_ledger;
        ledger.cumulative_prompt = ledger.cumulative_prompt.saturating_add(usage.input as u64);
        ledger.cumulative_completion = ledger.cumulative_completion.saturating_add(usage.output as u64);
        ledger.cumulative_cache = ledger.cumulative_cache.saturating_add(usage.cache as u64);
        ledger.cumulative_reasoning = ledger.cumulative_reasoning.saturating_add(usage.reasoning as u64);
        ledger.current_context_window_usage = usage.input;
        ledger.model_context_window = self.llm.max_context_length();
        ledger.llm_call_count = ledger.llm_call_count.saturating_add(1);
        if usage.cache > 0 {
            ledger.cache_enabled_call_count = ledger.cache_enabled_call_count.saturating_add(1);
        }
        if let Some(meta) = metadata {
            ledger.cumulative_cost_usd += call_cost_usd(usage, &meta);
        }

        self.emitter.emit(ConductorEvent::TokenUsage {
            metadata: self.emitter.metadata("turn_loop"),
            prompt: usage.input as u64,
            completion: usage.output as u64,
            cache: usage.cache as u64,
            reasoning: usage.reasoning as u64,
        });
    }

    fn cancel<T>(&self, stage: &str) -> RuntimeResult<T> {
        self.emitter.emit(ConductorEvent::Cancelled {
            metadata: self.emitter.metadata("turn_loop"),
            stage: stage.to_string(),
        });
        Err(RuntimeError::Cancelled { stage: stage.to_string() })
    }
}

/// An "empty-content" response: no text and no tool calls. Distinct from a
/// provider-level error, which surfaces immediately instead of triggering
/// the fallback chain.
fn is_empty_response(response: &GenerateResponse) -> bool {
    match response.first_choice() {
        None => true,
        Some(choice) => choice.content.as_deref().unwrap_or("").is_empty() && choice.tool_calls.is_empty(),
    }
}

fn usage_json(usage: &Usage) -> serde_json::Value {
    serde_json::json!({
        "input": usage.input,
        "output": usage.output,
        "cache": usage.cache,
        "reasoning": usage.reasoning,
    })
}

fn call_cost_usd(usage: &Usage, meta: &ModelMetadata) -> f64 {
    let billable_input = usage.input.saturating_sub(usage.cache) as f64;
    billable_input / 1_000_000.0 * meta.input_cost_per_1m
        + usage.cache as f64 / 1_000_000.0 * meta.cached_input_cost_per_1m
        + usage.output as f64 / 1_000_000.0 * meta.output_cost_per_1m
        + usage.reasoning as f64 / 1_000_000.0 * meta.reasoning_cost_per_1m.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_events::EventBus;
    use conductor_llm::{ScriptedProvider, ScriptedToolCall, ScriptedTurn};
    use conductor_mcp::McpRegistry;
    use conductor_tools::ToolOutputStore;
    use std::path::PathBuf;

    fn executor() -> ParallelToolExecutor {
        let catalog = Arc::new(ToolCatalog::new());
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        ParallelToolExecutor::new(catalog, dispatcher, registry, store, "scripted")
    }

    fn context() -> ContextManager {
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        ContextManager::new(store)
    }

    fn dispatcher() -> Arc<VirtualToolDispatcher> {
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        Arc::new(VirtualToolDispatcher::new(store))
    }

    #[tokio::test]
    async fn happy_path_text_only_response_ends_immediately() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text("The answer is 4.")]);
        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut turn_loop = TurnLoop::new(
            Arc::new(llm),
            executor(),
            context(),
            dispatcher(),
            Vec::new(),
            Some("be helpful".to_string()),
            emitter,
            SessionId::global(),
            TurnLoopConfig::default(),
        );

        let mut messages = vec![Message::human("What is 2+2?")];
        let answer = turn_loop.run(&mut messages, || false).await.unwrap();
        assert_eq!(answer, "The answer is 4.");
        assert_eq!(messages.last().unwrap().text().as_deref(), Some("The answer is 4."));
    }

    #[tokio::test]
    async fn tool_call_then_text_completes_in_two_turns() {
        let llm = ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(vec![ScriptedToolCall::with_id("call-1", "calc", serde_json::json!({"a": 2, "b": 2}))]),
            ScriptedTurn::text("The answer is 4."),
        ]);
        let mut catalog = ToolCatalog::new();
        let exec: conductor_tools::CustomToolExecutor = Arc::new(|args| {
            Box::pin(async move {
                let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok((a + b).to_string())
            })
        });
        catalog.register_custom(
            conductor_tools::CustomTool::new(
                conductor_tools::ToolDescriptor::custom("calc", "adds", serde_json::Value::Null, "math"),
                exec,
            )
            .unwrap(),
        );
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        let exec = ParallelToolExecutor::new(Arc::new(catalog), dispatcher.clone(), registry, store, "scripted");

        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut turn_loop = TurnLoop::new(
            Arc::new(llm),
            exec,
            context(),
            dispatcher,
            Vec::new(),
            Some("be helpful".to_string()),
            emitter,
            SessionId::global(),
            TurnLoopConfig::default(),
        );

        let mut messages = vec![Message::human("What is 2+2?")];
        let answer = turn_loop.run(&mut messages, || false).await.unwrap();
        assert_eq!(answer, "The answer is 4.");
        assert!(messages.iter().any(|m| matches!(m.parts.first(), Some(ContentPart::ToolResult(_)))));
    }

    #[tokio::test]
    async fn missing_system_prompt_without_config_errors() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text("hi")]);
        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut turn_loop = TurnLoop::new(
            Arc::new(llm),
            executor(),
            context(),
            dispatcher(),
            Vec::new(),
            None,
            emitter,
            SessionId::global(),
            TurnLoopConfig::default(),
        );

        let mut messages = vec![Message::human("hi")];
        let result = turn_loop.run(&mut messages, || false).await;
        assert!(matches!(result, Err(RuntimeError::MissingSystemPrompt)));
    }

    #[tokio::test]
    async fn max_turns_reached_forces_final_answer() {
        let llm = ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(vec![ScriptedToolCall::with_id("c1", "loop_tool", serde_json::json!({}))]),
            ScriptedTurn::text("final answer after running out of turns"),
        ]);
        let mut catalog = ToolCatalog::new();
        let exec: conductor_tools::CustomToolExecutor = Arc::new(|_| Box::pin(async { Ok("ok".to_string()) }));
        catalog.register_custom(
            conductor_tools::CustomTool::new(
                conductor_tools::ToolDescriptor::custom("loop_tool", "d", serde_json::Value::Null, "misc"),
                exec,
            )
            .unwrap(),
        );
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        let exec = ParallelToolExecutor::new(Arc::new(catalog), dispatcher.clone(), registry, store, "scripted");

        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut config = TurnLoopConfig::default();
        config.max_turns = 1;
        let mut turn_loop = TurnLoop::new(
            Arc::new(llm),
            exec,
            context(),
            dispatcher,
            Vec::new(),
            Some("be helpful".to_string()),
            emitter,
            SessionId::global(),
            config,
        );

        let mut messages = vec![Message::human("go")];
        let answer = turn_loop.run(&mut messages, || false).await.unwrap();
        assert_eq!(answer, "final answer after running out of turns");
    }
}
