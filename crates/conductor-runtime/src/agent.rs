//! Agent Facade (C10): the multi-session entry point. Builds the tool
//! catalog and active set fresh on every call (so newly registered custom
//! tools are always visible), restores per-session context/ledger/loop-
//! detector state into a fresh [`TurnLoop`], and exposes the two
//! structured-output shapes on top of plain `ask`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::SessionId;
use conductor_events::{EventBus, EventEmitter};
use conductor_llm::{LlmProvider, Message, ToolChoice};
use conductor_mcp::{McpClient, McpRegistry, ServersConfig};
use conductor_tools::{
    always_on_descriptors, code_execution_descriptors, mcp_bridge_descriptors, CodeExecutionBackend, CustomTool,
    CustomToolExecutor, LoopDetector, ToolCatalog, ToolDescriptor, ToolFilter, ToolKind, ToolOutputStore,
    ToolSearchMode, TimeoutPolicy, VirtualToolDispatcher,
};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::context::{CompactionConfig, ContextManager, SummarizationConfig, TokenLedger};
use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::{ParallelToolExecutor, DEFAULT_TOOL_TIMEOUT};
use crate::turn_loop::{TurnLoop, TurnLoopConfig, DEFAULT_MAX_TOKENS, DEFAULT_MAX_TURNS};

/// Per-agent options consulted when building the catalog and every turn
/// loop call.
pub struct AgentOptions {
    /// System prompt inserted at the front of every fresh conversation.
    pub system_prompt: Option<String>,
    /// Turn index at which a forced final answer is produced.
    pub max_turns: u32,
    /// `max_tokens` sent on every LLM call.
    pub default_max_tokens: usize,
    /// Sampling temperature; omitted for reasoning-only models.
    pub temperature: Option<f64>,
    /// Tool-calling policy sent to the model.
    pub tool_choice: ToolChoice,
    /// Whether the bound model is reasoning-only.
    pub reasoning_model: bool,
    /// Whether tool batches run in parallel or sequentially.
    pub parallel_tools: bool,
    /// Server/tool/category allowlist applied to the full catalog.
    pub tool_filter: ToolFilter,
    /// Whether the catalog is hidden behind search/add indirection.
    pub tool_search_mode: bool,
    /// Tools pre-activated in tool-search mode without an explicit `add_tool`.
    pub pre_discovered_tools: Vec<String>,
    /// Agent-wide default tool timeout.
    pub default_tool_timeout: Duration,
    /// Stale tool-result compaction settings.
    pub compaction: CompactionConfig,
    /// Summarization trigger settings.
    pub summarization: SummarizationConfig,
    /// Directory oversized tool output is offloaded under.
    pub offload_root: PathBuf,
    /// Offload threshold, in tokens.
    pub offload_threshold: usize,
    /// Absolute hard cap, in tokens.
    pub offload_hard_cap: usize,
    /// Retention age for the periodic offload sweep.
    pub offload_retention: Duration,
    /// Whether closing a session deletes its offloaded files immediately.
    pub cleanup_output_on_session_close: bool,
    /// Provider name driving `read_image`'s image-part ordering.
    pub image_provider_name: String,
    /// Code-execution discovery backend, if this agent supports it.
    pub code_backend: Option<Arc<dyn CodeExecutionBackend>>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_turns: DEFAULT_MAX_TURNS,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            tool_choice: ToolChoice::Auto,
            reasoning_model: false,
            parallel_tools: true,
            tool_filter: ToolFilter::unrestricted(),
            tool_search_mode: false,
            pre_discovered_tools: Vec::new(),
            default_tool_timeout: DEFAULT_TOOL_TIMEOUT,
            compaction: CompactionConfig::default(),
            summarization: SummarizationConfig::default(),
            offload_root: std::env::temp_dir().join("conductor-tool-output"),
            offload_threshold: conductor_tools::DEFAULT_OFFLOAD_THRESHOLD,
            offload_hard_cap: conductor_tools::DEFAULT_HARD_CAP,
            offload_retention: conductor_tools::DEFAULT_RETENTION,
            cleanup_output_on_session_close: false,
            image_provider_name: "unknown".to_string(),
            code_backend: None,
        }
    }
}

/// Snapshot of one session's accumulated token/cost bookkeeping.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Total prompt tokens reported across every call in this session.
    pub cumulative_prompt_tokens: u64,
    /// Total completion tokens reported.
    pub cumulative_completion_tokens: u64,
    /// Total cache-read tokens reported.
    pub cumulative_cache_tokens: u64,
    /// Total reasoning tokens reported.
    pub cumulative_reasoning_tokens: u64,
    /// Accumulated USD cost.
    pub cumulative_cost_usd: f64,
    /// Most recent call's prompt size as a fraction of the model's window.
    pub context_window_usage_fraction: f64,
    /// Number of LLM calls made in this session.
    pub llm_call_count: u64,
    /// Number of messages currently tracked for this session.
    pub message_count: usize,
}

struct SessionState {
    messages: Vec<Message>,
    context: ContextManager,
    token_ledger: TokenLedger,
    loop_detector: LoopDetector,
}

impl SessionState {
    fn new(output_store: &Arc<ToolOutputStore>, options: &AgentOptions) -> Self {
        Self {
            messages: Vec::new(),
            context: ContextManager::new(Arc::clone(output_store))
                .with_compaction(options.compaction.clone())
                .with_summarization(options.summarization.clone()),
            token_ledger: TokenLedger::default(),
            loop_detector: LoopDetector::new(),
        }
    }
}

/// Multi-session facade over the turn loop: builds the catalog, restores
/// per-session state, and runs one call to completion.
pub struct Agent {
    llm: Arc<dyn LlmProvider>,
    fallback_llms: Vec<Arc<dyn LlmProvider>>,
    mcp_registry: Arc<McpRegistry>,
    output_store: Arc<ToolOutputStore>,
    virtual_dispatcher: Arc<VirtualToolDispatcher>,
    mcp_tool_cache: Vec<conductor_mcp::ToolDefinition>,
    custom_tools: RwLock<Vec<CustomTool>>,
    options: AgentOptions,
    event_bus: EventBus,
    sessions: DashMap<SessionId, Mutex<SessionState>>,
}

impl Agent {
    /// Build an agent from a config file (or the default config path, if
    /// `config_path` is `None`) describing its MCP servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or an auto-start MCP
    /// server fails to connect.
    pub async fn new(llm: Arc<dyn LlmProvider>, config_path: Option<&Path>, options: AgentOptions) -> RuntimeResult<Self> {
        let servers_config = match config_path {
            Some(path) => ServersConfig::load(path).map_err(RuntimeError::Mcp)?,
            None => ServersConfig::load_default().map_err(RuntimeError::Mcp)?,
        };
        Self::with_servers_config(llm, servers_config, options).await
    }

    /// Build an agent from an already-loaded MCP servers configuration,
    /// bypassing file I/O (used directly by tests and by callers that
    /// already have a [`ServersConfig`]).
    ///
    /// # Errors
    ///
    /// Returns an error if an auto-start MCP server fails to connect.
    pub async fn with_servers_config(
        llm: Arc<dyn LlmProvider>,
        servers_config: ServersConfig,
        options: AgentOptions,
    ) -> RuntimeResult<Self> {
        let client = McpClient::with_config(servers_config);
        client.connect_auto_servers().await.map_err(RuntimeError::Mcp)?;
        let mcp_registry = Arc::new(McpRegistry::new(client));
        let mcp_tool_cache = mcp_registry.list_tools().await;

        let output_store = Arc::new(
            ToolOutputStore::new(options.offload_root.clone())
                .with_offload_threshold(options.offload_threshold)
                .with_hard_cap(options.offload_hard_cap),
        );

        let mut dispatcher = VirtualToolDispatcher::new(Arc::clone(&output_store));
        if let Some(backend) = options.code_backend.clone() {
            dispatcher = dispatcher.with_code_backend(backend);
        }
        if options.tool_search_mode {
            let mut initial = ToolCatalog::new();
            for tool in &mcp_tool_cache {
                initial.register_mcp(tool);
            }
            for descriptor in virtual_descriptors(&options) {
                initial.register_virtual(descriptor);
            }
            let filtered = initial.filtered(&options.tool_filter);
            dispatcher = dispatcher.with_search_mode(ToolSearchMode::new(filtered, &options.pre_discovered_tools));
        }

        Ok(Self {
            llm,
            fallback_llms: Vec::new(),
            mcp_registry,
            output_store,
            virtual_dispatcher: Arc::new(dispatcher),
            mcp_tool_cache,
            custom_tools: RwLock::new(Vec::new()),
            options,
            event_bus: EventBus::new(),
            sessions: DashMap::new(),
        })
    }

    /// Attach a cross-provider fallback chain, tried when the primary
    /// provider returns an empty-content response.
    #[must_use]
    pub fn with_fallback_llms(mut self, fallbacks: Vec<Arc<dyn LlmProvider>>) -> Self {
        self.fallback_llms = fallbacks;
        self
    }

    /// The event bus every session's [`EventEmitter`] publishes to.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Register (or replace, by name) a host-supplied custom tool.
    ///
    /// # Errors
    ///
    /// Returns an error if `category` is empty (the catalog requires a
    /// category on every custom tool).
    pub async fn register_custom_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        executor: CustomToolExecutor,
        category: impl Into<String>,
        timeout: Option<TimeoutPolicy>,
    ) -> RuntimeResult<()> {
        let mut descriptor = ToolDescriptor::custom(name, description, schema, category);
        if let Some(policy) = timeout {
            descriptor = descriptor.with_timeout_policy(policy);
        }
        let tool = CustomTool::new(descriptor, executor).map_err(RuntimeError::Catalog)?;
        let mut tools = self.custom_tools.write().await;
        tools.retain(|t| t.descriptor.name != tool.descriptor.name);
        tools.push(tool);
        Ok(())
    }

    /// Ask one question, continuing whatever history `session` already has.
    ///
    /// # Errors
    ///
    /// See [`TurnLoop::run`].
    pub async fn ask(&self, session: &SessionId, question: &str, cancelled: impl Fn() -> bool + Copy) -> RuntimeResult<String> {
        let question = question.to_string();
        self.run_turn(session, |messages| messages.push(Message::human(question)), cancelled).await
    }

    /// Ask against a caller-supplied message history, replacing whatever
    /// `session` had tracked.
    ///
    /// # Errors
    ///
    /// See [`TurnLoop::run`].
    pub async fn ask_with_history(
        &self,
        session: &SessionId,
        history: Vec<Message>,
        cancelled: impl Fn() -> bool + Copy,
    ) -> RuntimeResult<String> {
        self.run_turn(session, |messages| *messages = history, cancelled).await
    }

    /// Post-hoc structured output: ask normally, then coerce the final text
    /// into `T`. A schema-guided instruction is appended to `question` so
    /// CLI-only providers without native function calling still produce
    /// parseable JSON; the response is parsed tolerantly (direct, fenced
    /// code stripped, or the outermost `{}`/`[]` span). If the first
    /// response doesn't parse, one reformat call is attempted before giving
    /// up.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StructuredOutputFailed`] if neither the
    /// original nor the reformatted response parses as `T`.
    pub async fn ask_structured<T: DeserializeOwned>(
        &self,
        session: &SessionId,
        question: &str,
        schema: &Value,
        cancelled: impl Fn() -> bool + Copy,
    ) -> RuntimeResult<T> {
        let prompted =
            format!("{question}\n\nRespond with ONLY valid JSON matching this schema, with no surrounding prose:\n{schema}");
        let text = self.ask(session, &prompted, cancelled).await?;
        if let Some(value) = try_parse::<T>(&text) {
            return Ok(value);
        }

        let reformat = format!(
            "Reformat the following content as JSON matching this schema, with no surrounding prose:\n\n\
             Schema:\n{schema}\n\nContent:\n{text}"
        );
        let reformatted = self.ask(session, &reformat, cancelled).await?;
        try_parse::<T>(&reformatted)
            .ok_or_else(|| RuntimeError::StructuredOutputFailed("response did not parse as the requested schema".to_string()))
    }

    /// Tool-gated structured output: register a one-shot custom tool whose
    /// schema matches `T`, run the conversation, and stop as soon as that
    /// tool is called, extracting `T` from its arguments. Falls through to
    /// parsing the plain text response if the tool is never called.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StructuredOutputFailed`] if the tool is never
    /// called and the plain text response isn't valid JSON for `T`, or if
    /// the captured arguments don't match `T`'s shape.
    #[allow(clippy::too_many_arguments)]
    pub async fn ask_with_history_structured_via_tool<T: DeserializeOwned>(
        &self,
        session: &SessionId,
        history: Vec<Message>,
        tool_name: impl Into<String>,
        tool_description: impl Into<String>,
        schema: Value,
        cancelled: impl Fn() -> bool + Copy,
    ) -> RuntimeResult<T> {
        let tool_name = tool_name.into();
        let captured: Arc<std::sync::Mutex<Option<Value>>> = Arc::new(std::sync::Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let captured_for_exec = Arc::clone(&captured);
        let stop_for_exec = Arc::clone(&stop);
        let executor: CustomToolExecutor = Arc::new(move |args| {
            let captured = Arc::clone(&captured_for_exec);
            let stop = Arc::clone(&stop_for_exec);
            Box::pin(async move {
                *captured.lock().expect("structured-output capture mutex poisoned") = Some(args);
                stop.store(true, Ordering::SeqCst);
                Ok("recorded".to_string())
            })
        });
        let descriptor = ToolDescriptor::custom(tool_name.clone(), tool_description, schema, "structured_output");
        let tool = CustomTool::new(descriptor, executor).map_err(RuntimeError::Catalog)?;
        {
            let mut tools = self.custom_tools.write().await;
            tools.retain(|t| t.descriptor.name != tool_name);
            tools.push(tool);
        }

        let combined_cancel = move || stop.load(Ordering::SeqCst) || cancelled();
        let result = self.run_turn(session, |messages| *messages = history, combined_cancel).await;

        {
            let mut tools = self.custom_tools.write().await;
            tools.retain(|t| t.descriptor.name != tool_name);
        }

        let take_captured = || captured.lock().expect("structured-output capture mutex poisoned").take();
        match result {
            Ok(text) => match take_captured() {
                Some(value) => serde_json::from_value(value).map_err(|e| RuntimeError::StructuredOutputFailed(e.to_string())),
                None => try_parse::<T>(&text).ok_or_else(|| {
                    RuntimeError::StructuredOutputFailed(
                        "the structured-output tool was never called and the response was not valid JSON".to_string(),
                    )
                }),
            },
            Err(RuntimeError::Cancelled { .. }) => match take_captured() {
                Some(value) => serde_json::from_value(value).map_err(|e| RuntimeError::StructuredOutputFailed(e.to_string())),
                None => Err(RuntimeError::StructuredOutputFailed(
                    "cancelled before the structured-output tool was called".to_string(),
                )),
            },
            Err(other) => Err(other),
        }
    }

    /// Release a session's tracked state; deletes its offloaded files too if
    /// `cleanup_output_on_session_close` is set.
    pub async fn close_session(&self, session: &SessionId) {
        if self.sessions.remove(session).is_some() && self.options.cleanup_output_on_session_close {
            self.output_store.cleanup_session(session).await;
        }
    }

    /// Close every tracked session.
    pub async fn close_all_sessions(&self) {
        let sessions: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for session in sessions {
            self.close_session(&session).await;
        }
    }

    /// Release all per-session runtime state. MCP server process lifetime is
    /// owned by the session connection registry, not by this facade, and is
    /// left untouched.
    pub async fn close(&self) {
        self.close_all_sessions().await;
    }

    /// Snapshot of `session`'s token/cost bookkeeping, or `None` if the
    /// session is unknown or is currently mid-call.
    #[must_use]
    pub fn get_session_stats(&self, session: &SessionId) -> Option<SessionStats> {
        let entry = self.sessions.get(session)?;
        let state = entry.try_lock().ok()?;
        Some(SessionStats {
            cumulative_prompt_tokens: state.token_ledger.cumulative_prompt,
            cumulative_completion_tokens: state.token_ledger.cumulative_completion,
            cumulative_cache_tokens: state.token_ledger.cumulative_cache,
            cumulative_reasoning_tokens: state.token_ledger.cumulative_reasoning,
            cumulative_cost_usd: state.token_ledger.cumulative_cost_usd,
            context_window_usage_fraction: state.token_ledger.usage_fraction(),
            llm_call_count: state.token_ledger.llm_call_count,
            message_count: state.messages.len(),
        })
    }

    async fn run_turn(
        &self,
        session: &SessionId,
        mutate_messages: impl FnOnce(&mut Vec<Message>),
        cancelled: impl Fn() -> bool + Copy,
    ) -> RuntimeResult<String> {
        let (catalog, active_tools) = self.build_catalog_and_active().await;
        let executor = ParallelToolExecutor::new(
            catalog,
            Arc::clone(&self.virtual_dispatcher),
            Arc::clone(&self.mcp_registry),
            Arc::clone(&self.output_store),
            self.options.image_provider_name.clone(),
        )
        .with_default_timeout(self.options.default_tool_timeout);

        let entry = self
            .sessions
            .entry(session.clone())
            .or_insert_with(|| Mutex::new(SessionState::new(&self.output_store, &self.options)));
        let mut state = entry.lock().await;
        mutate_messages(&mut state.messages);

        let context = std::mem::replace(&mut state.context, ContextManager::new(Arc::clone(&self.output_store)));
        let token_ledger = std::mem::take(&mut state.token_ledger);
        let loop_detector = std::mem::replace(&mut state.loop_detector, LoopDetector::new());

        let config = TurnLoopConfig {
            max_turns: self.options.max_turns,
            default_max_tokens: self.options.default_max_tokens,
            temperature: self.options.temperature,
            tool_choice: self.options.tool_choice.clone(),
            reasoning_model: self.options.reasoning_model,
            parallel_tools: self.options.parallel_tools,
        };
        let emitter = EventEmitter::new(session.clone(), self.event_bus.clone());

        let mut turn_loop = TurnLoop::new(
            Arc::clone(&self.llm),
            executor,
            ContextManager::new(Arc::clone(&self.output_store)),
            Arc::clone(&self.virtual_dispatcher),
            active_tools,
            self.options.system_prompt.clone(),
            emitter,
            session.clone(),
            config,
        )
        .with_fallback_llms(self.fallback_llms.clone())
        .with_state(context, token_ledger, loop_detector);

        let result = turn_loop.run(&mut state.messages, cancelled).await;
        let (context, token_ledger, loop_detector) = turn_loop.into_state();
        state.context = context;
        state.token_ledger = token_ledger;
        state.loop_detector = loop_detector;
        result
    }

    /// Rebuild the catalog from the stable MCP cache, the virtual
    /// descriptors, and the current custom-tool list, then resolve the
    /// active set: the tool-search-mode discovered set (or the fully
    /// filtered catalog, if search mode is off) plus every admitted custom
    /// tool, unconditionally -- custom tools always bypass tool-search-mode
    /// indirection since they can be registered after the dispatcher's
    /// search state was built.
    async fn build_catalog_and_active(&self) -> (Arc<ToolCatalog>, Vec<ToolDescriptor>) {
        let mut catalog = ToolCatalog::new();
        for tool in &self.mcp_tool_cache {
            catalog.register_mcp(tool);
        }
        for descriptor in virtual_descriptors(&self.options) {
            catalog.register_virtual(descriptor);
        }
        let customs = self.custom_tools.read().await;
        for tool in customs.iter() {
            catalog.register_custom(tool.clone());
        }
        drop(customs);

        let active = if self.virtual_dispatcher.search_mode_enabled() {
            let mut active = self.virtual_dispatcher.active_tools().await.unwrap_or_default();
            active.extend(
                catalog
                    .all()
                    .filter(|d| d.kind == ToolKind::Custom && self.options.tool_filter.admits(d))
                    .cloned(),
            );
            active
        } else {
            catalog.filtered(&self.options.tool_filter)
        };

        (Arc::new(catalog), active)
    }
}

fn virtual_descriptors(options: &AgentOptions) -> Vec<ToolDescriptor> {
    let mut descriptors: Vec<ToolDescriptor> = always_on_descriptors().into_iter().chain(mcp_bridge_descriptors()).collect();
    if options.code_backend.is_some() {
        descriptors.extend(code_execution_descriptors());
    }
    descriptors
}

fn try_parse<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Some(value);
    }
    let extracted = extract_json_text(text)?;
    serde_json::from_str(&extracted).ok()
}

/// Tolerant JSON extraction: strip a fenced code block if present, then
/// fall back to the outermost `{}`/`[]` span in the text.
fn extract_json_text(text: &str) -> Option<String> {
    let stripped = strip_fenced_code(text.trim());
    if serde_json::from_str::<Value>(&stripped).is_ok() {
        return Some(stripped);
    }
    outermost_json_span(&stripped).or_else(|| outermost_json_span(text.trim()))
}

fn strip_fenced_code(text: &str) -> String {
    let Some(rest) = text.strip_prefix("```") else {
        return text.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest).trim_start_matches('\n');
    match rest.rfind("```") {
        Some(end) => rest[..end].trim().to_string(),
        None => rest.trim().to_string(),
    }
}

fn outermost_json_span(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let close = if text.as_bytes()[start] == b'{' { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_llm::{ScriptedProvider, ScriptedTurn};
    use serde::Deserialize;

    fn agent_options() -> AgentOptions {
        AgentOptions {
            system_prompt: Some("be helpful".to_string()),
            offload_root: std::env::temp_dir().join("conductor-agent-tests"),
            ..AgentOptions::default()
        }
    }

    async fn agent(llm: ScriptedProvider) -> Agent {
        Agent::with_servers_config(Arc::new(llm), ServersConfig::default(), agent_options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ask_returns_text_and_persists_session_history() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text("4"), ScriptedTurn::text("8")]);
        let agent = agent(llm).await;
        let session = SessionId::new("s1");

        let first = agent.ask(&session, "2+2?", || false).await.unwrap();
        assert_eq!(first, "4");
        let second = agent.ask(&session, "and doubled?", || false).await.unwrap();
        assert_eq!(second, "8");

        let stats = agent.get_session_stats(&session).unwrap();
        assert!(stats.message_count >= 4, "both turns' messages should accumulate");
    }

    #[tokio::test]
    async fn register_custom_tool_is_visible_on_the_next_call() {
        let llm = ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(vec![conductor_llm::ScriptedToolCall::with_id(
                "c1",
                "calc",
                serde_json::json!({"a": 2, "b": 3}),
            )]),
            ScriptedTurn::text("5"),
        ]);
        let agent = agent(llm).await;
        let exec: CustomToolExecutor = Arc::new(|args| {
            Box::pin(async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok((a + b).to_string())
            })
        });
        agent
            .register_custom_tool("calc", "adds two numbers", Value::Null, exec, "math", None)
            .await
            .unwrap();

        let session = SessionId::new("s1");
        let answer = agent.ask(&session, "what is 2+3?", || false).await.unwrap();
        assert_eq!(answer, "5");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: i64,
    }

    #[tokio::test]
    async fn ask_structured_parses_direct_json_response() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text(r#"{"value": 42}"#)]);
        let agent = agent(llm).await;
        let session = SessionId::new("s1");
        let schema = serde_json::json!({"type": "object", "properties": {"value": {"type": "integer"}}});
        let answer: Answer = agent.ask_structured(&session, "what is the answer?", &schema, || false).await.unwrap();
        assert_eq!(answer, Answer { value: 42 });
    }

    #[tokio::test]
    async fn ask_structured_falls_back_to_reformat_call() {
        let llm = ScriptedProvider::new(vec![
            ScriptedTurn::text("the answer is forty-two, not JSON"),
            ScriptedTurn::text(r#"{"value": 42}"#),
        ]);
        let agent = agent(llm).await;
        let session = SessionId::new("s1");
        let schema = serde_json::json!({"type": "object", "properties": {"value": {"type": "integer"}}});
        let answer: Answer = agent.ask_structured(&session, "what is the answer?", &schema, || false).await.unwrap();
        assert_eq!(answer, Answer { value: 42 });
    }

    #[tokio::test]
    async fn structured_via_tool_extracts_captured_arguments() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::tool_calls(vec![conductor_llm::ScriptedToolCall::with_id(
            "c1",
            "submit_answer",
            serde_json::json!({"value": 7}),
        )])]);
        let agent = agent(llm).await;
        let session = SessionId::new("s1");
        let schema = serde_json::json!({"type": "object", "properties": {"value": {"type": "integer"}}});
        let history = vec![Message::human("what is the answer?")];
        let answer: Answer = agent
            .ask_with_history_structured_via_tool(&session, history, "submit_answer", "submits the final answer", schema, || {
                false
            })
            .await
            .unwrap();
        assert_eq!(answer, Answer { value: 7 });
    }

    #[tokio::test]
    async fn close_session_removes_tracked_state() {
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text("hi")]);
        let agent = agent(llm).await;
        let session = SessionId::new("s1");
        agent.ask(&session, "hello", || false).await.unwrap();
        assert!(agent.get_session_stats(&session).is_some());
        agent.close_session(&session).await;
        assert!(agent.get_session_stats(&session).is_none());
    }

    #[test]
    fn outermost_json_span_strips_surrounding_prose() {
        let text = "here you go: {\"value\": 1} thanks";
        assert_eq!(outermost_json_span(text), Some("{\"value\": 1}".to_string()));
    }

    #[test]
    fn strip_fenced_code_removes_markdown_fence() {
        let text = "```json\n{\"value\": 1}\n```";
        assert_eq!(strip_fenced_code(text), "{\"value\": 1}");
    }
}
