//! Parallel Tool Executor (C8): Phase 1 (sequential prepare), Phase 2
//! (parallel execute, no shared state), Phase 3 (sequential assemble).

use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor_core::SessionId;
use conductor_events::{ConductorEvent, EventEmitter};
use conductor_llm::{ContentPart, Message, ToolCall, ToolCallResult};
use conductor_mcp::McpRegistry;
use conductor_tools::{
    dispatch_mcp_bridge, extract_content, virtual_tool_names as vnames, Detection, LoopDetector, ToolCatalog,
    ToolKind, ToolOutputStore, VirtualToolDispatcher, ADD_TOOL,
};
use tracing::{info, instrument, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// Per-tool timeout absent any override or agent configuration.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Whether a provider expects the image part before or after the
/// accompanying text part in the synthesized `read_image` human message.
///
/// Keyed by the provider name returned by [`conductor_llm::LlmProvider::name`].
#[must_use]
pub fn image_first_for_provider(provider_name: &str) -> bool {
    matches!(provider_name, "anthropic" | "bedrock")
}

/// The concrete backend a resolved plan will dispatch to.
#[derive(Debug, Clone)]
enum Backend {
    Virtual,
    McpBridge,
    Custom,
    Mcp { server: String },
}

/// Phase 1 output: either a ready-to-dispatch plan or an already-finished
/// preflight error.
enum Plan {
    Ready {
        call: ToolCall,
        backend: Backend,
        timeout: Option<Duration>,
    },
    Preflight {
        call: ToolCall,
        error: String,
    },
}

/// Outcome of running one plan in Phase 2, written to its own indexed slot.
struct Outcome {
    call: ToolCall,
    result: Result<String, String>,
    /// Set only for a successful `read_image` dispatch: the extra `Human`
    /// message to append right after the tool-response message.
    image_followup: Option<Message>,
    duration: Duration,
    /// Set when this call's MCP server looked dead and a single
    /// reconnect-and-retry recovered it (server name, for the
    /// `broken_pipe_detected`/`broken_pipe_retry_success` events).
    broken_pipe_recovery: Option<String>,
}

/// Runs the three-phase tool-execution protocol against one batch of tool
/// calls from a single assistant turn.
pub struct ParallelToolExecutor {
    catalog: Arc<ToolCatalog>,
    virtual_dispatcher: Arc<VirtualToolDispatcher>,
    mcp_registry: Arc<McpRegistry>,
    output_store: Arc<ToolOutputStore>,
    default_timeout: Duration,
    image_provider_name: String,
}

impl ParallelToolExecutor {
    /// Build an executor bound to one agent's catalog, virtual-tool
    /// dispatcher, MCP registry, and tool output store.
    #[must_use]
    pub fn new(
        catalog: Arc<ToolCatalog>,
        virtual_dispatcher: Arc<VirtualToolDispatcher>,
        mcp_registry: Arc<McpRegistry>,
        output_store: Arc<ToolOutputStore>,
        image_provider_name: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            virtual_dispatcher,
            mcp_registry,
            output_store,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            image_provider_name: image_provider_name.into(),
        }
    }

    /// Override the agent-wide default tool timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run one batch of tool calls to completion, returning the messages to
    /// append to the conversation (in plan order) and whether any call
    /// activated a new tool via `add_tool` (catalog-dirty signal for the
    /// caller to rebuild the active tool list).
    ///
    /// # Errors
    ///
    /// Returns an error only if the batch is cancelled before Phase 2 is
    /// launched; individual tool failures never surface here, they are
    /// folded into the returned messages instead.
    #[instrument(skip_all, fields(batch_size = calls.len(), parallel))]
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        session: &SessionId,
        emitter: &EventEmitter,
        loop_detector: &mut LoopDetector,
        parallel: bool,
        cancelled: impl Fn() -> bool,
    ) -> RuntimeResult<BatchResult> {
        // Phase 1: sequential prepare.
        let plans = self.prepare(calls, emitter);

        if cancelled() {
            emitter.emit(ConductorEvent::Cancelled {
                metadata: emitter.metadata("executor"),
                stage: "tool_dispatch".to_string(),
            });
            return Err(RuntimeError::Cancelled {
                stage: "tool_dispatch".to_string(),
            });
        }

        // Phase 2: execute, in parallel via tokio::spawn or one at a time
        // depending on the agent's configuration. Either way Phase 3
        // assembles in plan order.
        let outcomes = if parallel {
            self.dispatch_parallel(plans, session).await
        } else {
            self.dispatch_sequential(plans, session).await
        };

        // Phase 3: sequential assemble.
        Ok(self.assemble(outcomes, session, emitter, loop_detector).await)
    }

    fn prepare(&self, calls: &[ToolCall], emitter: &EventEmitter) -> Vec<Plan> {
        calls
            .iter()
            .map(|call| {
                let plan = self.resolve_plan(call);
                emitter.emit(ConductorEvent::ToolCallStart {
                    metadata: emitter.metadata("executor"),
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                });
                plan
            })
            .collect()
    }

    fn resolve_plan(&self, call: &ToolCall) -> Plan {
        if call.name.trim().is_empty() {
            return Plan::Preflight {
                call: call.clone(),
                error: "empty tool name in tool call".to_string(),
            };
        }

        let descriptor = match self.catalog.require(&call.name) {
            Ok(d) => d,
            Err(e) => {
                return Plan::Preflight {
                    call: call.clone(),
                    error: e.to_string(),
                }
            },
        };

        let backend = match descriptor.kind {
            ToolKind::Custom => Backend::Custom,
            ToolKind::Virtual if matches!(call.name.as_str(), vnames::GET_PROMPT | vnames::GET_RESOURCE) => {
                Backend::McpBridge
            },
            ToolKind::Virtual => Backend::Virtual,
            ToolKind::Mcp => match &descriptor.server {
                Some(server) => Backend::Mcp { server: server.clone() },
                None => {
                    return Plan::Preflight {
                        call: call.clone(),
                        error: format!("tool {} has no resolved MCP server", call.name),
                    }
                },
            },
        };

        let timeout = descriptor.timeout_policy.resolve(self.default_timeout);
        Plan::Ready {
            call: call.clone(),
            backend,
            timeout,
        }
    }

    /// Phase 2, parallel mode: one `tokio::spawn`'d task per plan, each
    /// writing only to its own indexed result slot.
    async fn dispatch_parallel(&self, plans: Vec<Plan>, session: &SessionId) -> Vec<Outcome> {
        let tasks = plans.into_iter().map(|plan| {
            let catalog = Arc::clone(&self.catalog);
            let virtual_dispatcher = Arc::clone(&self.virtual_dispatcher);
            let mcp_registry = Arc::clone(&self.mcp_registry);
            let session = session.clone();
            let image_provider_name = self.image_provider_name.clone();
            tokio::spawn(async move {
                Self::run_plan(&catalog, &virtual_dispatcher, &mcp_registry, &session, &image_provider_name, plan)
                    .await
            })
        });

        let mut outcomes = Vec::new();
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => {
                    warn!(error = %join_err, "tool task panicked");
                },
            }
        }
        outcomes
    }

    /// Phase 2, sequential mode: plans run one at a time in plan order, with
    /// no concurrency at all (used when the agent disables parallel tool
    /// execution).
    async fn dispatch_sequential(&self, plans: Vec<Plan>, session: &SessionId) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in plans {
            outcomes.push(
                Self::run_plan(
                    &self.catalog,
                    &self.virtual_dispatcher,
                    &self.mcp_registry,
                    session,
                    &self.image_provider_name,
                    plan,
                )
                .await,
            );
        }
        outcomes
    }

    async fn run_plan(
        catalog: &ToolCatalog,
        virtual_dispatcher: &VirtualToolDispatcher,
        mcp_registry: &McpRegistry,
        session: &SessionId,
        image_provider_name: &str,
        plan: Plan,
    ) -> Outcome {
        match plan {
            Plan::Preflight { call, error } => Outcome {
                call,
                result: Err(error),
                image_followup: None,
                duration: Duration::ZERO,
                broken_pipe_recovery: None,
            },
            Plan::Ready { call, backend, timeout } => {
                let started = Instant::now();
                let dispatch_fut = Self::dispatch_one(catalog, virtual_dispatcher, mcp_registry, session, &call, &backend);
                let (result, broken_pipe_recovery) = match timeout {
                    Some(duration) => match tokio::time::timeout(duration, dispatch_fut).await {
                        Ok(r) => r,
                        Err(_) => (Err(format!("tool `{}` timed out after {duration:?}", call.name)), None),
                    },
                    None => dispatch_fut.await,
                };

                let image_followup = if call.name == vnames::READ_IMAGE {
                    result
                        .as_ref()
                        .ok()
                        .map(|content| build_image_followup(content, image_first_for_provider(image_provider_name)))
                } else {
                    None
                };

                Outcome {
                    call,
                    result,
                    image_followup,
                    duration: started.elapsed(),
                    broken_pipe_recovery,
                }
            },
        }
    }

    async fn dispatch_one(
        catalog: &ToolCatalog,
        virtual_dispatcher: &VirtualToolDispatcher,
        mcp_registry: &McpRegistry,
        session: &SessionId,
        call: &ToolCall,
        backend: &Backend,
    ) -> (Result<String, String>, Option<String>) {
        match backend {
            Backend::Custom => {
                let result = match catalog.get_custom(&call.name) {
                    Some(tool) => tool.call(call.arguments.clone()).await,
                    None => Err(format!("unknown custom tool: {}", call.name)),
                };
                (result, None)
            },
            Backend::Virtual => (
                virtual_dispatcher.dispatch(session, &call.name, &call.arguments, catalog).await.map_err(|e| e.to_string()),
                None,
            ),
            Backend::McpBridge => (
                dispatch_mcp_bridge(mcp_registry, session, &call.name, &call.arguments).await.map_err(|e| e.to_string()),
                None,
            ),
            Backend::Mcp { server } => {
                let tool_name = call.parse_name().map_or(call.name.as_str(), |(_, t)| t);
                match mcp_registry.call_tool_with_recovery(session, server, tool_name, call.arguments.clone()).await {
                    Ok((result, recovered)) => {
                        (Ok(render_mcp_result(&result)), recovered.then(|| server.clone()))
                    },
                    Err(e) => (Err(e.to_string()), None),
                }
            },
        }
    }

    async fn assemble(
        &self,
        outcomes: Vec<Outcome>,
        session: &SessionId,
        emitter: &EventEmitter,
        loop_detector: &mut LoopDetector,
    ) -> BatchResult {
        let mut messages = Vec::with_capacity(outcomes.len() * 2);
        let mut catalog_dirty = false;
        let mut loop_correction: Option<String> = None;

        for outcome in outcomes {
            let (raw_content, is_error) = match &outcome.result {
                Ok(content) => (content.clone(), false),
                Err(error) => (error.clone(), true),
            };

            // Large/over-cap handling runs on the raw result, never on an
            // error message. Loop detection below still observes
            // `raw_content`, not the placeholder, so a tool that keeps
            // returning the same oversized blob is still caught even though
            // each offload gets a unique file path.
            let display_content = if is_error {
                raw_content.clone()
            } else if self.output_store.exceeds_hard_cap(&raw_content) {
                self.output_store.hard_cap_message(&outcome.call.name)
            } else if self.output_store.is_large(&raw_content) {
                let extracted = extract_content(&raw_content);
                match self.output_store.offload(session, &extracted, &outcome.call.name).await {
                    Ok(path) => self.output_store.build_placeholder(&path, &extracted),
                    Err(error) => {
                        warn!(%error, tool = %outcome.call.name, "failed to offload large tool output");
                        raw_content.clone()
                    },
                }
            } else {
                raw_content.clone()
            };

            messages.push(Message::tool_result(if is_error {
                ToolCallResult::error(outcome.call.id.clone(), outcome.call.name.clone(), display_content.clone())
            } else {
                ToolCallResult::success(outcome.call.id.clone(), outcome.call.name.clone(), display_content.clone())
            }));

            if let Some(followup) = outcome.image_followup {
                messages.push(followup);
            }

            if let Some(server_name) = &outcome.broken_pipe_recovery {
                emitter.emit(ConductorEvent::BrokenPipeDetected {
                    metadata: emitter.metadata("executor"),
                    server_name: server_name.clone(),
                    tool_name: outcome.call.name.clone(),
                });
                emitter.emit(ConductorEvent::BrokenPipeRetrySuccess {
                    metadata: emitter.metadata("executor"),
                    server_name: server_name.clone(),
                    tool_name: outcome.call.name.clone(),
                });
            }

            if is_error {
                emitter.emit(ConductorEvent::ToolCallError {
                    metadata: emitter.metadata("executor"),
                    tool_call_id: outcome.call.id.clone(),
                    tool_name: outcome.call.name.clone(),
                    error: display_content.clone(),
                });
            } else {
                emitter.emit(ConductorEvent::ToolCallEnd {
                    metadata: emitter.metadata("executor"),
                    tool_call_id: outcome.call.id.clone(),
                    tool_name: outcome.call.name.clone(),
                    duration_ms: outcome.duration.as_millis() as u64,
                });
                if outcome.call.name == ADD_TOOL {
                    catalog_dirty = true;
                }
            }

            if let Detection::Detected { correction_message, .. } =
                loop_detector.observe(&outcome.call.name, &outcome.call.arguments, &raw_content)
            {
                loop_correction = Some(correction_message);
            }
        }

        if let Some(correction) = &loop_correction {
            emitter.emit(ConductorEvent::ConversationError {
                metadata: emitter.metadata("executor"),
                kind: "loop_detection".to_string(),
                detail: correction.clone(),
            });
            emitter.emit(ConductorEvent::UserMessage {
                metadata: emitter.metadata("executor"),
                text: correction.clone(),
            });
            messages.push(Message::human(correction.clone()));
        }

        info!(messages = messages.len(), catalog_dirty, "tool batch assembled");
        BatchResult { messages, catalog_dirty }
    }
}

/// The messages and catalog-dirty signal produced by one executed batch.
pub struct BatchResult {
    /// Messages to append to the conversation, in plan order.
    pub messages: Vec<Message>,
    /// Whether `add_tool` succeeded during this batch and the active tool
    /// list must be rebuilt before the next LLM call.
    pub catalog_dirty: bool,
}

fn render_mcp_result(result: &conductor_mcp::ToolResult) -> String {
    let text: String = result
        .content
        .iter()
        .filter_map(|c| match c {
            conductor_mcp::ToolContent::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if result.is_error {
        result.error.clone().unwrap_or(text)
    } else {
        text
    }
}

fn build_image_followup(content: &str, image_first: bool) -> Message {
    let (image, confirmation) = match serde_json::from_str::<conductor_tools::LoadedImage>(content) {
        Ok(loaded) => {
            let part = match loaded.payload {
                conductor_tools::ImagePayload::Url { url } => ContentPart::url_image("image/*", url),
                conductor_tools::ImagePayload::Inline { mime, data } => ContentPart::inline_image(mime, data),
            };
            (part, loaded.confirmation)
        },
        Err(_) => (
            ContentPart::Text {
                text: format!("[image loaded: {content}]"),
            },
            "Here is the requested image.".to_string(),
        ),
    };
    if image_first {
        Message::human_with_image(image, confirmation)
    } else {
        Message {
            role: conductor_llm::MessageRole::Human,
            parts: vec![ContentPart::Text { text: confirmation }, image],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_events::EventBus;
    use conductor_tools::{CustomTool, CustomToolExecutor, ToolDescriptor, ToolOutputStore};
    use serde_json::Value;
    use std::path::PathBuf;

    fn executor_with_calc() -> ParallelToolExecutor {
        let mut catalog = ToolCatalog::new();
        let exec: CustomToolExecutor = Arc::new(|args| {
            Box::pin(async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok((a + b).to_string())
            })
        });
        let descriptor = ToolDescriptor::custom("calc", "adds", Value::Null, "math");
        catalog.register_custom(CustomTool::new(descriptor, exec).unwrap());

        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));

        ParallelToolExecutor::new(Arc::new(catalog), dispatcher, registry, store, "scripted")
    }

    #[tokio::test]
    async fn happy_path_single_custom_tool() {
        let executor = executor_with_calc();
        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("call-1", "calc").with_arguments(serde_json::json!({"a": 2, "b": 2}))];

        let result = executor
            .execute_batch(&calls, &SessionId::global(), &emitter, &mut detector, true, || false)
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].text().unwrap(), "4");
        assert!(!result.catalog_dirty);
    }

    #[tokio::test]
    async fn parallel_batch_preserves_input_order() {
        let mut catalog = ToolCatalog::new();
        for name in ["a", "b"] {
            let exec: CustomToolExecutor = Arc::new(move |_| Box::pin(async move { Ok(format!("result-{name}")) }));
            let descriptor = ToolDescriptor::custom(name, "d", Value::Null, "math");
            catalog.register_custom(CustomTool::new(descriptor, exec).unwrap());
        }
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        let executor = ParallelToolExecutor::new(Arc::new(catalog), dispatcher, registry, store, "scripted");

        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("c-a", "a"), ToolCall::new("c-b", "b")];

        let result = executor
            .execute_batch(&calls, &SessionId::global(), &emitter, &mut detector, true, || false)
            .await
            .unwrap();

        assert_eq!(result.messages[0].text().unwrap(), "result-a");
        assert_eq!(result.messages[1].text().unwrap(), "result-b");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_message_not_failure() {
        let executor = executor_with_calc();
        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("call-1", "nope")];

        let result = executor
            .execute_batch(&calls, &SessionId::global(), &emitter, &mut detector, true, || false)
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn sequential_mode_preserves_order_without_spawning() {
        let mut catalog = ToolCatalog::new();
        for name in ["a", "b"] {
            let exec: CustomToolExecutor = Arc::new(move |_| Box::pin(async move { Ok(format!("result-{name}")) }));
            let descriptor = ToolDescriptor::custom(name, "d", Value::Null, "math");
            catalog.register_custom(CustomTool::new(descriptor, exec).unwrap());
        }
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        let executor = ParallelToolExecutor::new(Arc::new(catalog), dispatcher, registry, store, "scripted");

        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("c-a", "a"), ToolCall::new("c-b", "b")];

        let result = executor
            .execute_batch(&calls, &SessionId::global(), &emitter, &mut detector, false, || false)
            .await
            .unwrap();

        assert_eq!(result.messages[0].text().unwrap(), "result-a");
        assert_eq!(result.messages[1].text().unwrap(), "result-b");
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_errors_without_executing() {
        let executor = executor_with_calc();
        let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("call-1", "calc").with_arguments(serde_json::json!({"a": 1, "b": 1}))];

        let result = executor
            .execute_batch(&calls, &SessionId::global(), &emitter, &mut detector, true, || true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_tool_output_is_offloaded_and_replaced_with_a_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let big = "x".repeat(50_000 * 4); // ~50,000 tokens at the heuristic 4 chars/token
        let exec: CustomToolExecutor = {
            let big = big.clone();
            Arc::new(move |_| {
                let big = big.clone();
                Box::pin(async move { Ok(big) })
            })
        };
        let mut catalog = ToolCatalog::new();
        catalog.register_custom(CustomTool::new(ToolDescriptor::custom("dump", "d", Value::Null, "misc"), exec).unwrap());

        let store = Arc::new(ToolOutputStore::new(dir.path().to_path_buf()).with_offload_threshold(10_000));
        let dispatcher = Arc::new(VirtualToolDispatcher::new(Arc::clone(&store)));
        let registry = Arc::new(McpRegistry::new(conductor_mcp::McpClient::new(
            conductor_mcp::ServerManager::new(conductor_mcp::ServersConfig::default()),
        )));
        let executor = ParallelToolExecutor::new(Arc::new(catalog), dispatcher, registry, store, "scripted");

        let session = SessionId::new("s1");
        let emitter = EventEmitter::new(session.clone(), EventBus::new());
        let mut detector = LoopDetector::new();
        let calls = vec![ToolCall::new("call-1", "dump")];

        let result = executor
            .execute_batch(&calls, &session, &emitter, &mut detector, true, || false)
            .await
            .unwrap();

        let text = result.messages[0].text().unwrap();
        assert!(text.starts_with("The tool output was too large and has been saved to: "));
        assert!(text.contains(&format!("Preview (first {} characters):", 10_000 * 50 / 100)));

        let saved_path_line = text.lines().next().unwrap();
        let saved_path = saved_path_line.trim_start_matches("The tool output was too large and has been saved to: ");
        assert!(std::path::Path::new(saved_path).exists());
        assert!(saved_path.contains(&dir.path().join(session.as_str()).display().to_string()));
    }
}
