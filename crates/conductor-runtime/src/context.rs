//! Context Window Manager (C7): stale-response compaction, summarization
//! triggers, and the pre-flight size cap, applied before every LLM call.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::SessionId;
use conductor_llm::{ContentPart, GenerateOptions, LlmProvider, Message, MessageRole};
use conductor_tools::{extract_content, ToolOutputStore};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors raised while pruning, summarizing, or size-checking a message list.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The pre-flight token estimate exceeds the effective cap; the
    /// conductor must not send this request to the provider.
    #[error("context window overflow: estimated {estimated} tokens exceeds cap of {cap}")]
    PreflightOverflow {
        /// Estimated tokens across the full message list.
        estimated: usize,
        /// The effective cap (`min(0.8 * model_context_window, 800_000)`).
        cap: usize,
    },

    /// The summarization LLM call itself failed.
    #[error("summarization call failed: {0}")]
    SummarizationFailed(String),

    /// Offloading a stale tool result failed.
    #[error("failed to offload stale tool result: {0}")]
    Offload(#[from] std::io::Error),
}

/// Result type for context-management operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Absolute fallback for the pre-flight cap, applied regardless of how large
/// the model's own context window is reported to be: the tighter of the
/// two bounds always wins.
pub const PREFLIGHT_FALLBACK_CAP: usize = 800_000;

/// Fraction of the model's context window the pre-flight cap allows, before
/// taking the minimum against [`PREFLIGHT_FALLBACK_CAP`].
pub const PREFLIGHT_WINDOW_FRACTION: f64 = 0.8;

const DEFAULT_COMPACTION_TURN_AGE: u32 = 10;
const DEFAULT_COMPACTION_TOKEN_THRESHOLD: usize = 1_000;
const DEFAULT_SUMMARIZATION_PERCENT: f64 = 0.8;
const DEFAULT_SUMMARIZATION_COOLDOWN: u32 = 3;
const DEFAULT_KEEP_LAST: usize = 4;

/// Stale-response compaction settings.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Whether compaction runs at all.
    pub enabled: bool,
    /// How many turns back a tool result must be before it is eligible.
    pub turn_age_threshold: u32,
    /// Token count a tool result's content must exceed to be compacted.
    pub token_threshold: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            turn_age_threshold: DEFAULT_COMPACTION_TURN_AGE,
            token_threshold: DEFAULT_COMPACTION_TOKEN_THRESHOLD,
        }
    }
}

/// Summarization trigger settings.
#[derive(Debug, Clone)]
pub struct SummarizationConfig {
    /// Whether summarization runs at all.
    pub enabled: bool,
    /// Percentage-of-context trigger, e.g. `0.8` for 80%.
    pub percent: f64,
    /// Absolute-tokens trigger; `None` disables this half of the OR.
    pub fixed_threshold: Option<usize>,
    /// How many of the most recent messages survive a summarization rebuild.
    pub keep_last: usize,
    /// Turns to wait after a summarization before triggering again.
    pub cooldown_turns: u32,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percent: DEFAULT_SUMMARIZATION_PERCENT,
            fixed_threshold: None,
            keep_last: DEFAULT_KEEP_LAST,
            cooldown_turns: DEFAULT_SUMMARIZATION_COOLDOWN,
        }
    }
}

/// Per-agent token accumulators.
///
/// `current_context_window_usage` is the only field summarization resets;
/// every cumulative counter here only ever grows: resetting them at
/// summarization time would under-report cost.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    /// Total prompt tokens reported across every LLM call.
    pub cumulative_prompt: u64,
    /// Total completion tokens reported across every LLM call.
    pub cumulative_completion: u64,
    /// Total cache-read tokens reported (subset of `cumulative_prompt`).
    pub cumulative_cache: u64,
    /// Total reasoning tokens reported (disjoint from completion).
    pub cumulative_reasoning: u64,
    /// Accumulated USD cost across every category.
    pub cumulative_cost_usd: f64,
    /// Prompt tokens of the most recent call; reset by summarization.
    pub current_context_window_usage: usize,
    /// Context window of the bound model, cached from provider metadata.
    pub model_context_window: usize,
    /// Number of LLM calls made so far.
    pub llm_call_count: u64,
    /// Number of calls that reported a non-zero cache-read count.
    pub cache_enabled_call_count: u64,
}

impl TokenLedger {
    /// Current context usage as a fraction of the model's context window.
    #[must_use]
    pub fn usage_fraction(&self) -> f64 {
        if self.model_context_window == 0 {
            return 0.0;
        }
        self.current_context_window_usage as f64 / self.model_context_window as f64
    }
}

/// Tracks which turn a tool result was appended in, so stale-response
/// compaction can find results older than its turn-age threshold without
/// needing the message type itself to carry turn metadata.
#[derive(Default)]
struct TurnLedger {
    tool_result_turns: HashMap<String, u32>,
}

/// Applies compaction, summarization, and the pre-flight cap to a message
/// list before each LLM call.
///
/// Owned (not shared) by one turn loop: the turn loop runs on a single task
/// per agent call, so no internal locking is needed here.
pub struct ContextManager {
    compaction: CompactionConfig,
    summarization: SummarizationConfig,
    output_store: Arc<ToolOutputStore>,
    turns: TurnLedger,
    last_summarized_turn: Option<u32>,
}

impl ContextManager {
    /// Build a manager with compaction and summarization both disabled.
    #[must_use]
    pub fn new(output_store: Arc<ToolOutputStore>) -> Self {
        Self {
            compaction: CompactionConfig::default(),
            summarization: SummarizationConfig::default(),
            output_store,
            turns: TurnLedger::default(),
            last_summarized_turn: None,
        }
    }

    /// Override compaction settings.
    #[must_use]
    pub fn with_compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = config;
        self
    }

    /// Override summarization settings.
    #[must_use]
    pub fn with_summarization(mut self, config: SummarizationConfig) -> Self {
        self.summarization = config;
        self
    }

    /// Record the turn a tool result with `tool_call_id` was appended in, so
    /// compaction can later compute its age.
    pub fn record_tool_result(&mut self, tool_call_id: impl Into<String>, turn: u32) {
        self.turns.tool_result_turns.insert(tool_call_id.into(), turn);
    }

    /// Run stale-response compaction over `messages` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if offloading a stale result's content fails.
    #[instrument(skip(self, messages))]
    pub async fn compact(
        &self,
        messages: &mut [Message],
        current_turn: u32,
        session: &SessionId,
    ) -> ContextResult<()> {
        if !self.compaction.enabled {
            return Ok(());
        }

        for message in messages.iter_mut() {
            for part in message.parts.iter_mut() {
                let ContentPart::ToolResult(result) = part else {
                    continue;
                };
                let Some(&issued_turn) = self.turns.tool_result_turns.get(&result.tool_call_id) else {
                    continue;
                };
                let age = current_turn.saturating_sub(issued_turn);
                if age < self.compaction.turn_age_threshold {
                    continue;
                }
                let extracted = extract_content(&result.content);
                if conductor_tools::estimate_tokens(&extracted) <= self.compaction.token_threshold {
                    continue;
                }

                let path = self.output_store.offload(session, &extracted, &result.name).await?;
                debug!(tool_call_id = %result.tool_call_id, age, path = %path.display(), "compacted stale tool result");
                result.content = format!(
                    "[compacted: {age} turns old] {}",
                    self.output_store.build_placeholder(&path, &extracted)
                );
            }
        }

        Ok(())
    }

    /// Whether either summarization trigger fires, respecting the cooldown.
    #[must_use]
    pub fn should_summarize(&self, ledger: &TokenLedger, current_turn: u32) -> bool {
        if !self.summarization.enabled {
            return false;
        }
        if let Some(last) = self.last_summarized_turn {
            if current_turn.saturating_sub(last) < self.summarization.cooldown_turns {
                return false;
            }
        }

        let percent_trigger = ledger.model_context_window > 0
            && ledger.current_context_window_usage as f64
                >= ledger.model_context_window as f64 * self.summarization.percent;
        let absolute_trigger = self
            .summarization
            .fixed_threshold
            .is_some_and(|t| ledger.current_context_window_usage >= t);

        percent_trigger || absolute_trigger
    }

    /// Summarize the older prefix of `messages` via one LLM call, then
    /// rebuild the list as `[system, summary, last keep_last messages]`.
    ///
    /// Resets `ledger.current_context_window_usage` to the estimated size of
    /// the rebuilt list; every cumulative ledger field is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the summarization LLM call fails.
    #[instrument(skip(self, messages, llm, ledger))]
    pub async fn summarize(
        &mut self,
        messages: &mut Vec<Message>,
        llm: &dyn LlmProvider,
        current_turn: u32,
        ledger: &mut TokenLedger,
    ) -> ContextResult<()> {
        let keep_last = self.summarization.keep_last.min(messages.len());
        let split_at = messages.len().saturating_sub(keep_last);
        let (older, recent) = messages.split_at(split_at);

        let mut prompt_messages = vec![Message::system(
            "Summarize the following conversation so far, preserving facts, decisions, and \
             outstanding questions, in a few compact paragraphs.",
        )];
        prompt_messages.extend(older.iter().cloned());

        let response = llm
            .generate(&prompt_messages, &GenerateOptions::new())
            .await
            .map_err(|e| ContextError::SummarizationFailed(e.to_string()))?;
        let summary_text = response
            .first_choice()
            .and_then(|c| c.content.clone())
            .unwrap_or_else(|| "(summarization produced no content)".to_string());

        let system = messages.iter().find(|m| m.role == MessageRole::System).cloned();
        let mut rebuilt = Vec::new();
        if let Some(system) = system {
            rebuilt.push(system);
        }
        rebuilt.push(Message::assistant(format!("[conversation summary]\n{summary_text}")));
        rebuilt.extend(recent.iter().cloned());

        let estimated: usize = rebuilt.iter().filter_map(Message::text).map(|t| llm.count_tokens(&t)).sum();
        ledger.current_context_window_usage = estimated;
        self.last_summarized_turn = Some(current_turn);

        *messages = rebuilt;
        Ok(())
    }

    /// The effective pre-flight cap: `min(0.8 * model_context_window, 800_000)`.
    #[must_use]
    pub fn preflight_cap(model_context_window: usize) -> usize {
        let window_bound = (model_context_window as f64 * PREFLIGHT_WINDOW_FRACTION) as usize;
        window_bound.min(PREFLIGHT_FALLBACK_CAP)
    }

    /// Estimate the token count of `messages` and fail if it exceeds the
    /// effective pre-flight cap.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::PreflightOverflow`] if the estimate exceeds
    /// the cap.
    pub fn preflight_check(messages: &[Message], llm: &dyn LlmProvider) -> ContextResult<()> {
        let estimated: usize = messages
            .iter()
            .filter_map(Message::text)
            .map(|t| llm.count_tokens(&t))
            .sum();
        let cap = Self::preflight_cap(llm.max_context_length());
        if estimated > cap {
            warn!(estimated, cap, "pre-flight context check failed");
            return Err(ContextError::PreflightOverflow { estimated, cap });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_llm::{ScriptedProvider, ScriptedTurn, ToolCallResult};

    /// Returns the store plus the `TempDir` guard, which must stay alive for
    /// the duration of the test.
    fn store() -> (Arc<ToolOutputStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Arc::new(ToolOutputStore::new(dir.path().to_path_buf())), dir)
    }

    #[test]
    fn preflight_cap_takes_the_tighter_bound() {
        assert_eq!(ContextManager::preflight_cap(100_000), 80_000);
        assert_eq!(ContextManager::preflight_cap(2_000_000), PREFLIGHT_FALLBACK_CAP);
    }

    #[tokio::test]
    async fn compaction_replaces_old_large_results_only() {
        let (output_store, _dir) = store();
        let mut manager = ContextManager::new(output_store).with_compaction(CompactionConfig {
            enabled: true,
            turn_age_threshold: 2,
            token_threshold: 5,
        });
        manager.record_tool_result("call-1", 0);
        manager.record_tool_result("call-2", 9);

        let mut messages = vec![
            Message::tool_result(ToolCallResult::success("call-1", "search", "x".repeat(200))),
            Message::tool_result(ToolCallResult::success("call-2", "search", "recent and small")),
        ];
        manager.compact(&mut messages, 10, &SessionId::global()).await.unwrap();

        assert!(messages[0].text().unwrap().contains("compacted"));
        assert_eq!(messages[1].text().unwrap(), "recent and small");
    }

    #[test]
    fn summarization_respects_cooldown() {
        let (output_store, _dir) = store();
        let mut manager = ContextManager::new(output_store).with_summarization(SummarizationConfig {
            enabled: true,
            percent: 0.5,
            fixed_threshold: None,
            keep_last: 4,
            cooldown_turns: 3,
        });
        manager.last_summarized_turn = Some(5);
        let ledger = TokenLedger {
            model_context_window: 1000,
            current_context_window_usage: 900,
            ..Default::default()
        };
        assert!(!manager.should_summarize(&ledger, 6));
        assert!(manager.should_summarize(&ledger, 8));
    }

    #[tokio::test]
    async fn summarize_rebuilds_and_resets_usage_only() {
        let (output_store, _dir) = store();
        let mut manager = ContextManager::new(output_store);
        let llm = ScriptedProvider::new(vec![ScriptedTurn::text("a summary")]);
        let mut messages = vec![
            Message::system("be helpful"),
            Message::human("first"),
            Message::assistant("ack"),
            Message::human("second"),
        ];
        let mut ledger = TokenLedger {
            cumulative_prompt: 500,
            current_context_window_usage: 900,
            ..Default::default()
        };
        manager.summarize(&mut messages, &llm, 3, &mut ledger).await.unwrap();

        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[1].text().unwrap().contains("a summary"));
        assert_eq!(ledger.cumulative_prompt, 500);
        assert!(ledger.current_context_window_usage > 0);
    }

    #[test]
    fn preflight_check_rejects_oversized_message_list() {
        let llm = ScriptedProvider::new(Vec::new());
        let messages = vec![Message::human("x".repeat(10_000_000))];
        assert!(ContextManager::preflight_check(&messages, &llm).is_err());
    }
}
