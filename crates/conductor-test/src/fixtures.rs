//! Fixtures for the identifiers and provider fakes shared across the
//! workspace's test suites.

use conductor_core::{AgentId, SessionId, ToolCallId};
use conductor_llm::{ScriptedProvider, ScriptedToolCall, ScriptedTurn};

/// A session id distinct from [`SessionId::global`], for tests that need to
/// assert session-scoped state doesn't leak across sessions.
#[must_use]
pub fn test_session_id() -> SessionId {
    SessionId::new("test-session")
}

/// A fresh random agent id.
#[must_use]
pub fn test_agent_id() -> AgentId {
    AgentId::new()
}

/// A fresh random tool call id.
#[must_use]
pub fn test_tool_call_id() -> ToolCallId {
    ToolCallId::new()
}

/// A [`ScriptedProvider`] that replies with a single fixed text turn,
/// for tests that don't care what the model "said."
#[must_use]
pub fn text_provider(reply: impl Into<String>) -> ScriptedProvider {
    ScriptedProvider::new(vec![ScriptedTurn::text(reply)])
}

/// A [`ScriptedProvider`] that calls `tool_name` once with `arguments`, then
/// (on the next turn) returns `final_text`.
#[must_use]
pub fn tool_call_then_text_provider(
    tool_name: impl Into<String>,
    arguments: serde_json::Value,
    final_text: impl Into<String>,
) -> ScriptedProvider {
    ScriptedProvider::new(vec![
        ScriptedTurn::tool_calls(vec![ScriptedToolCall::new(tool_name, arguments)]),
        ScriptedTurn::text(final_text),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_fixture_is_not_global() {
        assert!(!test_session_id().is_global());
    }

    #[test]
    fn agent_and_tool_call_fixtures_are_unique() {
        assert_ne!(test_agent_id(), test_agent_id());
        assert_ne!(test_tool_call_id(), test_tool_call_id());
    }
}
