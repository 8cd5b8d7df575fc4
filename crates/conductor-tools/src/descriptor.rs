//! Tool descriptors: the catalog's unit of bookkeeping for every tool kind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::CatalogError;

/// Which backend a tool dispatches to.
///
/// Kept as a tagged variant rather than an abstract "tool object" with
/// behavior: the three kinds have genuinely different failure modes (only
/// MCP calls get broken-pipe recovery), so dispatch needs to know which one
/// it's holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Built into this crate: offload access, tool-search indirection,
    /// code-execution discovery, image loading.
    Virtual,
    /// A host-supplied function registered at agent construction.
    Custom,
    /// A tool discovered on a connected MCP server.
    Mcp,
}

/// Per-tool timeout override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Inherit the agent-wide default (5 minutes unless configured otherwise).
    Default,
    /// No timeout; the call runs until it returns.
    None,
    /// An explicit timeout in milliseconds.
    Explicit(u64),
}

impl TimeoutPolicy {
    /// Resolve this policy plus an agent-wide default into a concrete duration.
    ///
    /// `None` variant of the *policy* means unbounded (returns `None` here,
    /// meaning "do not apply a timeout").
    #[must_use]
    pub fn resolve(self, agent_default: Duration) -> Option<Duration> {
        match self {
            TimeoutPolicy::Default => Some(agent_default),
            TimeoutPolicy::None => None,
            TimeoutPolicy::Explicit(ms) => Some(Duration::from_millis(ms)),
        }
    }

    /// Build a policy from the wire encoding used in Agent API options:
    /// `0` means unbounded, `-1` means "use the agent default".
    #[must_use]
    pub fn from_millis_signed(value: i64) -> Self {
        match value {
            0 => TimeoutPolicy::None,
            -1 => TimeoutPolicy::Default,
            ms if ms > 0 => TimeoutPolicy::Explicit(ms as u64),
            _ => TimeoutPolicy::Default,
        }
    }
}

/// A single entry in the tool catalog, regardless of backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique (within one agent) tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub json_schema_parameters: Value,
    /// Which backend this tool dispatches to.
    pub kind: ToolKind,
    /// The MCP server name, when `kind == Mcp`.
    pub server: Option<String>,
    /// The custom-tool category, when `kind == Custom`.
    pub category: Option<String>,
    /// Timeout behavior for this specific tool.
    pub timeout_policy: TimeoutPolicy,
}

impl ToolDescriptor {
    /// Build a descriptor for an MCP tool.
    #[must_use]
    pub fn mcp(name: impl Into<String>, server: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema_parameters: schema,
            kind: ToolKind::Mcp,
            server: Some(server.into()),
            category: None,
            timeout_policy: TimeoutPolicy::Default,
        }
    }

    /// Build a descriptor for a virtual tool.
    #[must_use]
    pub fn virtual_tool(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema_parameters: schema,
            kind: ToolKind::Virtual,
            server: None,
            category: None,
            timeout_policy: TimeoutPolicy::Default,
        }
    }

    /// Build a descriptor for a custom tool.
    #[must_use]
    pub fn custom(name: impl Into<String>, description: impl Into<String>, schema: Value, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema_parameters: schema,
            kind: ToolKind::Custom,
            server: None,
            category: Some(category.into()),
            timeout_policy: TimeoutPolicy::Default,
        }
    }

    /// Override the timeout policy.
    #[must_use]
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    /// Whether this custom tool's category is always available regardless of
    /// tool-search mode or filtering (`structured_output`, `human`).
    #[must_use]
    pub fn is_always_available(&self) -> bool {
        matches!(self.category.as_deref(), Some("structured_output" | "human"))
    }
}

/// The host-supplied async executor backing a [`ToolKind::Custom`] tool.
///
/// Takes the raw JSON arguments and returns either the tool's text result or
/// an error message — both fed back to the model as a tool-response message,
/// never propagated as a conductor-level failure.
pub type CustomToolExecutor =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send + Sync>;

/// A custom tool: its descriptor plus the function that executes it.
#[derive(Clone)]
pub struct CustomTool {
    /// Tool metadata, as seen by the catalog and the model.
    pub descriptor: ToolDescriptor,
    /// The executor the host registered this tool with.
    pub executor: CustomToolExecutor,
}

impl CustomTool {
    /// Wrap a descriptor and executor together.
    ///
    /// # Errors
    ///
    /// Returns an error if `descriptor.kind != ToolKind::Custom` or if
    /// `descriptor.category` is unset (category is mandatory for customs).
    pub fn new(descriptor: ToolDescriptor, executor: CustomToolExecutor) -> Result<Self, CatalogError> {
        if descriptor.kind != ToolKind::Custom {
            return Err(CatalogError::InvalidArguments {
                tool: descriptor.name.clone(),
                reason: "custom tool descriptor must have kind == Custom".to_string(),
            });
        }
        if descriptor.category.is_none() {
            return Err(CatalogError::InvalidArguments {
                tool: descriptor.name.clone(),
                reason: "custom tool descriptor requires a category".to_string(),
            });
        }
        Ok(Self { descriptor, executor })
    }

    /// Run the executor against the given arguments.
    pub async fn call(&self, args: Value) -> Result<String, String> {
        (self.executor)(args).await
    }
}

impl std::fmt::Debug for CustomTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_policy_from_signed_millis() {
        assert_eq!(TimeoutPolicy::from_millis_signed(0), TimeoutPolicy::None);
        assert_eq!(TimeoutPolicy::from_millis_signed(-1), TimeoutPolicy::Default);
        assert_eq!(TimeoutPolicy::from_millis_signed(5_000), TimeoutPolicy::Explicit(5_000));
        // Unrecognized negatives fall back to the agent default rather than panicking.
        assert_eq!(TimeoutPolicy::from_millis_signed(-2), TimeoutPolicy::Default);
    }

    #[test]
    fn timeout_policy_resolve() {
        let default = Duration::from_secs(300);
        assert_eq!(TimeoutPolicy::Default.resolve(default), Some(default));
        assert_eq!(TimeoutPolicy::None.resolve(default), None);
        assert_eq!(
            TimeoutPolicy::Explicit(1_000).resolve(default),
            Some(Duration::from_millis(1_000))
        );
    }

    #[test]
    fn custom_tool_requires_custom_kind_and_category() {
        let descriptor = ToolDescriptor::virtual_tool("x", "d", Value::Null);
        let exec: CustomToolExecutor = Arc::new(|_| Box::pin(async { Ok(String::new()) }));
        assert!(CustomTool::new(descriptor, exec).is_err());
    }

    #[test]
    fn always_available_categories() {
        let d = ToolDescriptor::custom("answer", "d", Value::Null, "structured_output");
        assert!(d.is_always_available());
        let d = ToolDescriptor::custom("ask_human", "d", Value::Null, "human");
        assert!(d.is_always_available());
        let d = ToolDescriptor::custom("deploy", "d", Value::Null, "ops");
        assert!(!d.is_always_available());
    }

    #[tokio::test]
    async fn custom_tool_executes() {
        let descriptor = ToolDescriptor::custom("calc", "adds numbers", Value::Null, "math");
        let exec: CustomToolExecutor = Arc::new(|args| {
            Box::pin(async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok((a + b).to_string())
            })
        });
        let tool = CustomTool::new(descriptor, exec).unwrap();
        let result = tool.call(serde_json::json!({"a": 2, "b": 2})).await;
        assert_eq!(result, Ok("4".to_string()));
    }
}
