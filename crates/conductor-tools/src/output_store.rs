//! Tool Output Store (C1): offloads oversized tool responses to disk and
//! hands back a short placeholder instead of embedding the full content.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use conductor_core::SessionId;
use tokio::fs;
use tracing::warn;

/// Default offload threshold, in tokens.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 10_000;
/// Default hard cap, in tokens — enforced even when offload is disabled.
pub const DEFAULT_HARD_CAP: usize = 100_000;
/// Default retention age for the periodic sweep.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Very rough chars-per-token heuristic used when no model-specific tokenizer
/// is wired in. Call sites that have a real tokenizer should estimate tokens
/// themselves and pass a pre-computed count where possible; this is the
/// provider-default/heuristic tail of the fallback chain.
const HEURISTIC_CHARS_PER_TOKEN: usize = 4;

/// Estimate a token count for `content` using the heuristic fallback.
#[must_use]
pub fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(HEURISTIC_CHARS_PER_TOKEN)
}

/// Unwrap the MCP text-content wrapper, or strip a `TOOL RESULT for <name>: `
/// prefix. Falls through to the original
/// string if neither pattern applies.
#[must_use]
pub fn extract_content(raw: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if value.get("type").and_then(serde_json::Value::as_str) == Some("text") {
            if let Some(text) = value.get("text").and_then(serde_json::Value::as_str) {
                return text.replace("\\\"", "\"").replace("\\n", "\n").replace("\\t", "\t");
            }
        }
    }
    for name_end in raw.find(": ") {
        let prefix = &raw[..name_end + 2];
        if prefix.starts_with("TOOL RESULT for ") {
            return raw[name_end + 2..].to_string();
        }
    }
    raw.to_string()
}

/// Offloads oversized tool output to `{root}/{session_id}/` files.
pub struct ToolOutputStore {
    root: PathBuf,
    offload_threshold: usize,
    hard_cap: usize,
    preview_pct: u32,
    counter: Arc<AtomicU64>,
}

impl ToolOutputStore {
    /// Create a store rooted at `root`, with default thresholds.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
            hard_cap: DEFAULT_HARD_CAP,
            preview_pct: 50,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Override the offload threshold (tokens).
    #[must_use]
    pub fn with_offload_threshold(mut self, threshold: usize) -> Self {
        self.offload_threshold = threshold;
        self
    }

    /// Override the hard cap (tokens).
    #[must_use]
    pub fn with_hard_cap(mut self, cap: usize) -> Self {
        self.hard_cap = cap;
        self
    }

    /// Whether `content` is large enough to warrant offload (strict `>`:
    /// exactly-threshold counts are not offloaded).
    #[must_use]
    pub fn is_large(&self, content: &str) -> bool {
        estimate_tokens(content) > self.offload_threshold
    }

    /// Whether `content` exceeds the absolute hard cap, regardless of whether
    /// offload is enabled.
    #[must_use]
    pub fn exceeds_hard_cap(&self, content: &str) -> bool {
        estimate_tokens(content) > self.hard_cap
    }

    /// The synthetic error returned in place of embedding hard-cap-exceeding
    /// content.
    #[must_use]
    pub fn hard_cap_message(&self, tool_name: &str) -> String {
        format!(
            "The output of {tool_name} exceeds the maximum size this agent can process \
             ({} tokens). Narrow your query and try again; the full output was not saved.",
            self.hard_cap
        )
    }

    fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    fn next_filename(&self, tool_name: &str, extension: &str) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let sanitized: String = tool_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("tool_{ts}_{counter}_{sanitized}.{extension}")
    }

    /// Offload `content` for `tool_name` under `session`'s directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn offload(
        &self,
        session: &SessionId,
        content: &str,
        tool_name: &str,
    ) -> std::io::Result<PathBuf> {
        let dir = self.session_dir(session);
        fs::create_dir_all(&dir).await?;
        let extension = if serde_json::from_str::<serde_json::Value>(content).is_ok() {
            "json"
        } else {
            "txt"
        };
        let filename = self.next_filename(tool_name, extension);
        let path = dir.join(filename);
        fs::write(&path, content).await?;
        Ok(path)
    }

    /// Build the short placeholder string that replaces an offloaded tool's
    /// content in the conversation.
    #[must_use]
    pub fn build_placeholder(&self, path: &Path, full_content: &str) -> String {
        let preview_chars = self.offload_threshold * self.preview_pct as usize / 100;
        let preview = crate::truncate_at_char_boundary(full_content, preview_chars.max(1));
        format!(
            "The tool output was too large and has been saved to: {}\n\n\
             Preview (first {} characters):\n{}\n\n\
             Use `read_large_output`, `search_large_output`, or `query_large_output` \
             to inspect the rest of this file.",
            path.display(),
            preview.len(),
            preview,
        )
    }

    /// Read back an offloaded file's full content.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub async fn read(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path).await
    }

    /// Delete offloaded files older than `age`, across all sessions.
    ///
    /// Never removes a session directory itself, only files inside it
    /// (session directory cleanup is an operator concern).
    /// Sweep failures are logged, never propagated — this runs from a
    /// best-effort periodic background task.
    pub async fn cleanup_older_than(&self, age: Duration) {
        if let Err(err) = self.sweep(age, None).await {
            warn!(error = %err, "tool output sweep failed");
        }
    }

    /// Delete every offloaded file belonging to `session`, regardless of age.
    pub async fn cleanup_session(&self, session: &SessionId) {
        if let Err(err) = self.sweep(Duration::ZERO, Some(session)).await {
            warn!(error = %err, session = %session, "session tool output cleanup failed");
        }
    }

    async fn sweep(&self, age: Duration, only_session: Option<&SessionId>) -> std::io::Result<()> {
        let cutoff = SystemTime::now().checked_sub(age).unwrap_or(UNIX_EPOCH);
        let dirs: Vec<PathBuf> = match only_session {
            Some(session) => vec![self.session_dir(session)],
            None => {
                let mut entries = Vec::new();
                let mut read_dir = match fs::read_dir(&self.root).await {
                    Ok(rd) => rd,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e),
                };
                while let Some(entry) = read_dir.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        entries.push(entry.path());
                    }
                }
                entries
            },
        };

        for dir in dirs {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                let modified = metadata.modified().unwrap_or(SystemTime::now());
                if only_session.is_some() || modified < cutoff {
                    let _ = fs::remove_file(entry.path()).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_unwraps_mcp_text_wrapper() {
        let raw = r#"{"type":"text","text":"hello\nworld"}"#;
        assert_eq!(extract_content(raw), "hello\nworld");
    }

    #[test]
    fn extraction_strips_tool_result_prefix() {
        let raw = "TOOL RESULT for search: some content";
        assert_eq!(extract_content(raw), "some content");
    }

    #[test]
    fn extraction_passes_through_unrecognized_content() {
        let raw = "plain output";
        assert_eq!(extract_content(raw), "plain output");
    }

    #[test]
    fn exactly_threshold_tokens_is_not_large() {
        let store = ToolOutputStore::new(PathBuf::from("/tmp")).with_offload_threshold(10);
        let content = "x".repeat(10 * HEURISTIC_CHARS_PER_TOKEN);
        assert_eq!(estimate_tokens(&content), 10);
        assert!(!store.is_large(&content));
    }

    #[test]
    fn one_token_over_threshold_is_large() {
        let store = ToolOutputStore::new(PathBuf::from("/tmp")).with_offload_threshold(10);
        let content = "x".repeat(10 * HEURISTIC_CHARS_PER_TOKEN + 1);
        assert!(store.is_large(&content));
    }

    #[test]
    fn hard_cap_respected_independent_of_threshold() {
        let store = ToolOutputStore::new(PathBuf::from("/tmp")).with_hard_cap(20);
        let content = "x".repeat(21 * HEURISTIC_CHARS_PER_TOKEN);
        assert!(store.exceeds_hard_cap(&content));
    }

    #[tokio::test]
    async fn offload_then_read_round_trips_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolOutputStore::new(dir.path().to_path_buf());
        let session = SessionId::new("s1");
        let content = "x".repeat(50_000);

        let path_a = store.offload(&session, &content, "search").await.unwrap();
        let path_b = store.offload(&session, &content, "search").await.unwrap();

        assert_ne!(path_a, path_b, "each offload gets a unique filename");
        assert_eq!(store.read(&path_a).await.unwrap(), content);
        assert_eq!(store.read(&path_b).await.unwrap(), content);
    }

    #[tokio::test]
    async fn placeholder_contains_path_and_bounded_preview() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolOutputStore::new(dir.path().to_path_buf()).with_offload_threshold(100);
        let session = SessionId::new("s1");
        let content = "y".repeat(10_000);
        let path = store.offload(&session, &content, "tool").await.unwrap();
        let placeholder = store.build_placeholder(&path, &content);
        assert!(placeholder.starts_with("The tool output was too large and has been saved to: "));
        assert!(placeholder.contains(&path.display().to_string()));
    }

    #[tokio::test]
    async fn session_cleanup_removes_only_that_sessions_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolOutputStore::new(dir.path().to_path_buf());
        let s1 = SessionId::new("s1");
        let s2 = SessionId::new("s2");
        let p1 = store.offload(&s1, "a", "t").await.unwrap();
        let p2 = store.offload(&s2, "b", "t").await.unwrap();

        store.cleanup_session(&s1).await;

        assert!(!p1.exists());
        assert!(p2.exists());
    }
}
