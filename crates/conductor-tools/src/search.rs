//! Tool-Search Mode (C4): hides a large catalog behind `search_tools` /
//! `add_tool` / `show_all_tools` indirection tools.

use std::collections::{HashMap, HashSet};

use regex::RegexBuilder;

use crate::descriptor::ToolDescriptor;
use crate::error::{CatalogError, CatalogResult};

/// Names of the three indirection tools themselves, always active in
/// tool-search mode alongside the offload-access virtuals.
pub const SEARCH_TOOLS: &str = "search_tools";
/// See [`SEARCH_TOOLS`].
pub const ADD_TOOL: &str = "add_tool";
/// See [`SEARCH_TOOLS`].
pub const SHOW_ALL_TOOLS: &str = "show_all_tools";

/// One hit returned by [`ToolSearchMode::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Matching tool's name.
    pub name: String,
    /// Matching tool's description.
    pub description: String,
}

/// Splits a filtered catalog into a deferred set (hidden from the model) and
/// a discovered set (active), with `add_tool` moving names between them.
pub struct ToolSearchMode {
    deferred: HashMap<String, ToolDescriptor>,
    discovered: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl ToolSearchMode {
    /// Build tool-search state from the full filtered catalog plus a
    /// pre-discovered allowlist (inserted directly into `discovered`).
    #[must_use]
    pub fn new(catalog: Vec<ToolDescriptor>, pre_discovered: &[String]) -> Self {
        let mut deferred = HashMap::new();
        let mut discovered = HashSet::new();
        for descriptor in catalog {
            if pre_discovered.iter().any(|n| n == &descriptor.name) || descriptor.is_always_available() {
                discovered.insert(descriptor.name.clone());
            }
            deferred.insert(descriptor.name.clone(), descriptor);
        }
        Self {
            deferred,
            discovered,
            aliases: default_aliases(),
        }
    }

    /// Register or override a name-resolution alias (e.g. a renamed tool).
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    /// Case-insensitive regex search over tool name and description. Does
    /// **not** activate any matches.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidSearchQuery`] if `query` fails to
    /// compile as a regular expression.
    pub fn search(&self, query: &str) -> CatalogResult<Vec<SearchHit>> {
        let re = RegexBuilder::new(query)
            .case_insensitive(true)
            .build()
            .map_err(|e| CatalogError::InvalidSearchQuery(e.to_string()))?;
        let mut hits: Vec<SearchHit> = self
            .deferred
            .values()
            .filter(|d| re.is_match(&d.name) || re.is_match(&d.description))
            .map(|d| SearchHit {
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hits)
    }

    /// Resolve one requested name to a concrete catalog entry, trying (a)
    /// exact match, (b) PascalCase -> snake_case normalization, (c) the alias
    /// table.
    fn resolve(&self, requested: &str) -> Option<String> {
        if self.deferred.contains_key(requested) || self.discovered.contains(requested) {
            return Some(requested.to_string());
        }
        let snake = pascal_to_snake(requested);
        if self.deferred.contains_key(&snake) || self.discovered.contains(&snake) {
            return Some(snake);
        }
        if let Some(aliased) = self.aliases.get(requested) {
            if self.deferred.contains_key(aliased) {
                return Some(aliased.clone());
            }
        }
        None
    }

    /// Move each resolvable name in `requested` from deferred to discovered.
    ///
    /// Unresolvable names are silently skipped (they are reported back to
    /// the model via the tool-response text, not as a conductor error);
    /// names already discovered are a no-op.
    ///
    /// Returns the set of names that actually transitioned to discovered
    /// during this call (empty if nothing new was added, e.g. a
    /// PascalCase request that normalizes to an already-active tool).
    pub fn add_tool(&mut self, requested: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        for name in requested {
            if let Some(resolved) = self.resolve(name) {
                if self.discovered.insert(resolved.clone()) {
                    added.push(resolved);
                }
            }
        }
        added
    }

    /// Union of discovered and deferred tool names.
    #[must_use]
    pub fn show_all_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.deferred.keys().cloned().collect();
        names.sort();
        names
    }

    /// The currently active descriptor set: `search_tools`/`add_tool`/
    /// `show_all_tools` plus everything discovered so far. The three
    /// indirection tools and offload virtuals are added by the catalog
    /// assembly step, not here.
    #[must_use]
    pub fn discovered(&self) -> Vec<ToolDescriptor> {
        let mut names: Vec<&String> = self.discovered.iter().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.deferred.get(name))
            .cloned()
            .collect()
    }
}

fn pascal_to_snake(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.char_indices() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn default_aliases() -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    aliases.insert("write_workspace_file".to_string(), "update_workspace_file".to_string());
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor::mcp(name, "fs", description, Value::Null)
    }

    fn sample_catalog() -> Vec<ToolDescriptor> {
        vec![
            descriptor("get_weather", "fetch current weather"),
            descriptor("read_file", "read a file from disk"),
            descriptor("update_workspace_file", "write to a workspace file"),
        ]
    }

    #[test]
    fn pre_discovered_tools_start_active() {
        let mode = ToolSearchMode::new(sample_catalog(), &["get_weather".to_string()]);
        let names: Vec<String> = mode.discovered().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_weather".to_string()]);
    }

    #[test]
    fn search_does_not_activate() {
        let mode = ToolSearchMode::new(sample_catalog(), &[]);
        let hits = mode.search("weather").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "get_weather");
        assert!(mode.discovered().is_empty());
    }

    #[test]
    fn add_tool_exact_match() {
        let mut mode = ToolSearchMode::new(sample_catalog(), &[]);
        let added = mode.add_tool(&["read_file".to_string()]);
        assert_eq!(added, vec!["read_file".to_string()]);
    }

    #[test]
    fn add_tool_pascal_case_normalizes_to_existing() {
        let mut mode = ToolSearchMode::new(sample_catalog(), &[]);
        mode.add_tool(&["read_file".to_string()]);
        let added = mode.add_tool(&["ReadFile".to_string()]);
        assert!(added.is_empty(), "already-active tool should not re-add");
    }

    #[test]
    fn add_tool_pascal_case_activates_on_first_request() {
        let mut mode = ToolSearchMode::new(sample_catalog(), &[]);
        let added = mode.add_tool(&["ReadFile".to_string()]);
        assert_eq!(added, vec!["read_file".to_string()]);
    }

    #[test]
    fn add_tool_alias_resolution() {
        let mut mode = ToolSearchMode::new(sample_catalog(), &[]);
        let added = mode.add_tool(&["write_workspace_file".to_string()]);
        assert_eq!(added, vec!["update_workspace_file".to_string()]);
    }

    #[test]
    fn add_tool_unresolvable_name_is_skipped() {
        let mut mode = ToolSearchMode::new(sample_catalog(), &[]);
        let added = mode.add_tool(&["does_not_exist".to_string()]);
        assert!(added.is_empty());
    }

    #[test]
    fn show_all_tools_is_union_sorted() {
        let mode = ToolSearchMode::new(sample_catalog(), &["get_weather".to_string()]);
        let all = mode.show_all_tools();
        assert_eq!(
            all,
            vec![
                "get_weather".to_string(),
                "read_file".to_string(),
                "update_workspace_file".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_regex_query_errors() {
        let mode = ToolSearchMode::new(sample_catalog(), &[]);
        assert!(mode.search("(unterminated").is_err());
    }
}
