//! `ConversionContext` — the per-request mutable state described in §3
//! "Lifecycle" and §5 "Shared resources" (there is none shared *across*
//! requests; everything here is scoped to one).

use std::collections::HashSet;

use crate::converters::Dialect;

/// One dropped-field or applied-transform entry, appended by the capability
/// filter (4.B) and the transform pipeline (4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub rule: String,
    pub detail: String,
}

/// Per-HTTP-request context threading source/target dialect, the known tool
/// vocabulary, and a transformation log through the engine.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub source: Dialect,
    pub target: Dialect,
    /// The set of function names harvested from the request's `tools` at
    /// entry (§3 Glossary "Known tool names") — used by the XML parser for
    /// the lifetime of the response, not just the request.
    pub known_tool_names: HashSet<String>,
    /// `passTools` (§6 Configuration; default `false`).
    pub pass_tools: bool,
    pub transformation_log: Vec<LogEntry>,
    id_counter: u64,
}

impl ConversionContext {
    pub fn new(source: Dialect, target: Dialect, pass_tools: bool) -> Self {
        ConversionContext {
            source,
            target,
            known_tool_names: HashSet::new(),
            pass_tools,
            transformation_log: Vec::new(),
            id_counter: 0,
        }
    }

    pub fn with_known_tool_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.known_tool_names = names.into_iter().collect();
        self
    }

    pub fn log(&mut self, rule: impl Into<String>, detail: impl Into<String>) {
        self.transformation_log.push(LogEntry {
            rule: rule.into(),
            detail: detail.into(),
        });
    }

    /// Generate a `call_<id>` tool-call id. Uses a per-context monotonic
    /// counter plus a random suffix to avoid collisions within a request
    /// without requiring a context-injected clock (§4.E "Determinism").
    pub fn next_tool_call_id(&mut self) -> String {
        self.id_counter += 1;
        format!("call_{}_{:06x}", self.id_counter, fastrand::u32(..0x1_000_000))
    }
}
