//! Dialect converters — translate requests/responses/chunks to and from the
//! IR (spec §4.D). `openai` and `ollama` are the two concrete converters;
//! this module holds the shared `Converter` trait, the `Dialect` tag, and a
//! tiny read-only registry (§4.D "Shared resources").

pub mod ollama;
pub mod openai;

use crate::context::ConversionContext;
use crate::ir::{IrChunk, IrRequest, IrResponse};

/// One of the two wire conventions (Glossary "Dialect").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Openai,
    Ollama,
}

impl Dialect {
    pub fn provider_tag(self) -> &'static str {
        match self {
            Dialect::Openai => "openai",
            Dialect::Ollama => "ollama",
        }
    }
}

/// Result of `checkCompatibility(irRequest)` (§4.D).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compatibility {
    pub compatible: bool,
    pub warnings: Vec<String>,
    pub unsupported_features: Vec<String>,
    /// Capability-driven transformations `applyTransforms` rule 2 should run,
    /// named so the engine can dispatch without re-deriving them.
    pub transformations: Vec<String>,
}

/// Well-known transformation tags produced by `checkCompatibility` and
/// consumed by `engine::apply_transforms` rule 2.
pub mod transform_tag {
    pub const TOOL_CALLS_UNSUPPORTED: &str = "tool_calls_unsupported";
    pub const N_GT_1_UNSUPPORTED: &str = "n_gt_1_unsupported";
    pub const STRUCTURED_OUTPUTS_UNSUPPORTED: &str = "structured_outputs_unsupported";
}

/// A dialect converter: four IR-facing operations plus a compatibility check
/// (§4.D). Implementations are stateless and read-only after construction.
pub trait Converter: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn to_ir(&self, request: &serde_json::Value) -> Result<IrRequest, crate::error::ToolbridgeError>;
    fn from_ir(&self, request: &IrRequest) -> serde_json::Value;

    /// Recovers XML tool calls out of free-text assistant content using
    /// `ctx.known_tool_names`, generating fresh ids via `ctx` (§4.D "XML tool-
    /// call recovery on response").
    fn response_to_ir(&self, response: &serde_json::Value, ctx: &mut ConversionContext) -> Result<IrResponse, crate::error::ToolbridgeError>;
    fn response_from_ir(&self, response: &IrResponse) -> serde_json::Value;

    fn chunk_to_ir(&self, chunk: &serde_json::Value, ctx: &mut ConversionContext) -> Result<Option<IrChunk>, crate::error::ToolbridgeError>;
    fn chunk_from_ir(&self, chunk: &IrChunk) -> Option<serde_json::Value>;

    /// Check whether `ir` can be represented in this converter's dialect
    /// without loss (§4.D).
    fn check_compatibility(&self, ir: &IrRequest) -> Compatibility;
}

/// Read-only provider-tag → converter registry (§4.E "owns a registry").
pub struct Registry {
    openai: openai::OpenaiConverter,
    ollama: ollama::OllamaConverter,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            openai: openai::OpenaiConverter,
            ollama: ollama::OllamaConverter,
        }
    }

    pub fn get(&self, dialect: Dialect) -> &dyn Converter {
        match dialect {
            Dialect::Openai => &self.openai,
            Dialect::Ollama => &self.ollama,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_both_dialects() {
        let reg = Registry::new();
        assert_eq!(reg.get(Dialect::Openai).dialect(), Dialect::Openai);
        assert_eq!(reg.get(Dialect::Ollama).dialect(), Dialect::Ollama);
    }

    #[test]
    fn provider_tag_matches_capability_table_keys() {
        assert_eq!(Dialect::Openai.provider_tag(), "openai");
        assert_eq!(Dialect::Ollama.provider_tag(), "ollama");
    }
}
