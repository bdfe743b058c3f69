//! Proxy configuration contract (spec §6 "Configuration (recognized
//! options)"). Parsing these from CLI flags or environment variables is an
//! external collaborator's job (§1 Out of scope); this struct just gives the
//! core modules that consume it (capability filter, engine, stream
//! processors) something concrete to construct, with the documented
//! defaults, in tests and call sites that don't have a real loader yet.

use crate::converters::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReinjectionType {
    #[default]
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub backend_mode: Dialect,
    pub backend_base_url: String,
    pub backend_api_key: Option<String>,

    /// `passTools` (§6; default `false`): forward native tool schemas
    /// unchanged when `true`, otherwise strip and inject XML instructions.
    pub pass_tools: bool,

    pub enable_tool_reinjection: bool,
    pub tool_reinjection_message_count: u32,
    pub tool_reinjection_token_count: u32,
    pub tool_reinjection_type: ReinjectionType,

    pub max_stream_buffer_size: usize,
    pub max_tool_call_buffer_size: usize,
    pub stream_connection_timeout_ms: u64,

    pub debug_mode: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            backend_mode: Dialect::Openai,
            backend_base_url: String::new(),
            backend_api_key: None,
            pass_tools: false,
            enable_tool_reinjection: false,
            tool_reinjection_message_count: 10,
            tool_reinjection_token_count: 4000,
            tool_reinjection_type: ReinjectionType::System,
            max_stream_buffer_size: 64 * 1024,
            max_tool_call_buffer_size: 64 * 1024,
            stream_connection_timeout_ms: 30_000,
            debug_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ProxyConfig::default();
        assert!(!cfg.pass_tools);
        assert_eq!(cfg.max_stream_buffer_size, 65536);
        assert_eq!(cfg.tool_reinjection_type, ReinjectionType::System);
    }
}
