//! Capability table & request filter (spec §4.B).

use crate::context::ConversionContext;
use crate::ir::IrRequest;

/// Boolean capability flags keyed by provider tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub json_schema_response_format: bool,
    pub stream_usage_chunk: bool,
    pub logprobs: bool,
    pub top_logprobs: bool,
    pub seed: bool,
    pub n: bool,
    pub frequency_penalty: bool,
    pub presence_penalty: bool,
    pub user_field: bool,
}

impl Capabilities {
    /// OpenAI-compatible backends support essentially the full surface.
    pub const OPENAI: Capabilities = Capabilities {
        json_schema_response_format: true,
        stream_usage_chunk: true,
        logprobs: true,
        top_logprobs: true,
        seed: true,
        n: true,
        frequency_penalty: true,
        presence_penalty: true,
        user_field: true,
    };

    /// Ollama's `/api/chat` and `/api/generate` have no concept of
    /// logprobs, n>1, penalties, or a `user` field.
    pub const OLLAMA: Capabilities = Capabilities {
        json_schema_response_format: false,
        stream_usage_chunk: true,
        logprobs: false,
        top_logprobs: false,
        seed: true,
        n: false,
        frequency_penalty: false,
        presence_penalty: false,
        user_field: false,
    };

    pub fn for_provider(tag: &str) -> Option<Capabilities> {
        match tag {
            "openai" => Some(Capabilities::OPENAI),
            "ollama" => Some(Capabilities::OLLAMA),
            _ => None,
        }
    }
}

/// Drop fields the target provider doesn't support, logging each drop to
/// `ctx.transformation_log`. Unknown provider tags pass through unchanged
/// with a warning (§4.B).
pub fn filter(mut request: IrRequest, provider_tag: &str, ctx: &mut ConversionContext) -> IrRequest {
    let caps = match Capabilities::for_provider(provider_tag) {
        Some(c) => c,
        None => {
            tracing::warn!(provider = provider_tag, "unknown provider tag, passing request through unfiltered");
            return request;
        }
    };

    if !caps.logprobs && request.logprobs.is_some() {
        request.logprobs = None;
        ctx.log("capability_filter", format!("dropped logprobs for {provider_tag}"));
    }
    if !caps.top_logprobs && request.top_logprobs.is_some() {
        request.top_logprobs = None;
        ctx.log("capability_filter", format!("dropped top_logprobs for {provider_tag}"));
    }
    if !caps.seed && request.seed.is_some() {
        request.seed = None;
        ctx.log("capability_filter", format!("dropped seed for {provider_tag}"));
    }
    if !caps.n && request.n.is_some() {
        request.n = None;
        ctx.log("capability_filter", format!("dropped n for {provider_tag}"));
    }
    if !caps.frequency_penalty && request.frequency_penalty.is_some() {
        request.frequency_penalty = None;
        ctx.log("capability_filter", format!("dropped frequency_penalty for {provider_tag}"));
    }
    if !caps.presence_penalty && request.presence_penalty.is_some() {
        request.presence_penalty = None;
        ctx.log("capability_filter", format!("dropped presence_penalty for {provider_tag}"));
    }
    if !caps.json_schema_response_format {
        if let Some(crate::ir::ResponseFormatKind::JsonSchema { .. }) = &request.response_format {
            request.response_format = Some(crate::ir::ResponseFormatKind::JsonObject);
            ctx.log(
                "capability_filter",
                format!("downgraded json_schema response_format to json_object for {provider_tag}"),
            );
        }
    }
    if !caps.stream_usage_chunk {
        if let Some(opts) = &mut request.stream_options {
            if opts.include_usage {
                opts.include_usage = false;
                ctx.log("capability_filter", format!("dropped stream_options.include_usage for {provider_tag}"));
            }
        }
    }

    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::Dialect;
    use crate::ir::{Message, Role};

    fn base_request() -> IrRequest {
        IrRequest {
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![Message::system("hi")],
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: Some(0.5),
            presence_penalty: Some(0.5),
            seed: Some(1),
            stop: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            stream: false,
            stream_options: None,
            logit_bias: None,
            logprobs: Some(true),
            top_logprobs: Some(3),
            n: Some(2),
            extensions: Default::default(),
        }
    }

    #[test]
    fn drops_unsupported_fields_for_ollama() {
        let mut ctx = ConversionContext::new(Dialect::Openai, Dialect::Ollama, false);
        let out = filter(base_request(), "ollama", &mut ctx);
        assert!(out.logprobs.is_none());
        assert!(out.top_logprobs.is_none());
        assert!(out.n.is_none());
        assert!(out.frequency_penalty.is_none());
        assert!(out.presence_penalty.is_none());
        assert!(out.seed.is_some());
        assert!(!ctx.transformation_log.is_empty());
    }

    #[test]
    fn unknown_provider_passes_through() {
        let mut ctx = ConversionContext::new(Dialect::Openai, Dialect::Openai, false);
        let out = filter(base_request(), "mystery", &mut ctx);
        assert_eq!(out.logprobs, Some(true));
        assert!(ctx.transformation_log.is_empty());
    }

    #[test]
    fn openai_keeps_everything() {
        let mut ctx = ConversionContext::new(Dialect::Openai, Dialect::Openai, false);
        let out = filter(base_request(), "openai", &mut ctx);
        assert_eq!(out.logprobs, Some(true));
        assert_eq!(out.n, Some(2));
    }
}
