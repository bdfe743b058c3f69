//! Translation engine (spec §4.E) — orchestrates source→IR→transforms→target
//! for requests, responses, and single chunks.

use serde_json::Value;

use crate::capability;
use crate::context::ConversionContext;
use crate::converters::{transform_tag, Converter, Dialect, Registry};
use crate::error::ToolbridgeError;
use crate::ir::{Content, IrRequest, Message, ResponseFormatKind, Role, ToolChoice};
use crate::tool_instructions;

pub struct Engine {
    registry: Registry,
}

impl Engine {
    pub fn new() -> Self {
        Engine { registry: Registry::new() }
    }

    /// `convertRequest({from,to,request,context})` (§4.E).
    pub fn convert_request(
        &self,
        from: Dialect,
        to: Dialect,
        request: &Value,
        strict: bool,
        ctx: &mut ConversionContext,
    ) -> Result<Value, ToolbridgeError> {
        let source = self.registry.get(from);
        let target = self.registry.get(to);

        let ir = source.to_ir(request)?;
        ctx.known_tool_names = ir
            .tools
            .as_ref()
            .map(|ts| ts.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();

        let compat = target.check_compatibility(&ir);
        if strict && !compat.compatible {
            return Err(ToolbridgeError::UnsupportedFeature(compat.unsupported_features.join(", ")));
        }

        let ir = apply_transforms(ir, &compat, to, ctx);
        Ok(target.from_ir(&ir))
    }

    /// `convertResponse(response, from, to)` (§4.E). Passthrough when
    /// `from==to`; otherwise routes through the IR with tool-call recovery.
    pub fn convert_response(&self, response: &Value, from: Dialect, to: Dialect, ctx: &mut ConversionContext) -> Result<Value, ToolbridgeError> {
        if from == to {
            return Ok(response.clone());
        }
        let source = self.registry.get(from);
        let target = self.registry.get(to);
        let ir = source.response_to_ir(response, ctx)?;
        Ok(target.response_from_ir(&ir))
    }

    /// `convertChunk(chunk, from, to, context)` (§4.E). `Ok(None)` means
    /// "skip this chunk" and is a valid outcome, not an error.
    pub fn convert_chunk(&self, chunk: &Value, from: Dialect, to: Dialect, ctx: &mut ConversionContext) -> Result<Option<Value>, ToolbridgeError> {
        if from == to {
            return Ok(Some(chunk.clone()));
        }
        let source = self.registry.get(from);
        let target = self.registry.get(to);
        let ir = match source.chunk_to_ir(chunk, ctx)? {
            Some(ir) => ir,
            None => return Ok(None),
        };
        Ok(target.chunk_from_ir(&ir))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

const SEPARATOR: &str = "\n\n---\n\n";

/// `applyTransforms(ir, compat, context)` (§4.E), run in the three ordered
/// rules the spec lists.
pub fn apply_transforms(mut ir: IrRequest, compat: &crate::converters::Compatibility, to: Dialect, ctx: &mut ConversionContext) -> IrRequest {
    // Rule 1: tool stripping / XML injection.
    let wants_stripped = ir.tools.is_some() || matches!(ir.tool_choice, Some(ToolChoice::None));
    if !ctx.pass_tools && wants_stripped {
        let mut block = ir.tools.as_deref().map(tool_instructions::build).unwrap_or_default();

        match &ir.tool_choice {
            Some(ToolChoice::None) => {
                block.push('\n');
                block.push_str(tool_instructions::disabled_directive());
            }
            Some(ToolChoice::Required) => {
                block.push('\n');
                block.push_str(&tool_instructions::required_directive());
            }
            Some(ToolChoice::Function { name }) => {
                block.push('\n');
                block.push_str(&tool_instructions::mandatory_tool_directive(name));
            }
            _ => {}
        }

        inject_system_text(&mut ir.messages, &block);

        ir.tools = None;
        ir.tool_choice = None;
        ir.parallel_tool_calls = None;
        ctx.log("strip_native_tools", format!("injected {} byte instruction block", block.len()));
    }

    // Rule 2: capability-driven transformations from checkCompatibility.
    if compat.transformations.iter().any(|t| t == transform_tag::TOOL_CALLS_UNSUPPORTED) {
        if let Some(tools) = &ir.tools {
            let block = tool_instructions::build(tools);
            inject_system_text(&mut ir.messages, &block);
            ir.tools = None;
            ctx.log("fold_tools_into_instructions", "tool_calls unsupported by target".to_string());
        }
    }
    if compat.transformations.iter().any(|t| t == transform_tag::N_GT_1_UNSUPPORTED) {
        ir.n = Some(1);
        ctx.log("force_n_1", "n>1 unsupported by target".to_string());
    }
    if compat.transformations.iter().any(|t| t == transform_tag::STRUCTURED_OUTPUTS_UNSUPPORTED) {
        if let Some(ResponseFormatKind::JsonSchema { name, schema, .. }) = ir.response_format.clone() {
            ir.response_format = Some(ResponseFormatKind::JsonObject);
            let desc = format!(
                "Respond with a single JSON object matching this schema named `{name}`:\n{}",
                serde_json::to_string_pretty(&schema).unwrap_or_default()
            );
            ir.messages.insert(
                0,
                Message {
                    role: Role::System,
                    content: Some(Content::Text(desc)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    refusal: None,
                },
            );
            ctx.log("downgrade_structured_outputs", "json_schema unsupported by target".to_string());
        }
    }

    // Rule 3: apply 4.B's capability filter against the target provider.
    capability::filter(ir, to.provider_tag(), ctx)
}

fn inject_system_text(messages: &mut Vec<Message>, block: &str) {
    if block.is_empty() {
        return;
    }
    if let Some(first_system) = messages.iter_mut().find(|m| m.role == Role::System) {
        let existing = first_system.content_text();
        if !existing.contains(tool_instructions::HEADING) {
            let combined = if existing.is_empty() { block.to_string() } else { format!("{existing}{SEPARATOR}{block}") };
            first_system.content = Some(Content::Text(combined));
        }
    } else {
        messages.insert(
            0,
            Message {
                role: Role::System,
                content: Some(Content::Text(block.to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
                refusal: None,
            },
        );
    }
}
