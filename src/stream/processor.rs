//! Stream processors (spec §4.F) — the chunk-by-chunk pipeline that splices
//! the XML parser (4.A) into the byte stream, transforms chunks through the
//! engine (4.E), and re-emits them in the target dialect with correct
//! framing, ordering, usage accounting, and cancellation.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::context::ConversionContext;
use crate::converters::{Converter, Dialect, Registry};
use crate::error::ToolbridgeError;
use crate::ir::{ChunkChoice, Delta, FinishReason, IrChunk, ToolCallDelta, Usage};
use crate::xml_toolcall::{self, PartialState};

use super::buffer::TextBuffer;
use super::framing;
use super::state::StreamState;

/// Which of the three §4.F strategies applies to a `(from, to)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// e.g. OpenAI -> OpenAI.
    PassThroughXmlAware,
    /// Ollama -> Ollama.
    NativeSameDialect,
    /// Any cross-dialect pair.
    Converting,
}

pub fn select_strategy(from: Dialect, to: Dialect) -> Strategy {
    match (from, to) {
        (Dialect::Openai, Dialect::Openai) => Strategy::PassThroughXmlAware,
        (Dialect::Ollama, Dialect::Ollama) => Strategy::NativeSameDialect,
        _ => Strategy::Converting,
    }
}

/// Constructed per HTTP response (§4.F): owns the tools-derived known-name
/// set, the text buffer, and the per-stream state tracker.
pub struct StreamProcessor {
    pub from: Dialect,
    pub to: Dialect,
    strategy: Strategy,
    known_tool_names: HashSet<String>,
    include_usage: bool,
    text_buffer: TextBuffer,
    partial_state: Option<PartialState>,
    max_tool_call_buffer_size: usize,
    state: StreamState,
}

impl StreamProcessor {
    pub fn new(
        from: Dialect,
        to: Dialect,
        known_tool_names: HashSet<String>,
        include_usage: bool,
        max_stream_buffer_size: usize,
        max_tool_call_buffer_size: usize,
    ) -> Self {
        StreamProcessor {
            from,
            to,
            strategy: select_strategy(from, to),
            known_tool_names,
            include_usage,
            text_buffer: TextBuffer::new(max_stream_buffer_size),
            partial_state: None,
            max_tool_call_buffer_size,
            state: StreamState::new(),
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Decode one wire-level frame in the source dialect's framing (§6):
    /// an SSE `data: ...` line for OpenAI, an NDJSON line for Ollama.
    /// `None` means the frame carried no payload (SSE `[DONE]`, a blank
    /// line, a non-`data:` SSE field) and should simply be skipped.
    fn decode_incoming(&self, raw_frame: &str) -> Option<Value> {
        match self.from {
            Dialect::Openai => framing::decode_sse_data_line(raw_frame),
            Dialect::Ollama => framing::decode_ndjson_line(raw_frame),
        }
    }

    /// Encode one IR-derived payload into the target dialect's wire framing.
    fn encode_outgoing(&self, payload: &Value) -> String {
        match self.to {
            Dialect::Openai => framing::encode_sse_frame(payload),
            Dialect::Ollama => framing::encode_line_json(payload),
        }
    }

    /// `processChunk(bytes)` (§4.F): takes one raw source-dialect wire frame
    /// (an SSE line or an NDJSON line) and returns zero or more encoded
    /// target-dialect wire frames, in emission order.
    pub fn process_chunk(&mut self, registry: &Registry, ctx: &mut ConversionContext, raw_frame: &str) -> Result<Vec<String>, ToolbridgeError> {
        if self.state.stream_ended {
            return Ok(Vec::new());
        }

        let raw_chunk = match self.decode_incoming(raw_frame) {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        self.state.record_chunk();

        let source = registry.get(self.from);
        let target = registry.get(self.to);

        let ir_chunk = match source.chunk_to_ir(&raw_chunk, ctx)? {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut values = Vec::new();

        if ir_chunk.choices.is_empty() {
            // usage-only tail chunk: pass straight through to the target.
            values.extend(target.chunk_from_ir(&ir_chunk));
        } else {
            for choice in &ir_chunk.choices {
                self.process_choice(target, &ir_chunk, choice, &mut values)?;
            }

            if self.include_usage && ir_chunk.usage.is_some() {
                let usage_chunk = IrChunk { id: ir_chunk.id.clone(), created: ir_chunk.created, model: ir_chunk.model.clone(), choices: vec![], usage: ir_chunk.usage.clone() };
                values.extend(target.chunk_from_ir(&usage_chunk));
            }
        }

        Ok(values.iter().map(|v| self.encode_outgoing(v)).collect())
    }

    fn process_choice(&mut self, target: &dyn Converter, ir_chunk: &IrChunk, choice: &ChunkChoice, out: &mut Vec<Value>) -> Result<(), ToolbridgeError> {
        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            self.text_buffer.append(text);
            let buffered = self.text_buffer.get_content().to_string();
            let result = xml_toolcall::extract_partial(&buffered, &self.known_tool_names, self.partial_state.take(), self.max_tool_call_buffer_size);

            if result.complete {
                let scanned = result.content.clone().unwrap_or_default();
                if let Some(tool_start) = xml_toolcall::locate_tool_start(&scanned, &self.known_tool_names) {
                    let preceding = &scanned[..tool_start];
                    if !preceding.is_empty() {
                        out.push(self.encode_content_delta(target, ir_chunk, preceding));
                        self.state.has_emitted_content = true;
                    }
                }
                let call = result.tool_call.expect("extract_partial complete implies a tool call");
                self.emit_tool_call_sequence(target, ir_chunk, &call, out);
                self.text_buffer.clear();
                self.partial_state = None;
            } else if let Some(ps) = result.partial_state {
                if ps.might_be_tool_call {
                    self.partial_state = Some(ps);
                } else {
                    let flushed = self.text_buffer.extract_and_clear();
                    self.partial_state = None;
                    if !flushed.is_empty() {
                        out.push(self.encode_content_delta(target, ir_chunk, &flushed));
                        self.state.has_emitted_content = true;
                    }
                }
            }
        } else if choice.delta.tool_calls.is_some() || choice.delta.role.is_some() {
            if let Some(v) = target.chunk_from_ir(ir_chunk) {
                out.push(v);
            }
        }

        if let Some(reason) = choice.finish_reason {
            if self.state.mark_finish_emitted() {
                out.push(self.encode_finish(target, ir_chunk, reason));
            }
        }

        Ok(())
    }

    fn encode_content_delta(&self, target: &dyn Converter, template: &IrChunk, text: &str) -> Value {
        let chunk = IrChunk {
            id: template.id.clone(),
            created: template.created,
            model: template.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta { role: None, content: Some(text.to_string()), tool_calls: None },
                finish_reason: None,
            }],
            usage: None,
        };
        target.chunk_from_ir(&chunk).unwrap_or(json!({}))
    }

    fn encode_finish(&self, target: &dyn Converter, template: &IrChunk, reason: FinishReason) -> Value {
        let chunk = IrChunk {
            id: template.id.clone(),
            created: template.created,
            model: template.model.clone(),
            choices: vec![ChunkChoice { index: 0, delta: Delta::default(), finish_reason: Some(reason) }],
            usage: None,
        };
        target.chunk_from_ir(&chunk).unwrap_or(json!({}))
    }

    /// Synthesize the role / name / arguments / finish delta sequence for a
    /// recovered tool call (§4.F strategy 1 "On complete=true").
    fn emit_tool_call_sequence(&mut self, target: &dyn Converter, template: &IrChunk, call: &xml_toolcall::RawToolCall, out: &mut Vec<Value>) {
        self.state.start_tool_call(call.name.clone());

        let role_chunk = IrChunk {
            id: template.id.clone(),
            created: template.created,
            model: template.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta { role: Some(crate::ir::Role::Assistant), content: None, tool_calls: None },
                finish_reason: None,
            }],
            usage: None,
        };
        if let Some(v) = target.chunk_from_ir(&role_chunk) {
            out.push(v);
        }

        let args_json = call.arguments.to_string();
        let name_chunk = IrChunk {
            id: template.id.clone(),
            created: template.created,
            model: template.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallDelta { index: 0, id: Some(format!("call_{}", self.state.chunk_count)), name: Some(call.name.clone()), arguments: None }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        if let Some(v) = target.chunk_from_ir(&name_chunk) {
            out.push(v);
        }

        let args_chunk = IrChunk {
            id: template.id.clone(),
            created: template.created,
            model: template.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallDelta { index: 0, id: None, name: None, arguments: Some(args_json) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        if let Some(v) = target.chunk_from_ir(&args_chunk) {
            out.push(v);
        }

        self.state.finish_tool_call();
        if self.state.mark_finish_emitted() {
            out.push(self.encode_finish(target, template, FinishReason::ToolCalls));
        }
    }

    /// `end()` (§4.F) — idempotent. Synthesizes the usage-only tail frame
    /// when `includeUsage` was requested, flushes any remaining withheld
    /// plain text, and writes the dialect's stream terminator exactly once
    /// (§6 "Stream framing (normative)", §8 "terminator written exactly
    /// once"): a literal `data: [DONE]\n\n` for OpenAI, or a final
    /// `done:true` NDJSON line for Ollama if one was never emitted as part
    /// of a finish-carrying chunk.
    pub fn end(&mut self, target: &dyn Converter, final_usage: Option<Usage>, model: &str, id: &str, created: i64) -> Vec<String> {
        if !self.state.end() {
            return Vec::new();
        }
        let mut values = Vec::new();

        if !self.text_buffer.get_content().is_empty() {
            let text = self.text_buffer.extract_and_clear();
            values.push(self.encode_content_delta(
                target,
                &IrChunk { id: id.to_string(), created, model: model.to_string(), choices: vec![], usage: None },
                &text,
            ));
        }

        if self.include_usage {
            if let Some(usage) = final_usage {
                values.push(
                    target
                        .chunk_from_ir(&IrChunk { id: id.to_string(), created, model: model.to_string(), choices: vec![], usage: Some(usage) })
                        .unwrap_or(json!({})),
                );
            }
        }

        let mut out: Vec<String> = values.iter().map(|v| self.encode_outgoing(v)).collect();

        match self.to {
            Dialect::Openai => {
                if self.state.mark_done_sent() {
                    out.push(framing::SSE_DONE.to_string());
                }
            }
            Dialect::Ollama => {
                if self.state.finish_emitted {
                    self.state.mark_done_sent();
                } else if self.state.mark_done_sent() {
                    out.push(framing::encode_line_json(&json!({"model": model, "done": true})));
                }
            }
        }

        out
    }

    /// Close with an error (§4.F "Cancellation"): emits a dialect error
    /// frame, never writes again afterward.
    pub fn close_with_error(&mut self, message: &str, code: &str) -> Option<String> {
        if !self.state.end() {
            return None;
        }
        self.state.mark_done_sent();
        Some(match self.to {
            Dialect::Openai => framing::encode_sse_error(message, code),
            Dialect::Ollama => framing::encode_line_json_error(message, code),
        })
    }
}
