//! Ollama-dialect converter (spec §4.D "Ollama-dialect mapping").
//!
//! `/api/chat` messages map onto the IR directly; `/api/generate`'s bare
//! `prompt` synthesizes a single user message. Generation controls live
//! under `options`; `arguments` on tool calls are Ollama-native objects, not
//! JSON strings.

use serde_json::{json, Value};

use crate::context::ConversionContext;
use crate::error::ToolbridgeError;
use crate::ir::*;
use crate::xml_toolcall;

use super::{Compatibility, Converter, Dialect};

pub struct OllamaConverter;

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn parse_created_at(raw: &Value) -> i64 {
    raw.as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

impl Converter for OllamaConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Ollama
    }

    fn to_ir(&self, request: &Value) -> Result<IrRequest, ToolbridgeError> {
        let model = request.get("model").and_then(Value::as_str).unwrap_or_default().to_string();

        let messages: Vec<Message> = if let Some(msgs) = request.get("messages").and_then(Value::as_array) {
            msgs.iter()
                .map(|m| Message {
                    role: parse_role(m.get("role").and_then(Value::as_str).unwrap_or("user")),
                    content: m.get("content").and_then(Value::as_str).map(|s| Content::Text(s.to_string())),
                    name: None,
                    tool_calls: m.get("tool_calls").and_then(Value::as_array).map(|tcs| {
                        tcs.iter()
                            .enumerate()
                            .map(|(i, tc)| ToolCall {
                                id: format!("call_{i}"),
                                kind: "function".to_string(),
                                function: ToolCallFunction {
                                    name: tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or_default().to_string(),
                                    arguments: Arguments::Object(tc.get("function").and_then(|f| f.get("arguments")).cloned().unwrap_or(Value::Null)),
                                },
                            })
                            .collect()
                    }),
                    tool_call_id: None,
                    refusal: None,
                })
                .collect()
        } else if let Some(prompt) = request.get("prompt").and_then(Value::as_str) {
            vec![Message {
                role: Role::User,
                content: Some(Content::Text(prompt.to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
                refusal: None,
            }]
        } else {
            return Err(ToolbridgeError::InvalidRequest("ollama request has neither messages nor prompt".into()));
        };

        let options = request.get("options").cloned().unwrap_or(Value::Null);
        let opt = |key: &str| options.get(key).cloned();

        let tools = request.get("tools").and_then(Value::as_array).map(|ts| {
            ts.iter()
                .map(|t| {
                    let f = t.get("function").unwrap_or(t);
                    ToolSchema {
                        name: f.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        description: f.get("description").and_then(Value::as_str).map(String::from),
                        parameters: f.get("parameters").cloned().unwrap_or(Value::Null),
                    }
                })
                .collect()
        });

        Ok(IrRequest {
            provider: "ollama".to_string(),
            model,
            messages,
            max_tokens: opt("num_predict").and_then(|v| v.as_u64()).map(|n| n as u32),
            temperature: opt("temperature").and_then(|v| v.as_f64()).map(|f| f as f32),
            top_p: opt("top_p").and_then(|v| v.as_f64()).map(|f| f as f32),
            top_k: opt("top_k").and_then(|v| v.as_u64()).map(|n| n as u32),
            frequency_penalty: None,
            presence_penalty: None,
            seed: opt("seed").and_then(|v| v.as_i64()),
            stop: opt("stop").and_then(|v| v.as_array().map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())),
            tools,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: request.get("format").and_then(|f| match f.as_str() {
                Some("json") => Some(ResponseFormatKind::JsonObject),
                _ => None,
            }),
            stream: request.get("stream").and_then(Value::as_bool).unwrap_or(true),
            stream_options: None,
            logit_bias: None,
            logprobs: None,
            top_logprobs: None,
            n: None,
            extensions: Default::default(),
        })
    }

    fn from_ir(&self, request: &IrRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({
                    "role": role_str(m.role),
                    "content": m.content.as_ref().map(Content::as_text).unwrap_or_default(),
                });
                if let Some(tool_calls) = &m.tool_calls {
                    obj["tool_calls"] = json!(tool_calls
                        .iter()
                        .map(|tc| json!({
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments.as_value(),
                            }
                        }))
                        .collect::<Vec<_>>());
                }
                obj
            })
            .collect();

        let mut options = serde_json::Map::new();
        if let Some(v) = request.max_tokens {
            options.insert("num_predict".into(), json!(v));
        }
        if let Some(v) = request.temperature {
            options.insert("temperature".into(), json!(v));
        }
        if let Some(v) = request.top_p {
            options.insert("top_p".into(), json!(v));
        }
        if let Some(v) = request.top_k {
            options.insert("top_k".into(), json!(v));
        }
        if let Some(v) = request.seed {
            options.insert("seed".into(), json!(v));
        }
        if let Some(v) = &request.stop {
            options.insert("stop".into(), json!(v));
        }

        let mut out = json!({
            "model": request.model,
            "messages": messages,
            "stream": request.stream,
        });
        if !options.is_empty() {
            out["options"] = Value::Object(options);
        }
        if let Some(tools) = &request.tools {
            out["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }))
                .collect::<Vec<_>>());
        }
        if matches!(request.response_format, Some(ResponseFormatKind::JsonObject)) {
            out["format"] = json!("json");
        }
        out
    }

    fn response_to_ir(&self, response: &Value, ctx: &mut ConversionContext) -> Result<IrResponse, ToolbridgeError> {
        let model = response.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
        let created = response.get("created_at").map(parse_created_at).unwrap_or(0);
        let msg = response.get("message").cloned().unwrap_or(Value::Null);

        let mut message = Message {
            role: parse_role(msg.get("role").and_then(Value::as_str).unwrap_or("assistant")),
            content: msg.get("content").and_then(Value::as_str).map(|s| Content::Text(s.to_string())),
            name: None,
            tool_calls: msg.get("tool_calls").and_then(Value::as_array).map(|tcs| {
                tcs.iter()
                    .enumerate()
                    .map(|(i, tc)| ToolCall {
                        id: format!("call_{i}"),
                        kind: "function".to_string(),
                        function: ToolCallFunction {
                            name: tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or_default().to_string(),
                            arguments: Arguments::Object(tc.get("function").and_then(|f| f.get("arguments")).cloned().unwrap_or(Value::Null)),
                        },
                    })
                    .collect()
            }),
            tool_call_id: None,
            refusal: None,
        };

        let mut finish_reason = if response.get("done").and_then(Value::as_bool).unwrap_or(true) {
            Some(FinishReason::Stop)
        } else {
            None
        };

        if message.tool_calls.is_none() {
            let text = message.content_text();
            let recovered = xml_toolcall::recover(&text, &ctx.known_tool_names);
            if !recovered.is_empty() {
                message.content = None;
                message.tool_calls = Some(recovered.into_iter().map(|rc| rc.into_tool_call(ctx.next_tool_call_id())).collect());
                finish_reason = Some(FinishReason::ToolCalls);
            }
        }

        let usage = Some(Usage {
            prompt_tokens: response.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: response.get("eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            total_tokens: (response.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0)
                + response.get("eval_count").and_then(Value::as_u64).unwrap_or(0)) as u32,
        });

        Ok(IrResponse {
            id: format!("ollama-{created}"),
            created,
            model,
            choices: vec![Choice { index: 0, message, finish_reason }],
            usage,
        })
    }

    fn response_from_ir(&self, response: &IrResponse) -> Value {
        let choice = response.choices.first();
        let message = choice.map(|c| &c.message);
        json!({
            "model": response.model,
            "created_at": chrono::DateTime::from_timestamp(response.created, 0).map(|dt| dt.to_rfc3339()).unwrap_or_default(),
            "message": {
                "role": message.map(|m| role_str(m.role)).unwrap_or("assistant"),
                "content": message.and_then(|m| m.content.as_ref()).map(Content::as_text).unwrap_or_default(),
                "tool_calls": message.and_then(|m| m.tool_calls.as_ref()).map(|tcs| tcs.iter().map(|tc| json!({
                    "function": { "name": tc.function.name, "arguments": tc.function.arguments.as_value() }
                })).collect::<Vec<_>>()),
            },
            "done": true,
            "prompt_eval_count": response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            "eval_count": response.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        })
    }

    fn chunk_to_ir(&self, chunk: &Value, ctx: &mut ConversionContext) -> Result<Option<IrChunk>, ToolbridgeError> {
        let _ = &ctx.known_tool_names;
        let model = chunk.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
        let created = chunk.get("created_at").map(parse_created_at).unwrap_or(0);
        let done = chunk.get("done").and_then(Value::as_bool).unwrap_or(false);
        let msg = chunk.get("message").cloned().unwrap_or(Value::Null);
        let content = msg.get("content").and_then(Value::as_str).map(String::from);

        let delta = Delta {
            role: if content.is_some() { Some(Role::Assistant) } else { None },
            content,
            tool_calls: None,
        };
        let finish_reason = if done { Some(FinishReason::Stop) } else { None };

        let usage = if done {
            Some(Usage {
                prompt_tokens: chunk.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
                completion_tokens: chunk.get("eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
                total_tokens: (chunk.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0)
                    + chunk.get("eval_count").and_then(Value::as_u64).unwrap_or(0)) as u32,
            })
        } else {
            None
        };

        Ok(Some(IrChunk {
            id: format!("ollama-{created}"),
            created,
            model,
            choices: vec![ChunkChoice { index: 0, delta, finish_reason }],
            usage,
        }))
    }

    fn chunk_from_ir(&self, chunk: &IrChunk) -> Option<Value> {
        let choice = chunk.choices.first();
        let done = choice.map(|c| c.finish_reason.is_some()).unwrap_or(chunk.usage.is_some());

        let mut message = json!({
            "role": "assistant",
            "content": choice.and_then(|c| c.delta.content.clone()).unwrap_or_default(),
        });
        if let Some(deltas) = choice.and_then(|c| c.delta.tool_calls.as_ref()) {
            message["tool_calls"] = json!(deltas
                .iter()
                .map(|d| json!({
                    "function": {
                        "name": d.name.clone().unwrap_or_default(),
                        "arguments": d
                            .arguments
                            .as_deref()
                            .and_then(|a| serde_json::from_str::<Value>(a).ok())
                            .unwrap_or(Value::Null),
                    }
                }))
                .collect::<Vec<_>>());
        }

        Some(json!({
            "model": chunk.model,
            "created_at": chrono::DateTime::from_timestamp(chunk.created, 0).map(|dt| dt.to_rfc3339()).unwrap_or_default(),
            "message": message,
            "done": done,
            "prompt_eval_count": chunk.usage.as_ref().map(|u| u.prompt_tokens),
            "eval_count": chunk.usage.as_ref().map(|u| u.completion_tokens),
        }))
    }

    fn check_compatibility(&self, ir: &IrRequest) -> Compatibility {
        let mut c = Compatibility { compatible: true, ..Default::default() };
        if ir.tools.is_some() {
            c.warnings.push("ollama tool_calls support is backend/model-dependent".to_string());
            c.transformations.push(super::transform_tag::TOOL_CALLS_UNSUPPORTED.to_string());
        }
        if ir.n.map(|n| n > 1).unwrap_or(false) {
            c.transformations.push(super::transform_tag::N_GT_1_UNSUPPORTED.to_string());
        }
        if matches!(&ir.response_format, Some(ResponseFormatKind::JsonSchema { .. })) {
            c.transformations.push(super::transform_tag::STRUCTURED_OUTPUTS_UNSUPPORTED.to_string());
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_ir_synthesizes_user_message_from_prompt() {
        let conv = OllamaConverter;
        let req = json!({"model": "llama3", "prompt": "hello"});
        let ir = conv.to_ir(&req).unwrap();
        assert_eq!(ir.messages.len(), 1);
        assert_eq!(ir.messages[0].role, Role::User);
        assert_eq!(ir.messages[0].content_text(), "hello");
    }

    #[test]
    fn to_ir_maps_options_block() {
        let conv = OllamaConverter;
        let req = json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "hi"}],
            "options": {"temperature": 0.5, "top_k": 40, "num_predict": 128},
        });
        let ir = conv.to_ir(&req).unwrap();
        assert_eq!(ir.temperature, Some(0.5));
        assert_eq!(ir.top_k, Some(40));
        assert_eq!(ir.max_tokens, Some(128));
    }

    #[test]
    fn response_to_ir_recovers_xml_tool_call() {
        let conv = OllamaConverter;
        let mut ctx = crate::context::ConversionContext::new(Dialect::Ollama, Dialect::Ollama, false)
            .with_known_tool_names(["search".to_string()]);
        let response = json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "<search><q>rust</q></search>"},
            "done": true,
        });
        let ir = conv.response_to_ir(&response, &mut ctx).unwrap();
        assert_eq!(ir.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn from_ir_serializes_tool_call_arguments_as_object() {
        let conv = OllamaConverter;
        let mut msg = Message::system("");
        msg.role = Role::Assistant;
        msg.tool_calls = Some(vec![ToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: ToolCallFunction { name: "search".into(), arguments: Arguments::Json("{\"q\":\"x\"}".into()) },
        }]);
        let ir = IrRequest {
            provider: "ollama".into(),
            model: "llama3".into(),
            messages: vec![msg],
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stop: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            stream: false,
            stream_options: None,
            logit_bias: None,
            logprobs: None,
            top_logprobs: None,
            n: None,
            extensions: Default::default(),
        };
        let out = conv.from_ir(&ir);
        assert!(out["messages"][0]["tool_calls"][0]["function"]["arguments"].is_object());
    }

    #[test]
    fn chunk_from_ir_carries_tool_call_deltas() {
        let conv = OllamaConverter;
        let chunk = IrChunk {
            id: "1".into(),
            created: 0,
            model: "llama3".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        name: Some("search".into()),
                        arguments: Some("{\"q\":\"rust\"}".into()),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let out = conv.chunk_from_ir(&chunk).unwrap();
        assert_eq!(out["message"]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(out["message"]["tool_calls"][0]["function"]["arguments"], json!({"q": "rust"}));
    }

    #[test]
    fn check_compatibility_flags_tools() {
        let conv = OllamaConverter;
        let ir = IrRequest {
            provider: "ollama".into(),
            model: "m".into(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stop: None,
            tools: Some(vec![ToolSchema { name: "search".into(), description: None, parameters: Value::Null }]),
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            stream: false,
            stream_options: None,
            logit_bias: None,
            logprobs: None,
            top_logprobs: None,
            n: None,
            extensions: Default::default(),
        };
        let compat = conv.check_compatibility(&ir);
        assert!(compat.transformations.contains(&super::super::transform_tag::TOOL_CALLS_UNSUPPORTED.to_string()));
    }
}
