//! OpenAI-dialect converter (spec §4.D "OpenAI-dialect mapping").
//!
//! Wire field names map onto the IR name-for-name (`max_tokens`, `top_p`,
//! `tool_choice`, ...), so this converter is mostly straight (de)serialization
//! plus the XML tool-call recovery pass on responses.

use serde_json::{json, Value};

use crate::context::ConversionContext;
use crate::error::ToolbridgeError;
use crate::ir::*;
use crate::xml_toolcall;

use super::{transform_tag, Compatibility, Converter, Dialect};

pub struct OpenaiConverter;

impl Converter for OpenaiConverter {
    fn dialect(&self) -> Dialect {
        Dialect::Openai
    }

    fn to_ir(&self, request: &Value) -> Result<IrRequest, ToolbridgeError> {
        let mut ir: IrRequest = serde_json::from_value(request.clone())
            .map_err(|e| ToolbridgeError::InvalidRequest(format!("openai request: {e}")))?;
        ir.provider = "openai".to_string();
        Ok(ir)
    }

    fn from_ir(&self, request: &IrRequest) -> Value {
        // IR field names already match the OpenAI wire shape; serialize
        // directly and drop the informational `provider` tag plus empty
        // `extensions` map, which are not part of the wire contract.
        let mut v = serde_json::to_value(request).unwrap_or(Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.remove("provider");
            let extensions = obj.remove("extensions");
            if let Some(Value::Object(ext)) = extensions {
                for (k, val) in ext {
                    obj.entry(k).or_insert(val);
                }
            }
        }
        if let Some(messages) = v.get_mut("messages").and_then(Value::as_array_mut) {
            for (msg, ir_msg) in messages.iter_mut().zip(&request.messages) {
                stringify_tool_call_arguments(msg, ir_msg.tool_calls.as_deref());
            }
        }
        v
    }

    fn response_to_ir(&self, response: &Value, ctx: &mut ConversionContext) -> Result<IrResponse, ToolbridgeError> {
        let id = response.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let created = response.get("created").and_then(Value::as_i64).unwrap_or_default();
        let model = response.get("model").and_then(Value::as_str).unwrap_or_default().to_string();

        let raw_choices = response.get("choices").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut choices = Vec::with_capacity(raw_choices.len());
        for rc in raw_choices {
            let index = rc.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            let msg_v = rc.get("message").cloned().unwrap_or(Value::Null);
            let mut message: Message = serde_json::from_value(msg_v)
                .map_err(|e| ToolbridgeError::ConversionFailed(format!("openai message: {e}")))?;
            let mut finish_reason = rc
                .get("finish_reason")
                .and_then(Value::as_str)
                .and_then(parse_finish_reason);

            if message.tool_calls.is_none() {
                let text = message.content_text();
                let recovered = xml_toolcall::recover(&text, &ctx.known_tool_names);
                if !recovered.is_empty() {
                    message.content = None;
                    message.tool_calls = Some(
                        recovered
                            .into_iter()
                            .map(|rc| rc.into_tool_call(ctx.next_tool_call_id()))
                            .collect(),
                    );
                    finish_reason = Some(FinishReason::ToolCalls);
                }
            }

            choices.push(Choice { index, message, finish_reason });
        }

        let usage = response.get("usage").map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        });

        Ok(IrResponse { id, created, model, choices, usage })
    }

    fn response_from_ir(&self, response: &IrResponse) -> Value {
        json!({
            "id": response.id,
            "object": "chat.completion",
            "created": response.created,
            "model": response.model,
            "choices": response.choices.iter().map(|c| {
                let mut message = serde_json::to_value(&c.message).unwrap_or(Value::Null);
                stringify_tool_call_arguments(&mut message, c.message.tool_calls.as_deref());
                json!({
                    "index": c.index,
                    "message": message,
                    "finish_reason": c.finish_reason.map(finish_reason_str),
                })
            }).collect::<Vec<_>>(),
            "usage": response.usage.as_ref().map(|u| json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })),
        })
    }

    fn chunk_to_ir(&self, chunk: &Value, ctx: &mut ConversionContext) -> Result<Option<IrChunk>, ToolbridgeError> {
        let _ = &ctx.known_tool_names;
        let id = chunk.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let created = chunk.get("created").and_then(Value::as_i64).unwrap_or_default();
        let model = chunk.get("model").and_then(Value::as_str).unwrap_or_default().to_string();

        let raw_choices = chunk.get("choices").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut choices = Vec::with_capacity(raw_choices.len());
        for rc in raw_choices {
            let index = rc.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            let delta_v = rc.get("delta").cloned().unwrap_or(Value::Null);
            let delta: Delta = serde_json::from_value(delta_v).unwrap_or_default();
            let finish_reason = rc.get("finish_reason").and_then(Value::as_str).and_then(parse_finish_reason);
            choices.push(ChunkChoice { index, delta, finish_reason });
        }

        let usage = chunk.get("usage").map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        });

        Ok(Some(IrChunk { id, created, model, choices, usage }))
    }

    fn chunk_from_ir(&self, chunk: &IrChunk) -> Option<Value> {
        Some(json!({
            "id": chunk.id,
            "object": "chat.completion.chunk",
            "created": chunk.created,
            "model": chunk.model,
            "choices": chunk.choices.iter().map(|c| json!({
                "index": c.index,
                "delta": serde_json::to_value(&c.delta).unwrap_or(Value::Null),
                "finish_reason": c.finish_reason.map(finish_reason_str),
            })).collect::<Vec<_>>(),
            "usage": chunk.usage.as_ref().map(|u| json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })),
        }))
    }

    fn check_compatibility(&self, ir: &IrRequest) -> Compatibility {
        let mut c = Compatibility { compatible: true, ..Default::default() };
        if let Some(n) = ir.n {
            if n > 1 {
                // OpenAI supports n>1 natively; nothing to flag.
                let _ = n;
            }
        }
        if matches!(&ir.response_format, Some(ResponseFormatKind::JsonSchema { .. })) {
            // supported natively, no transform needed
        }
        let _ = transform_tag::TOOL_CALLS_UNSUPPORTED;
        c
    }
}

/// Force `function.arguments` on each serialized tool call to the OpenAI
/// wire's JSON-string shape, regardless of which `Arguments` variant the IR
/// held (§4.D "when IR→OpenAI, serialize to JSON string").
fn stringify_tool_call_arguments(msg: &mut Value, tool_calls: Option<&[ToolCall]>) {
    let Some(tool_calls) = tool_calls else { return };
    if let Some(arr) = msg.get_mut("tool_calls").and_then(Value::as_array_mut) {
        for (entry, tc) in arr.iter_mut().zip(tool_calls) {
            if let Some(args) = entry.get_mut("function").and_then(|f| f.get_mut("arguments")) {
                *args = Value::String(tc.function.arguments.as_json_string());
            }
        }
    }
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        "function_call" => Some(FinishReason::FunctionCall),
        _ => None,
    }
}

fn finish_reason_str(f: FinishReason) -> &'static str {
    match f {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::FunctionCall => "function_call",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_ir_round_trips_basic_fields() {
        let conv = OpenaiConverter;
        let req = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
            "top_p": 0.9,
        });
        let ir = conv.to_ir(&req).unwrap();
        assert_eq!(ir.model, "gpt-4o");
        assert_eq!(ir.max_tokens, Some(100));
        assert_eq!(ir.provider, "openai");

        let back = conv.from_ir(&ir);
        assert_eq!(back["max_tokens"], 100);
        assert_eq!(back["model"], "gpt-4o");
        assert!(back.get("provider").is_none());
    }

    #[test]
    fn response_to_ir_recovers_xml_tool_call() {
        let conv = OpenaiConverter;
        let mut ctx = ConversionContext::new(Dialect::Openai, Dialect::Openai, false)
            .with_known_tool_names(["get_weather".to_string()]);
        let response = json!({
            "id": "chatcmpl-1",
            "created": 1,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "<toolbridge:calls><get_weather><city>nyc</city></get_weather></toolbridge:calls>"
                },
                "finish_reason": "stop",
            }],
        });
        let ir = conv.response_to_ir(&response, &mut ctx).unwrap();
        let choice = &ir.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert!(choice.message.tool_calls.is_some());
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "get_weather");
    }

    #[test]
    fn response_from_ir_stringifies_object_arguments() {
        let conv = OpenaiConverter;
        let mut msg = Message::system("");
        msg.role = crate::ir::Role::Assistant;
        msg.content = None;
        msg.tool_calls = Some(vec![ToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: ToolCallFunction { name: "get_weather".into(), arguments: Arguments::Object(json!({"city": "nyc"})) },
        }]);
        let response = IrResponse {
            id: "resp_1".into(),
            created: 1,
            model: "gpt-4o".into(),
            choices: vec![Choice { index: 0, message: msg, finish_reason: Some(FinishReason::ToolCalls) }],
            usage: None,
        };
        let out = conv.response_from_ir(&response);
        let args = &out["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"];
        assert!(args.is_string(), "arguments must be emitted as a JSON string, got {args:?}");
        assert_eq!(serde_json::from_str::<Value>(args.as_str().unwrap()).unwrap(), json!({"city": "nyc"}));
    }

    #[test]
    fn from_ir_stringifies_object_arguments() {
        let conv = OpenaiConverter;
        let mut msg = Message::system("");
        msg.role = crate::ir::Role::Assistant;
        msg.content = None;
        msg.tool_calls = Some(vec![ToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: ToolCallFunction { name: "get_weather".into(), arguments: Arguments::Object(json!({"city": "nyc"})) },
        }]);
        let request = IrRequest {
            provider: "openai".into(),
            model: "gpt-4o".into(),
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
        let out = conv.from_ir(&request);
        let args = &out["messages"][0]["tool_calls"][0]["function"]["arguments"];
        assert!(args.is_string(), "arguments must be emitted as a JSON string, got {args:?}");
    }
}
