//! Stream framing (spec §6 "Stream framing (normative)").

use serde_json::Value;

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Encode one outgoing SSE frame: `data: <json>\n\n`.
pub fn encode_sse_frame(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

/// Encode an SSE error frame (§4.F strategy 3).
pub fn encode_sse_error(message: &str, code: &str) -> String {
    let payload = serde_json::json!({ "error": { "message": message, "code": code } });
    format!("data: {payload}\n\n")
}

/// Parse one SSE `data:` line (without its trailing blank line) into its
/// JSON payload, or `None` for `[DONE]` / non-data lines.
pub fn decode_sse_data_line(line: &str) -> Option<Value> {
    let line = line.trim();
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return None;
    }
    serde_json::from_str(payload).ok()
}

/// Encode one outgoing line-JSON frame: `<json>\n`.
pub fn encode_line_json(payload: &Value) -> String {
    format!("{}\n", payload)
}

/// Encode a line-JSON error frame (§4.F strategy 3).
pub fn encode_line_json_error(message: &str, code: &str) -> String {
    let payload = serde_json::json!({ "error": message, "code": code, "done": true });
    format!("{payload}\n")
}

/// Parse one NDJSON line into its payload.
pub fn decode_ndjson_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

pub fn is_ndjson_done(payload: &Value) -> bool {
    payload.get("done").and_then(Value::as_bool).unwrap_or(false)
}
