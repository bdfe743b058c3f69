//! Format detector (spec §4.G) — chooses the source dialect from URL,
//! header, and body shape, in that priority order.

use serde_json::Value;

use crate::converters::Dialect;

/// Detect the dialect of an incoming request. `url_path`, `headers` (already
/// lower-cased key/value pairs), and `body` are the only inputs; no network
/// or config access (§4.G contract).
pub fn detect(body: &Value, headers: &[(String, String)], url_path: &str) -> Dialect {
    if url_path.contains("/api/chat")
        || url_path.contains("/api/generate")
        || url_path.contains("/api/tags")
        || url_path.contains("/api/show")
    {
        return Dialect::Ollama;
    }
    if url_path.contains("/v1/") {
        return Dialect::Openai;
    }

    if let Some((_, value)) = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("x-api-format")) {
        match value.to_lowercase().as_str() {
            "openai" => return Dialect::Openai,
            "ollama" => return Dialect::Ollama,
            _ => {}
        }
    }

    if body.get("prompt").is_some()
        || body.get("response").is_some()
        || body.get("done").and_then(Value::as_bool).is_some()
        || (body.get("model").is_some() && body.get("created_at").is_some())
    {
        return Dialect::Ollama;
    }
    if body.get("messages").and_then(Value::as_array).is_some() {
        return Dialect::Openai;
    }

    Dialect::Openai
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_prefix_wins_over_body_shape() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect(&body, &[], "/api/chat"), Dialect::Ollama);
        assert_eq!(detect(&body, &[], "/v1/chat/completions"), Dialect::Openai);
    }

    #[test]
    fn header_used_when_no_url_match() {
        let body = json!({});
        let headers = vec![("x-api-format".to_string(), "Ollama".to_string())];
        assert_eq!(detect(&body, &headers, "/chat"), Dialect::Ollama);
    }

    #[test]
    fn body_shape_prompt_field_implies_ollama() {
        let body = json!({"model": "llama3", "prompt": "hi"});
        assert_eq!(detect(&body, &[], "/chat"), Dialect::Ollama);
    }

    #[test]
    fn body_shape_model_and_created_at_implies_ollama() {
        let body = json!({"model": "llama3", "created_at": "2024-01-01T00:00:00Z"});
        assert_eq!(detect(&body, &[], "/chat"), Dialect::Ollama);
    }

    #[test]
    fn body_shape_messages_implies_openai() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect(&body, &[], "/chat"), Dialect::Openai);
    }

    #[test]
    fn defaults_to_openai() {
        let body = json!({});
        assert_eq!(detect(&body, &[], "/chat"), Dialect::Openai);
    }
}
