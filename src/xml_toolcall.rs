//! XML tool-call parser (spec §4.A) — the hardest and most interesting part
//! of the repository. Classifies, buffers, and extracts tool invocations
//! from model text, in both complete and streaming/partial modes.
//!
//! Grounded on the teacher's `api/xml_toolcall.rs` state-machine approach
//! (quick_xml event scanning with a small explicit `ParseState`), generalized
//! here to a hand-written depth-tracking balancer over arbitrary known tool
//! names rather than one fixed `tool_call` root, plus a streaming extractor
//! the teacher did not need (its own parser only ran on fully-buffered text).

use std::collections::HashSet;

use serde_json::Value;

use crate::ir::{Arguments, ToolCall, ToolCallFunction};

/// One recovered invocation before an id is assigned (§4.A contract
/// `ToolCall? {name, arguments}`).
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: Value,
}

impl RawToolCall {
    pub fn into_tool_call(self, id: String) -> ToolCall {
        ToolCall {
            id,
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: self.name,
                arguments: Arguments::Object(self.arguments),
            },
        }
    }
}

const HTML_TAGS: &[&str] = &[
    "div", "span", "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "table", "tr", "td",
    "th", "a", "img", "style", "script", "link", "meta", "title", "head", "body", "html", "form",
    "input", "button", "textarea", "select", "option",
];

const RAW_TEXT_CHILDREN: &[&str] = &["code", "html", "markdown", "md", "body", "content"];

/// Default partial-buffer ceiling (§4.A "configurable, default on the order
/// of 64 KiB").
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Strip `<think>`/`<thinking>`/`[thinking]`/`◁think▷` regions and their
/// bracket-variant closers (§4.A preprocessing step i).
fn strip_reasoning_regions(text: &str) -> String {
    const PAIRS: &[(&str, &str)] = &[
        ("<think>", "</think>"),
        ("<thinking>", "</thinking>"),
        ("[thinking]", "[/thinking]"),
        ("◁think▷", "◁/think▷"),
    ];
    let mut out = text.to_string();
    loop {
        let mut stripped_any = false;
        for (open, close) in PAIRS {
            if let Some(start) = out.find(open) {
                if let Some(rel_end) = out[start + open.len()..].find(close) {
                    let end = start + open.len() + rel_end + close.len();
                    out.replace_range(start..end, "");
                    stripped_any = true;
                }
            }
        }
        if !stripped_any {
            break;
        }
    }
    out
}

fn strip_xml_declaration(text: &str) -> String {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].to_string();
        }
    }
    text.to_string()
}

/// Extract the body of a markdown code fence (```xml, ```json, ```, or bare)
/// if the whole text is wrapped in one (§4.A preprocessing step iii).
fn unwrap_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let after_open = &trimmed[3..];
    let first_newline = match after_open.find('\n') {
        Some(i) => i,
        None => return text.to_string(),
    };
    let lang = after_open[..first_newline].trim();
    if !lang.is_empty() && lang != "xml" && lang != "json" {
        return text.to_string();
    }
    let body_start = first_newline + 1;
    let rest = &after_open[body_start..];
    match rest.rfind("```") {
        Some(close) => rest[..close].to_string(),
        None => rest.to_string(),
    }
}

/// Unwrap an outer XML comment that exactly wraps the whole text (§4.A
/// preprocessing step iv).
fn unwrap_outer_comment(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix("<!--").and_then(|s| s.strip_suffix("-->")) {
        let inner = inner.trim();
        if inner.starts_with('<') {
            return inner.to_string();
        }
    }
    text.to_string()
}

/// Strip leading non-XML characters up to the first `<` (§4.A step v).
fn strip_leading_noise(text: &str) -> String {
    match text.find('<') {
        Some(0) => text.to_string(),
        Some(idx) => text[idx..].to_string(),
        None => text.to_string(),
    }
}

fn preprocess(text: &str) -> String {
    let t = strip_reasoning_regions(text);
    let t = strip_xml_declaration(&t);
    let t = unwrap_code_fence(&t);
    let t = unwrap_outer_comment(&t);
    strip_leading_noise(&t)
}

// ---------------------------------------------------------------------------
// Balancing scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct TagSpan {
    name: String,
    /// Byte range of the element's inner text (between `>` of the open tag
    /// and `<` of the matching close tag). `None` for self-closing tags.
    inner: Option<(usize, usize)>,
    /// Byte offset of the element's own start tag.
    start: usize,
    /// Nesting depth at which this element was opened (0 = root).
    depth: usize,
}

/// Walk `text` tracking open/close tag depth per local name, skipping
/// comments, CDATA, and processing instructions without interpreting their
/// content (§4.A "Balancing").
fn scan_elements(text: &str) -> Vec<TagSpan> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = 0usize;
    // (name, start_byte, depth, index into `spans`)
    let mut open_stack: Vec<(String, usize, usize, usize)> = Vec::new();
    let mut spans: Vec<TagSpan> = Vec::new();

    while i < len {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        if text[i..].starts_with("<!--") {
            match text[i..].find("-->") {
                Some(rel) => i += rel + 3,
                None => break,
            }
            continue;
        }
        if text[i..].starts_with("<![CDATA[") {
            match text[i..].find("]]>") {
                Some(rel) => i += rel + 3,
                None => break,
            }
            continue;
        }
        if text[i..].starts_with("<?") {
            match text[i..].find("?>") {
                Some(rel) => i += rel + 2,
                None => break,
            }
            continue;
        }
        let tag_end = match text[i..].find('>') {
            Some(rel) => i + rel,
            None => break,
        };
        let tag_body = &text[i + 1..tag_end];

        if let Some(name) = tag_body.strip_prefix('/') {
            let name = name.trim().to_lowercase();
            if let Some(pos) = open_stack.iter().rposition(|(n, _, _, _)| *n == name) {
                let (_, start, _depth, span_idx) = open_stack.remove(pos);
                spans[span_idx].inner = Some((start, i));
            }
            i = tag_end + 1;
            continue;
        }

        if tag_body.trim_end().ends_with('/') {
            let name_end = tag_body.find(|c: char| c.is_whitespace() || c == '/').unwrap_or(tag_body.len());
            let name = tag_body[..name_end].trim().to_lowercase();
            if !name.is_empty() {
                spans.push(TagSpan {
                    name,
                    inner: None,
                    start: i,
                    depth: open_stack.len(),
                });
            }
            i = tag_end + 1;
            continue;
        }

        let name_end = tag_body.find(|c: char| c.is_whitespace()).unwrap_or(tag_body.len());
        let name = tag_body[..name_end].trim().to_lowercase();
        if !name.is_empty() {
            let depth = open_stack.len();
            spans.push(TagSpan {
                name: name.clone(),
                inner: None,
                start: i,
                depth,
            });
            open_stack.push((name, i, depth, spans.len() - 1));
        }
        i = tag_end + 1;
    }

    // Synthesize a close for any still-open tag at end-of-text so malformed
    // (truncated) XML degrades gracefully (§4.A "Failure semantics").
    let text_len = text.len();
    for (_, start, _, span_idx) in open_stack {
        spans[span_idx].inner = Some((start, text_len));
    }

    spans
}

fn tag_inner_text<'a>(text: &'a str, span: &TagSpan) -> &'a str {
    match span.inner {
        Some((open_end, close_start)) => {
            // `open_end` is the byte offset of the element's own `<`; advance
            // past the open tag's `>` to reach the inner text start.
            let after_open = text[open_end..].find('>').map(|p| open_end + p + 1).unwrap_or(open_end);
            if after_open <= close_start {
                &text[after_open..close_start]
            } else {
                ""
            }
        }
        None => "",
    }
}

/// Find the element to treat as the tool invocation root: the document root
/// if it matches a known tool, else the earliest occurrence of any known
/// tool name (§4.A "Balancing", preference order 1 then 2).
fn find_tool_span<'a>(spans: &'a [TagSpan], known: &HashSet<String>) -> Option<&'a TagSpan> {
    let known_lower: HashSet<String> = known.iter().map(|s| s.to_lowercase()).collect();
    let root = spans.iter().filter(|s| s.depth == 0).min_by_key(|s| s.start);
    if let Some(r) = root {
        if known_lower.contains(&r.name) {
            return Some(r);
        }
    }
    spans.iter().filter(|s| known_lower.contains(&s.name)).min_by_key(|s| s.start)
}

// ---------------------------------------------------------------------------
// Argument building
// ---------------------------------------------------------------------------

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{00A0}")
}

fn decode_cdata_and_entities(s: &str) -> String {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix("<![CDATA[").and_then(|r| r.strip_suffix("]]>")) {
        return inner.to_string();
    }
    decode_entities(s)
}

fn coerce_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            if let Some(num) = serde_json::Number::from_f64(f) {
                return Value::Number(num);
            }
        }
    }
    Value::String(decode_entities(trimmed))
}

/// Build the arguments object for the matched tool element's inner text
/// (§4.A "Argument building").
fn build_arguments(inner: &str, outer_tool: &str, known: &HashSet<String>) -> Value {
    let trimmed = inner.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return v;
        }
    }

    let known_lower: HashSet<String> = known.iter().map(|s| s.to_lowercase()).collect();
    let children = scan_elements(inner);
    let top_children: Vec<&TagSpan> = children.iter().filter(|c| c.depth == 0).collect();

    let mut map = serde_json::Map::new();
    let mut repeated: std::collections::HashMap<String, Vec<Value>> = std::collections::HashMap::new();

    for child in &top_children {
        let child_inner = tag_inner_text(inner, child);
        let key_lower = child.name.clone();
        let value: Value = if RAW_TEXT_CHILDREN.contains(&key_lower.as_str()) {
            Value::String(decode_cdata_and_entities(child_inner))
        } else if known_lower.contains(&key_lower)
            || (outer_tool.eq_ignore_ascii_case("think") && matches!(key_lower.as_str(), "points" | "thoughts"))
        {
            Value::String(child_inner.to_string())
        } else if child_inner.contains('<') && child_inner.contains('>') {
            let nested = build_arguments(child_inner, &child.name, known);
            if let Value::Object(obj) = &nested {
                if obj.len() == 1 {
                    if let Some(Value::Array(arr)) = obj.get("item") {
                        Value::Array(arr.clone())
                    } else {
                        nested
                    }
                } else {
                    nested
                }
            } else {
                nested
            }
        } else {
            coerce_scalar(child_inner)
        };

        repeated.entry(child.name.clone()).or_default().push(value);
    }

    for (k, mut vs) in repeated {
        if vs.len() == 1 {
            map.insert(k, vs.pop().unwrap());
        } else {
            map.insert(k, Value::Array(vs));
        }
    }

    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Public: complete / wrapper extraction
// ---------------------------------------------------------------------------

/// Scan `text` for a single balanced element whose local name matches a
/// known tool, returning the first match in document order (§4.A).
pub fn extract_complete(text: &str, known_tool_names: &HashSet<String>) -> Option<RawToolCall> {
    if known_tool_names.is_empty() {
        return None;
    }
    let cleaned = preprocess(text);
    let spans = scan_elements(&cleaned);
    let span = find_tool_span(&spans, known_tool_names)?;
    let inner = tag_inner_text(&cleaned, span);
    let original_name = known_tool_names
        .iter()
        .find(|n| n.to_lowercase() == span.name)
        .cloned()
        .unwrap_or_else(|| span.name.clone());
    let arguments = build_arguments(inner, &original_name, known_tool_names);
    Some(RawToolCall { name: original_name, arguments })
}

/// Locate the innermost `<toolbridge:calls>`/`<toolbridge_calls>` sentinel
/// pair and return its contents, if present (§4.A).
fn wrapper_contents(text: &str) -> Option<&str> {
    for (open, close) in [("<toolbridge:calls>", "</toolbridge:calls>"), ("<toolbridge_calls>", "</toolbridge_calls>")] {
        if let Some(start) = text.rfind(open) {
            if let Some(rel_end) = text[start..].find(close) {
                let inner_start = start + open.len();
                let inner_end = start + rel_end;
                if inner_end >= inner_start {
                    return Some(&text[inner_start..inner_end]);
                }
            }
        }
    }
    None
}

pub fn extract_from_wrapper(text: &str, known_tool_names: &HashSet<String>) -> Option<RawToolCall> {
    let inner = wrapper_contents(text)?;
    extract_complete(inner, known_tool_names)
}

pub fn extract_all_from_wrapper(text: &str, known_tool_names: &HashSet<String>) -> Vec<RawToolCall> {
    let inner = match wrapper_contents(text) {
        Some(i) => i.to_string(),
        None => return Vec::new(),
    };
    let spans = scan_elements(&inner);
    let known_lower: HashSet<String> = known_tool_names.iter().map(|s| s.to_lowercase()).collect();
    let mut calls = Vec::new();
    let mut roots: Vec<&TagSpan> = spans.iter().filter(|s| s.depth == 0 && known_lower.contains(&s.name)).collect();
    roots.sort_by_key(|s| s.start);
    for span in roots {
        let span_inner = tag_inner_text(&inner, span);
        let original_name = known_tool_names
            .iter()
            .find(|n| n.to_lowercase() == span.name)
            .cloned()
            .unwrap_or_else(|| span.name.clone());
        let arguments = build_arguments(span_inner, &original_name, known_tool_names);
        calls.push(RawToolCall { name: original_name, arguments });
    }
    calls
}

/// Byte offset in the original (un-preprocessed) `buffer` where the matched
/// tool element begins, used by the stream processor to split off any
/// preceding plain-text content that must be emitted before the synthetic
/// tool-call sequence (§4.F strategy 1/2 "Any buffered non-tool text
/// preceding the tool call is emitted first").
pub fn locate_tool_start(buffer: &str, known_tool_names: &HashSet<String>) -> Option<usize> {
    let lead = buffer.find('<')?;
    let tail = &buffer[lead..];
    let spans = scan_elements(tail);
    let span = find_tool_span(&spans, known_tool_names)?;
    Some(lead + span.start)
}

/// `responseToIR`'s composite recovery path: prefer the wrapper's contents
/// when present, otherwise fall back to a bare `extractComplete`, and as a
/// last resort the legacy dialects and JSON fallback (§4.D, §11).
pub fn recover(text: &str, known_tool_names: &HashSet<String>) -> Vec<RawToolCall> {
    if known_tool_names.is_empty() {
        return Vec::new();
    }
    let wrapped = extract_all_from_wrapper(text, known_tool_names);
    if !wrapped.is_empty() {
        return wrapped;
    }
    if let Some(call) = extract_complete(text, known_tool_names) {
        return vec![call];
    }
    if let Some(call) = json_fallback(text, known_tool_names) {
        return vec![call];
    }
    if let Some(call) = extract_legacy(text, known_tool_names) {
        return vec![call];
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// JSON fallback
// ---------------------------------------------------------------------------

/// Lenient cleanup: single→double quotes, bare identifier keys quoted,
/// trailing commas removed (§4.A "JSON fallback").
fn lenient_json_cleanup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_string => {
                out.push('"');
                in_string = true;
            }
            '\'' if in_string => {
                out.push('"');
                in_string = false;
            }
            '"' => {
                in_string = !in_string;
                out.push('"');
            }
            ',' if !in_string => {
                let mut lookahead = chars.clone();
                let mut only_ws = true;
                while let Some(&n) = lookahead.peek() {
                    if n == '}' || n == ']' {
                        break;
                    }
                    if !n.is_whitespace() {
                        only_ws = false;
                        break;
                    }
                    lookahead.next();
                }
                if !only_ws {
                    out.push(',');
                }
            }
            _ => out.push(c),
        }
    }
    quote_bare_keys(&out)
}

fn quote_bare_keys(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '"' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if !in_string && (c.is_alphabetic() || c == '_') {
            let start = i;
            let mut j = i;
            while j < bytes.len() && (bytes[j] as char == '_' || (bytes[j] as char).is_alphanumeric()) {
                j += 1;
            }
            let mut k = j;
            while k < bytes.len() && (bytes[k] as char).is_whitespace() {
                k += 1;
            }
            if k < bytes.len() && bytes[k] as char == ':' {
                out.push('"');
                out.push_str(&s[start..j]);
                out.push('"');
                i = j;
                continue;
            }
            out.push_str(&s[start..j]);
            i = j;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Walk forward from a known tool name to extract a balanced JSON object,
/// tracking brace depth and string escapes (§4.A "JSON fallback").
fn json_fallback(text: &str, known_tool_names: &HashSet<String>) -> Option<RawToolCall> {
    for name in known_tool_names {
        let mut search_from = 0;
        while let Some(rel) = text[search_from..].find(name.as_str()) {
            let name_pos = search_from + rel;
            let after = &text[name_pos + name.len()..];
            let after_trim = after.trim_start_matches(['(', ' ', '\t', '\n']);
            if after_trim.starts_with('{') {
                let obj_start = after.len() - after_trim.len() + name_pos + name.len();
                if let Some(obj_text) = extract_balanced_braces(&text[obj_start..]) {
                    let cleaned = lenient_json_cleanup(&obj_text);
                    if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
                        return Some(RawToolCall { name: name.clone(), arguments: v });
                    }
                }
            }
            search_from = name_pos + name.len();
        }
    }
    None
}

fn extract_balanced_braces(text: &str) -> Option<String> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut end = None;
    for (idx, c) in text.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = Some(idx + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    end.map(|e| text[..e].to_string())
}

// ---------------------------------------------------------------------------
// Legacy dialects (§11 supplement)
// ---------------------------------------------------------------------------

/// Recognizes the historical `<tool_call name="...">`/`<arguments>` pair and
/// the GLM-4.6-style `<tool_call>name<arg_key>/<arg_value></tool_call>`
/// shape, as a final fallback after the normative paths fail (§11).
pub fn extract_legacy(text: &str, known_tool_names: &HashSet<String>) -> Option<RawToolCall> {
    let start = text.find("<tool_call")?;
    let rest = &text[start..];
    let tag_end = rest.find('>')?;
    let open_tag = &rest[..tag_end];

    if let Some(name_start) = open_tag.find("name=\"") {
        let after = &open_tag[name_start + 6..];
        let name_end = after.find('"')?;
        let name = after[..name_end].to_string();
        let body_start = start + tag_end + 1;
        let body_close = text[body_start..].find("</tool_call>")?;
        let body = &text[body_start..body_start + body_close];
        let args_start = body.find("<arguments>")? + "<arguments>".len();
        let args_end = body.find("</arguments>")?;
        let args_text = body[args_start..args_end].trim();
        let args = serde_json::from_str(args_text)
            .unwrap_or_else(|_| serde_json::json!({ "raw": args_text }));
        return Some(RawToolCall { name, arguments: args });
    }

    // GLM-4.6: first text node is the function name, followed by
    // <arg_key>/<arg_value> pairs.
    let body_start = start + tag_end + 1;
    let body_close = text[body_start..].find("</tool_call>")?;
    let body = &text[body_start..body_start + body_close];
    let first_tag = body.find('<').unwrap_or(body.len());
    let name = body[..first_tag].trim().to_string();
    if name.is_empty() {
        return None;
    }
    let _ = known_tool_names;

    let mut map = serde_json::Map::new();
    let mut rest = &body[first_tag..];
    loop {
        let key_start = match rest.find("<arg_key>") {
            Some(p) => p + "<arg_key>".len(),
            None => break,
        };
        let key_end = match rest[key_start..].find("</arg_key>") {
            Some(p) => key_start + p,
            None => break,
        };
        let key = rest[key_start..key_end].trim().to_string();
        let after_key = &rest[key_end..];
        let val_start = match after_key.find("<arg_value>") {
            Some(p) => p + "<arg_value>".len(),
            None => break,
        };
        let val_end = match after_key[val_start..].find("</arg_value>") {
            Some(p) => val_start + p,
            None => break,
        };
        let val = after_key[val_start..val_end].trim();
        map.insert(key, coerce_scalar(val));
        rest = &after_key[val_end..];
    }

    Some(RawToolCall { name, arguments: Value::Object(map) })
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub is_potential: bool,
    pub is_completed_xml: bool,
    pub root_tag_name: Option<String>,
    pub might_be_tool_call: bool,
    pub confidence: f32,
}

/// Cheap classifier (§4.A "Detection").
pub fn detect(text: &str, known_tool_names: &HashSet<String>) -> Detection {
    if text.is_empty() {
        return Detection::default();
    }
    let sliced = unwrap_code_fence(text);
    let sliced = strip_leading_noise(&sliced);
    if !sliced.contains('<') {
        return Detection::default();
    }

    let first_lt = match sliced.find('<') {
        Some(i) => i,
        None => return Detection::default(),
    };
    let after = &sliced[first_lt + 1..];
    let name_end = after.find(|c: char| c.is_whitespace() || c == '>' || c == '/').unwrap_or(after.len());
    let raw_tag_name = after[..name_end].to_string();
    let tag_name_lower = raw_tag_name.to_lowercase();

    if HTML_TAGS.contains(&tag_name_lower.as_str()) {
        return Detection {
            is_potential: false,
            is_completed_xml: false,
            root_tag_name: Some(raw_tag_name),
            might_be_tool_call: false,
            confidence: 0.0,
        };
    }

    let is_known = known_tool_names.iter().any(|n| *n == raw_tag_name);
    if !is_known {
        return Detection {
            is_potential: false,
            is_completed_xml: false,
            root_tag_name: Some(raw_tag_name),
            might_be_tool_call: false,
            confidence: 0.0,
        };
    }

    let close_tag = format!("</{raw_tag_name}>");
    let first_tag_is_self_closed = sliced[first_lt..]
        .find('>')
        .map(|rel| sliced[first_lt..first_lt + rel].ends_with('/'))
        .unwrap_or(false);
    let is_completed_xml = sliced.contains(&close_tag) || first_tag_is_self_closed;

    let mut confidence = 0.5 + 0.3;
    if is_completed_xml {
        confidence += 0.2;
    }

    Detection {
        is_potential: true,
        is_completed_xml,
        root_tag_name: Some(raw_tag_name),
        might_be_tool_call: true,
        confidence,
    }
}

// ---------------------------------------------------------------------------
// Streaming / partial extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PartialState {
    pub root_tag: Option<String>,
    pub is_potential: bool,
    pub might_be_tool_call: bool,
    pub buffer: String,
    pub identified_tool_name: Option<String>,
}

impl PartialState {
    fn empty() -> Self {
        PartialState {
            root_tag: None,
            is_potential: false,
            might_be_tool_call: false,
            buffer: String::new(),
            identified_tool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub complete: bool,
    pub tool_call: Option<RawToolCall>,
    pub content: Option<String>,
    pub partial_state: Option<PartialState>,
}

fn starts_with_html_tag(text: &str) -> bool {
    let trimmed = strip_leading_noise(text);
    if let Some(stripped) = trimmed.strip_prefix('<') {
        let name_end = stripped.find(|c: char| c.is_whitespace() || c == '>' || c == '/').unwrap_or(stripped.len());
        return HTML_TAGS.contains(&stripped[..name_end].to_lowercase().as_str());
    }
    false
}

/// Streaming variant of the extractor: consumes an accumulating `buffer` and
/// previous state, returning a decision each call (§4.A "Streaming / partial
/// mode").
pub fn extract_partial(
    buffer: &str,
    known_tool_names: &HashSet<String>,
    previous: Option<PartialState>,
    max_buffer_size: usize,
) -> PartialResult {
    if starts_with_html_tag(buffer) {
        if let Some(call) = extract_complete(buffer, known_tool_names) {
            return PartialResult { complete: true, tool_call: Some(call), content: Some(buffer.to_string()), partial_state: None };
        }
        return PartialResult { complete: false, tool_call: None, content: None, partial_state: Some(PartialState::empty()) };
    }

    let working: String = if buffer.len() > max_buffer_size {
        let trailing_start = buffer.len() - max_buffer_size;
        let window = &buffer[trailing_start..];
        let det = detect(window, known_tool_names);
        if !det.is_potential {
            return PartialResult { complete: false, tool_call: None, content: None, partial_state: Some(PartialState::empty()) };
        }
        window.to_string()
    } else {
        buffer.to_string()
    };

    let detection = detect(&working, known_tool_names);

    let was_potential = previous.as_ref().map(|p| p.is_potential).unwrap_or(false);
    if was_potential && !detection.is_potential {
        return PartialResult { complete: false, tool_call: None, content: None, partial_state: Some(PartialState::empty()) };
    }

    if detection.might_be_tool_call && detection.is_completed_xml {
        if let Some(call) = extract_complete(&working, known_tool_names) {
            return PartialResult { complete: true, tool_call: Some(call), content: Some(working), partial_state: None };
        }
    }

    if detection.might_be_tool_call {
        return PartialResult {
            complete: false,
            tool_call: None,
            content: None,
            partial_state: Some(PartialState {
                root_tag: detection.root_tag_name.clone(),
                is_potential: detection.is_potential,
                might_be_tool_call: detection.might_be_tool_call,
                buffer: working,
                identified_tool_name: detection.root_tag_name,
            }),
        };
    }

    PartialResult { complete: false, tool_call: None, content: None, partial_state: Some(PartialState::empty()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extract_complete_simple_object_args() {
        let known = known(&["get_weather"]);
        let call = extract_complete("<get_weather><city>nyc</city><days>3</days></get_weather>", &known).unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments["city"], "nyc");
        assert_eq!(call.arguments["days"], 3);
    }

    #[test]
    fn extract_complete_booleans_and_numbers_coerced() {
        let known = known(&["configure"]);
        let call = extract_complete("<configure><enabled>true</enabled><ratio>0.5</ratio></configure>", &known).unwrap();
        assert_eq!(call.arguments["enabled"], true);
        assert_eq!(call.arguments["ratio"], 0.5);
    }

    #[test]
    fn extract_complete_raw_text_child_preserves_markup() {
        let known = known(&["write_file"]);
        let call = extract_complete("<write_file><path>a.txt</path><content><b>bold</b></content></write_file>", &known).unwrap();
        assert_eq!(call.arguments["content"], "<b>bold</b>");
    }

    #[test]
    fn extract_complete_json_body() {
        let known = known(&["search"]);
        let call = extract_complete("<search>{\"query\": \"rust\"}</search>", &known).unwrap();
        assert_eq!(call.arguments["query"], "rust");
    }

    #[test]
    fn extract_complete_ignores_unknown_root() {
        let known = known(&["search"]);
        assert!(extract_complete("<div>not a tool</div>", &known).is_none());
    }

    #[test]
    fn strips_think_region_before_scanning() {
        let known = known(&["search"]);
        let text = "<think><search><q>plan</q></search></think> plain text";
        assert!(extract_complete(text, &known).is_none());
    }

    #[test]
    fn wrapper_restricts_scan_to_sentinel_pair() {
        let known = known(&["search"]);
        let text = "intro <toolbridge:calls><search><q>rust</q></search></toolbridge:calls> outro";
        let call = extract_from_wrapper(text, &known).unwrap();
        assert_eq!(call.name, "search");
    }

    #[test]
    fn wrapper_underscore_form_also_recognized() {
        let known = known(&["search"]);
        let text = "<toolbridge_calls><search><q>x</q></search></toolbridge_calls>";
        assert!(extract_from_wrapper(text, &known).is_some());
    }

    #[test]
    fn extract_all_from_wrapper_handles_multiple_calls() {
        let known = known(&["a", "b"]);
        let text = "<toolbridge:calls><a><x>1</x></a><b><y>2</y></b></toolbridge:calls>";
        let calls = extract_all_from_wrapper(text, &known);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn detect_rejects_html_root() {
        let known = known(&["search"]);
        let d = detect("<div>hi</div>", &known);
        assert!(!d.is_potential);
    }

    #[test]
    fn detect_recognizes_known_tool_and_completion() {
        let known = known(&["search"]);
        let d = detect("<search><q>x</q></search>", &known);
        assert!(d.is_potential);
        assert!(d.is_completed_xml);
        assert!(d.confidence > 0.9);
    }

    #[test]
    fn partial_buffers_incomplete_tool_call() {
        let known = known(&["search"]);
        let r = extract_partial("<search><q>ru", &known, None, DEFAULT_MAX_BUFFER_SIZE);
        assert!(!r.complete);
        assert!(r.partial_state.is_some());
        assert!(r.partial_state.unwrap().might_be_tool_call);
    }

    #[test]
    fn partial_completes_once_closed() {
        let known = known(&["search"]);
        let first = extract_partial("<search><q>ru", &known, None, DEFAULT_MAX_BUFFER_SIZE);
        let state = first.partial_state;
        let second = extract_partial("<search><q>rust</q></search>", &known, state, DEFAULT_MAX_BUFFER_SIZE);
        assert!(second.complete);
        assert_eq!(second.tool_call.unwrap().arguments["q"], "rust");
    }

    #[test]
    fn partial_resets_on_html_preface() {
        let known = known(&["search"]);
        let r = extract_partial("<div>hello world</div>", &known, None, DEFAULT_MAX_BUFFER_SIZE);
        assert!(!r.complete);
        assert!(!r.partial_state.unwrap().might_be_tool_call);
    }

    #[test]
    fn partial_finds_tool_call_after_html_preface() {
        let known = known(&["search"]);
        let r = extract_partial("<div>hi</div><search><q>x</q></search>", &known, None, DEFAULT_MAX_BUFFER_SIZE);
        assert!(r.complete);
        assert_eq!(r.tool_call.unwrap().name, "search");
    }

    #[test]
    fn json_fallback_recovers_from_lenient_json() {
        let known = known(&["search"]);
        let text = "search({query: 'rust', limit: 5,})";
        let call = json_fallback(text, &known).unwrap();
        assert_eq!(call.arguments["query"], "rust");
        assert_eq!(call.arguments["limit"], 5);
    }

    #[test]
    fn legacy_name_attribute_dialect() {
        let known = known(&["search"]);
        let text = "<tool_call name=\"search\"><arguments>{\"q\":\"x\"}</arguments></tool_call>";
        let call = extract_legacy(text, &known).unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["q"], "x");
    }

    #[test]
    fn legacy_glm_dialect() {
        let known = known(&["search"]);
        let text = "<tool_call>search<arg_key>q</arg_key><arg_value>rust</arg_value></tool_call>";
        let call = extract_legacy(text, &known).unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["q"], "rust");
    }

    #[test]
    fn malformed_unclosed_tag_recovers_at_eof() {
        let known = known(&["search"]);
        let call = extract_complete("<search><q>rust</q>", &known);
        assert!(call.is_some());
    }

    #[test]
    fn recover_prefers_wrapper_over_bare() {
        let known = known(&["search"]);
        let text = "noise <toolbridge:calls><search><q>wrapped</q></search></toolbridge:calls>";
        let calls = recover(text, &known);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["q"], "wrapped");
    }

    #[test]
    fn locate_tool_start_skips_preceding_html() {
        let known = known(&["search"]);
        let buffer = "<div>hi</div> then <search><query>q</query></search>";
        let idx = locate_tool_start(buffer, &known).unwrap();
        assert_eq!(&buffer[..idx], "<div>hi</div> then ");
    }

    #[test]
    fn nested_item_array_flattening() {
        let known = known(&["batch"]);
        let text = "<batch><items><item>1</item><item>2</item></items></batch>";
        let call = extract_complete(text, &known).unwrap();
        assert_eq!(call.arguments["items"], serde_json::json!([1, 2]));
    }
}
