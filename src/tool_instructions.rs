//! Tool-instruction builder (spec §4.C) — renders a tool schema list into a
//! system-prompt block that teaches a model lacking native tool calling to
//! emit invocations inside the XML sentinel wrapper.

use serde_json::Value;

use crate::ir::ToolSchema;

/// Literal tokens downstream parsers key off (§4.C) — never vary these.
pub const WRAPPER_OPEN: &str = "<toolbridge:calls>";
pub const WRAPPER_CLOSE: &str = "</toolbridge:calls>";
pub const HEADING: &str = "# TOOL USAGE INSTRUCTIONS";
pub const DISABLED_DIRECTIVE: &str = "Tool usage is disabled for this request.";

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn parameter_list(parameters: &Value) -> Vec<(String, String, bool, String)> {
    let props = parameters.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = parameters
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = Vec::new();
    if let Some(props) = props {
        for (name, schema) in props {
            let ty = schema.get("type").and_then(Value::as_str).unwrap_or("string").to_string();
            let desc = schema.get("description").and_then(Value::as_str).unwrap_or("").to_string();
            let is_required = required.contains(&name.as_str());
            out.push((name.clone(), ty, is_required, desc));
        }
    }
    out
}

fn render_tool_definition(tool: &ToolSchema) -> String {
    let mut s = String::new();
    s.push_str("  <tool_definition>\n");
    s.push_str(&format!("    <name>{}</name>\n", xml_escape(&tool.name)));
    if let Some(desc) = &tool.description {
        s.push_str(&format!("    <description>{}</description>\n", xml_escape(desc)));
    }
    s.push_str("    <parameters>\n");
    for (name, ty, required, desc) in parameter_list(&tool.parameters) {
        s.push_str(&format!(
            "      <parameter type=\"{}\" required=\"{}\">{}<description>{}</description></parameter>\n",
            xml_escape(&ty),
            required,
            xml_escape(&name),
            xml_escape(&desc)
        ));
    }
    s.push_str("    </parameters>\n");
    s.push_str("  </tool_definition>\n");
    s
}

/// Build the system-prompt block from a tool schema list (§4.C).
pub fn build(tools: &[ToolSchema]) -> String {
    let mut s = String::new();
    s.push_str(HEADING);
    s.push('\n');
    s.push_str("You have access to the following tools. To call one, respond with exactly one ");
    s.push_str(WRAPPER_OPEN);
    s.push_str(" block whose root elements are tool calls.\n\n");
    s.push_str("<tool_definitions>\n");
    for tool in tools {
        s.push_str(&render_tool_definition(tool));
    }
    s.push_str("</tool_definitions>\n\n");

    if let Some(example) = tools.first() {
        s.push_str("Example invocation:\n");
        s.push_str(WRAPPER_OPEN);
        s.push('\n');
        s.push_str(&format!("  <{}>\n", example.name));
        for (name, _, _, _) in parameter_list(&example.parameters) {
            s.push_str(&format!("    <{name}>value</{name}>\n"));
        }
        s.push_str(&format!("  </{}>\n", example.name));
        s.push_str(WRAPPER_CLOSE);
        s.push('\n');
    }

    s.push_str("\nRules: call tools only via the XML wrapper above; never use a markdown code fence around the call; ");
    s.push_str("the root element of each call is the tool's name; nested elements are its parameters.\n");
    s
}

/// Directive appended when `toolChoice=="none"` (§4.E rule 1).
pub fn disabled_directive() -> &'static str {
    DISABLED_DIRECTIVE
}

/// Directive appended when `toolChoice=="required"` (§4.E rule 1).
pub fn required_directive() -> String {
    "You MUST call one of the tools above via the XML wrapper in this response.".to_string()
}

/// Directive appended when `toolChoice=={function:name}` (§4.E rule 1).
pub fn mandatory_tool_directive(name: &str) -> String {
    format!("You MUST call the `{name}` tool via the XML wrapper in this response.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tool() -> ToolSchema {
        ToolSchema {
            name: "get_weather".to_string(),
            description: Some("Look up the weather".to_string()),
            parameters: json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "City name"},
                    "days": {"type": "integer", "description": "Forecast days"},
                },
                "required": ["city"],
            }),
        }
    }

    #[test]
    fn contains_required_sentinels() {
        let block = build(&[sample_tool()]);
        assert!(block.contains(HEADING));
        assert!(block.contains(WRAPPER_OPEN));
        assert!(block.contains(WRAPPER_CLOSE));
    }

    #[test]
    fn escapes_descriptions() {
        let mut tool = sample_tool();
        tool.description = Some("<script>alert(1)</script>".to_string());
        let block = build(&[tool]);
        assert!(!block.contains("<script>alert"));
        assert!(block.contains("&lt;script&gt;"));
    }

    #[test]
    fn marks_required_parameters() {
        let block = build(&[sample_tool()]);
        assert!(block.contains("required=\"true\""));
        assert!(block.contains("required=\"false\""));
    }

    #[test]
    fn disabled_directive_matches_literal_substring() {
        assert_eq!(disabled_directive(), "Tool usage is disabled for this request.");
    }
}
