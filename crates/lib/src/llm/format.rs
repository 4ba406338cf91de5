//! Tool definitions in the provider's `tools` shape.

use serde::Serialize;

use super::types::ToolDefinition;

/// `{ "type": "function", "function": { name, description, parameters } }`.
/// OpenAI-compatible servers and Ollama share this shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub typ: &'static str,
    pub function: WireToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Formatted tool list, or None for an empty input so the request omits `tools`
/// entirely. Schemas are passed through unchecked.
pub fn format_tools(tools: &[ToolDefinition]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| WireTool {
                typ: "function",
                function: WireToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: if t.parameters.is_null() {
                        serde_json::json!({"type": "object", "properties": {}})
                    } else {
                        t.parameters.clone()
                    },
                },
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_tool_list_is_omitted() {
        assert!(format_tools(&[]).is_none());
    }

    #[test]
    fn tools_keep_order_and_shape() {
        let tools = vec![
            ToolDefinition::new("a", "first", json!({"type": "object"})),
            ToolDefinition::new("b", "", serde_json::Value::Null),
        ];
        let out = serde_json::to_value(format_tools(&tools).unwrap()).unwrap();
        assert_eq!(out[0]["type"], "function");
        assert_eq!(out[0]["function"]["name"], "a");
        assert_eq!(out[0]["function"]["description"], "first");
        assert_eq!(out[1]["function"]["name"], "b");
        assert!(out[1]["function"].get("description").is_none());
        assert_eq!(out[1]["function"]["parameters"]["type"], "object");
    }
}
