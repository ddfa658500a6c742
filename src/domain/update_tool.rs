//! The locally handled args-update tool
//!
//! Its input schema has one optional string property per placeholder found in
//! the command template. Calling it is the only way to change runtime values.

use std::collections::HashMap;

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent, Tool};
use serde_json::{json, Map, Value};

use crate::errors::RelayError;

#[derive(Debug, Clone)]
pub struct UpdateTool {
    name: String,
    placeholders: Vec<String>,
    definition: Value,
}

impl UpdateTool {
    pub fn new(name: impl Into<String>, placeholders: Vec<String>) -> Result<Self, RelayError> {
        let name = name.into();
        let properties = placeholders
            .iter()
            .map(|placeholder| {
                (
                    placeholder.clone(),
                    json!({
                        "type": "string",
                        "description": format!("Value substituted for {{{{{placeholder}}}}} in the server command"),
                    }),
                )
            })
            .collect::<Map<String, Value>>();

        // Round-trip through the SDK type so the advertised definition is a valid tool.
        let tool: Tool = serde_json::from_value(json!({
            "name": name,
            "description": "Update the arguments used to launch the underlying MCP server and restart it with the new values",
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": [],
            },
        }))?;
        let definition = serde_json::to_value(tool)?;

        Ok(Self {
            name,
            placeholders,
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    /// Whether `params` of a `tools/call` target this tool.
    pub fn is_called_by(&self, params: Option<&Value>) -> bool {
        params
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            == Some(self.name.as_str())
    }
}

/// Copies every string-valued argument into `values`; other values are ignored.
/// Returns the names that were set, sorted.
pub fn apply_arguments(
    arguments: Option<&Map<String, Value>>,
    values: &mut HashMap<String, String>,
) -> Vec<String> {
    let mut updated = arguments
        .into_iter()
        .flatten()
        .filter_map(|(name, value)| {
            value.as_str().map(|value| {
                values.insert(name.clone(), value.to_string());
                name.clone()
            })
        })
        .collect::<Vec<_>>();
    updated.sort();
    updated
}

pub fn acknowledgement(updated: &[String]) -> Result<Value, RelayError> {
    let text = if updated.is_empty() {
        "No arguments changed; restarted the MCP server".to_string()
    } else {
        format!("Updated {}; restarted the MCP server", updated.join(", "))
    };

    Ok(serde_json::to_value(CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: Some(Map::from_iter([
            ("updated".to_string(), json!(updated)),
            ("restarted".to_string(), json!(true)),
        ])),
    })?)
}
