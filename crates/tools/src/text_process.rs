//! Text processing tool: case conversion, reversal and counting.

use agentwire_core::error::ToolError;
use agentwire_core::tool::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct TextProcessTool;

#[async_trait]
impl Tool for TextProcessTool {
    fn name(&self) -> &str {
        "textProcess"
    }

    fn description(&self) -> &str {
        "Transform or analyse text: uppercase, lowercase, reverse, or count characters, words and lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The text to process" },
                "operation": {
                    "type": "string",
                    "enum": ["uppercase", "lowercase", "reverse", "count"],
                    "description": "The operation to apply"
                }
            },
            "required": ["text", "operation"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let Some(text) = arguments["text"].as_str() else {
            return Ok(json!({ "success": false, "error": "Missing 'text' argument" }));
        };

        let output = match arguments["operation"].as_str().unwrap_or_default() {
            "uppercase" => json!(text.to_uppercase()),
            "lowercase" => json!(text.to_lowercase()),
            "reverse" => json!(text.chars().rev().collect::<String>()),
            "count" => json!({
                "characters": text.chars().count(),
                "words": text.split_whitespace().count(),
                "lines": text.split('\n').count(),
            }),
            other => {
                return Ok(json!({
                    "success": false,
                    "error": format!("Unsupported operation '{other}'")
                }));
            }
        };
        Ok(output)
    }
}
