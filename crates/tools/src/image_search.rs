//! Image search tool: Markdown image links for a query.

use agentwire_core::error::ToolError;
use agentwire_core::tool::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::web_search::requested_limit;

pub struct ImageSearchTool;

#[async_trait]
impl Tool for ImageSearchTool {
    fn name(&self) -> &str {
        "searchImages"
    }

    fn description(&self) -> &str {
        "Find images for a subject. Returns Markdown image links."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What the images should show" },
                "limit": { "type": "integer", "description": "Maximum number of images (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments["query"].as_str().map(str::trim).unwrap_or_default();
        if query.is_empty() {
            return Ok(json!({ "success": false, "error": "Image query must not be empty" }));
        }

        let seed: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let results: Vec<String> = (1..=requested_limit(&arguments))
            .map(|n| format!("![Image {n}: {query}](https://picsum.photos/seed/{seed}-{n}/640/400)"))
            .collect();

        Ok(json!({
            "success": true,
            "query": query,
            "count": results.len(),
            "results": results,
            "source": "picsum.photos",
        }))
    }
}
