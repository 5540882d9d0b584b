//! Web search tool returning deterministic offline results.
//!
//! The agent loop, synthesis and retry paths can run end-to-end without
//! network access. Results are plain strings; a few carry links so the
//! answer formatter's link/non-link selection has something to choose from.

use agentwire_core::error::ToolError;
use agentwire_core::tool::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 10;

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "searchWeb"
    }

    fn description(&self) -> &str {
        "Search the web for information, news or reference material."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search keywords"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5, at most 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments["query"].as_str().map(str::trim).unwrap_or_default();
        if query.is_empty() {
            return Ok(json!({ "success": false, "error": "Search query must not be empty" }));
        }

        let limit = requested_limit(&arguments);
        let results = mock_results(query, limit);

        Ok(json!({
            "success": true,
            "query": query,
            "count": results.len(),
            "results": results,
            "source": "offline index",
        }))
    }
}

pub(crate) fn requested_limit(arguments: &Value) -> usize {
    arguments["limit"]
        .as_u64()
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT)
}

fn mock_results(query: &str, limit: usize) -> Vec<String> {
    let encoded = query.replace(' ', "+");
    let templates = [
        format!("📖 {query}: overview and key facts"),
        format!("🔑 Key points most often cited about {query}"),
        format!("📝 Recent articles discussing {query}"),
        format!("https://en.wikipedia.org/w/index.php?search={encoded}"),
        format!("📄 Reference material and documentation on {query}"),
        format!("💡 Related topics people explore alongside {query}"),
        format!("https://www.bing.com/search?q={encoded}"),
        format!("✓ Frequently asked questions about {query}"),
        format!("📝 Community discussions on {query}"),
        format!("https://duckduckgo.com/?q={encoded}"),
    ];
    templates.into_iter().take(limit).collect()
}
