//! Built-in tools for agentwire.
//!
//! Every tool reports input it can diagnose itself as
//! `{"success": false, "error": ...}` instead of an opaque fault, so the
//! agent's correction rules can classify the message.

pub mod calculator;
pub mod clock;
pub mod image_search;
pub mod text_process;
pub mod web_search;

use agentwire_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use image_search::ImageSearchTool;
pub use text_process::TextProcessTool;
pub use web_search::WebSearchTool;

/// Create a registry with all built-in tools, in the order they are
/// advertised to the model.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    registry.register(Box::new(ClockTool));
    registry.register(Box::new(WebSearchTool));
    registry.register(Box::new(TextProcessTool));
    registry.register(Box::new(ImageSearchTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_declares_all_tools() {
        let registry = default_registry();
        assert_eq!(
            registry.names(),
            vec!["calculate", "getCurrentTime", "searchWeb", "textProcess", "searchImages"]
        );
    }

    #[tokio::test]
    async fn registry_turns_failure_payload_into_error() {
        let registry = default_registry();
        let err = registry
            .execute("calculate", json!({"expression": "12+"}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Syntax error"));
    }
}
