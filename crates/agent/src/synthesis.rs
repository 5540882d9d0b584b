//! Natural-language rendering of tool results.
//!
//! The final answer is built from tool results alone, without a second
//! upstream call. Degraded results are narrated, never dumped raw.

use agentwire_core::tool::ToolResult;
use serde_json::Value;

const MAX_DISPLAY: usize = 10;
const MIN_DISPLAY: usize = 5;
const LINKS_AFTER: usize = 3;

/// One paragraph per result, in execution order.
pub fn synthesize_answer(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(describe_result)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Short text for the `Observation` reasoning entry.
pub fn observation_summary(tool: &str, output: &Value) -> String {
    match (tool, output) {
        ("calculate", v) if v["success"] == true => {
            format!(
                "Calculation result: {} = {}",
                text_of(&v["expression"]),
                text_of(&v["result"])
            )
        }
        ("getCurrentTime", Value::String(s)) => match time_shape(s) {
            TimeShape::Date => format!("Current date: {s}"),
            TimeShape::Time => format!("Current time: {s}"),
            TimeShape::Full => format!("Current date and time: {s}"),
        },
        ("searchWeb" | "searchImages", v) if v["results"].is_array() => {
            format!("Found {} results", v["count"].as_u64().unwrap_or(0))
        }
        (_, v) => text_of(v),
    }
}

fn describe_result(result: &ToolResult) -> String {
    let content = &result.content;

    if !result.success && content.get("attempts").is_some() {
        let error = text_of(&content["error"]);
        let suggestion = content["suggestion"].as_str().unwrap_or_default();
        return format!(
            "The {} tool is temporarily unavailable ({error}). {suggestion}",
            result.name
        )
        .trim_end()
        .to_string();
    }

    match result.name.as_str() {
        "calculate" => {
            if content["success"] == true {
                format!("{} = {}", text_of(&content["expression"]), text_of(&content["result"]))
            } else {
                format!("Calculation failed: {}", text_of(&content["error"]))
            }
        }
        "getCurrentTime" => {
            let s = text_of(content);
            match time_shape(&s) {
                TimeShape::Date => format!("Today's date is {s}."),
                TimeShape::Time => format!("The current time is {s}."),
                TimeShape::Full => format!("The current date and time is {s}."),
            }
        }
        "searchWeb" if content["results"].is_array() => describe_search(content),
        "searchImages" if content["results"].is_array() => describe_images(content),
        "textProcess" => match content {
            Value::String(s) => format!("Text processing result: {s}"),
            Value::Object(_) if content.get("characters").is_some() => format!(
                "Text processing result: {} characters, {} words, {} lines",
                text_of(&content["characters"]),
                text_of(&content["words"]),
                text_of(&content["lines"])
            ),
            other => format!("Text processing result: {}", text_of(other)),
        },
        _ => text_of(content),
    }
}

enum TimeShape {
    Date,
    Time,
    Full,
}

fn time_shape(s: &str) -> TimeShape {
    let has_time = s.contains(':');
    let has_date = s.contains('/') || s.contains('-');
    match (has_date, has_time) {
        (true, false) => TimeShape::Date,
        (false, true) => TimeShape::Time,
        _ => TimeShape::Full,
    }
}

fn describe_search(content: &Value) -> String {
    let results: Vec<&str> = content["results"]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let count = content["count"].as_u64().map_or(results.len(), |c| c as usize);

    let mut display_count = count.min(MAX_DISPLAY);
    if count > MAX_DISPLAY {
        display_count = (count / 2).clamp(MIN_DISPLAY, MAX_DISPLAY);
    }

    let mut shown: Vec<&str> = Vec::new();
    let mut non_links = 0;
    for entry in &results {
        if shown.len() >= display_count {
            break;
        }
        if !is_link(entry) {
            shown.push(entry);
            non_links += 1;
        } else if non_links >= LINKS_AFTER {
            shown.push(entry);
        }
    }
    if shown.is_empty() {
        shown.extend(results.iter().take(MIN_DISPLAY));
    }

    let mut out = format!(
        "🔍 Search results for \"{}\" ({count} total)\n\n",
        text_of(&content["query"])
    );
    for (i, entry) in shown.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, strip_marker(entry)));
    }
    if count > shown.len() {
        out.push_str(&format!("\n... {} more results not shown", count - shown.len()));
    }
    if let Some(source) = content["source"].as_str() {
        out.push_str(&format!("\n\n📚 Source: {source}"));
    }
    if content["success"] == false {
        if let Some(error) = content["error"].as_str() {
            out.push_str(&format!("\n\n⚠️ Note: {error}"));
        }
        if let Some(suggestion) = content["suggestion"].as_str() {
            out.push_str(&format!("\n💡 {suggestion}"));
        }
    }
    out.trim_end().to_string()
}

fn describe_images(content: &Value) -> String {
    let images: Vec<&str> = content["results"]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    format!(
        "🖼️ Images for \"{}\"\n\n{}",
        text_of(&content["query"]),
        images.join("\n\n")
    )
}

fn is_link(entry: &str) -> bool {
    entry.contains("http://") || entry.contains("https://")
}

fn strip_marker(entry: &str) -> String {
    for marker in ["📖", "🔑", "📝", "📄", "💡"] {
        if let Some(rest) = entry.strip_prefix(marker) {
            return rest.trim_start().to_string();
        }
    }
    if let Some(rest) = entry.strip_prefix('✓') {
        return format!("• {}", rest.trim_start());
    }
    entry.to_string()
}

/// Strings unquoted, whole numbers without a fraction, everything else as JSON.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_number(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub(crate) fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
