//! Clock tool: reports the local date and/or time.

use agentwire_core::error::ToolError;
use agentwire_core::tool::Tool;
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde_json::{Value, json};

pub struct ClockTool;

/// Output shape requested through the `format` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Full,
    Date,
    Time,
}

impl TimeFormat {
    /// Unknown or missing formats fall back to `Full`.
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("date") => TimeFormat::Date,
            Some("time") => TimeFormat::Time,
            _ => TimeFormat::Full,
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            TimeFormat::Full => "%Y/%m/%d %H:%M:%S",
            TimeFormat::Date => "%Y/%m/%d",
            TimeFormat::Time => "%H:%M:%S",
        }
    }
}

pub fn format_time<Tz: TimeZone>(at: &DateTime<Tz>, format: TimeFormat) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(format.pattern()).to_string()
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "getCurrentTime"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Use it whenever the user asks about the date or time."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["full", "date", "time"],
                    "description": "full (date and time), date (date only) or time (time only)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let format = TimeFormat::parse(arguments["format"].as_str());
        Ok(Value::String(format_time(&Local::now(), format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 30).unwrap()
    }

    #[test]
    fn formats() {
        assert_eq!(format_time(&fixed(), TimeFormat::Full), "2025/03/07 09:05:30");
        assert_eq!(format_time(&fixed(), TimeFormat::Date), "2025/03/07");
        assert_eq!(format_time(&fixed(), TimeFormat::Time), "09:05:30");
    }

    #[test]
    fn unknown_format_is_full() {
        assert_eq!(TimeFormat::parse(Some("weekday")), TimeFormat::Full);
        assert_eq!(TimeFormat::parse(None), TimeFormat::Full);
    }

    #[tokio::test]
    async fn tool_returns_string() {
        let out = ClockTool.execute(json!({"format": "date"})).await.unwrap();
        let s = out.as_str().unwrap();
        assert_eq!(s.len(), 10);
        assert!(s.contains('/'));
        assert!(!s.contains(':'));
    }
}
