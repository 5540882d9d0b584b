//! Pattern-based recovery of tool intent from the latest user message.
//!
//! Used when the model answered without structured tool calls. Category
//! order: arithmetic, time, web search, image search. An arithmetic match
//! ends detection; the other categories can all fire together.

use agentwire_core::message::{Conversation, Role};
use agentwire_core::tool::ToolCallRequest;
use regex_lite::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::synthesis::format_number;

const OP_WORDS: &str = r"加上|减去|乘以|除以|加|减|乘|除|plus|minus|times|multiplied by|divided by";

/// Compiled detection rules.
pub struct FallbackIntentDetector {
    calc_keywords: Option<Regex>,
    math_expression: Option<Regex>,
    operator_phrase: Option<Regex>,
    follow_up_zh: Option<Regex>,
    follow_up_en: Option<Regex>,
    prior_result: Option<Regex>,
    expression_runs: Option<Regex>,
    numbers: Option<Regex>,
    time_keywords: Option<Regex>,
    date_words: Option<Regex>,
    clock_words: Option<Regex>,
    hour_words: Option<Regex>,
    day_words: Option<Regex>,
    search_keywords: Option<Regex>,
    image_keywords: Option<Regex>,
    filler_words: Option<Regex>,
    whitespace: Option<Regex>,
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid detection pattern; rule disabled");
            None
        }
    }
}

fn is_match(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

fn operator_symbol(word: &str) -> Option<char> {
    match word.to_lowercase().as_str() {
        "加上" | "加" | "plus" => Some('+'),
        "减去" | "减" | "minus" => Some('-'),
        "乘以" | "乘" | "times" | "multiplied by" => Some('*'),
        "除以" | "除" | "divided by" => Some('/'),
        _ => None,
    }
}

fn is_expression(candidate: &str) -> bool {
    candidate.contains(['+', '-', '*', '/']) && candidate.chars().any(|c| c.is_ascii_digit())
}

impl FallbackIntentDetector {
    pub fn new() -> Self {
        Self {
            calc_keywords: compile(&format!(
                r"(?i)计算|算|求|等于|结果|是多少|{OP_WORDS}|\b(?:calculate|compute|sum|equals|add|subtract|multiply|divide)\b"
            )),
            math_expression: compile(r"[\d\s(]+[+\-*/][\d\s+\-*/()]+"),
            operator_phrase: compile(&format!(r"(?i)(\d+(?:\.\d+)?)\s*({OP_WORDS})\s*(\d+(?:\.\d+)?)")),
            follow_up_zh: compile(&format!(
                r"(?:再|然后|接着)?\s*({OP_WORDS})\s*(\d+(?:\.\d+)?)\s*(?:是多少|等于多少|等于|结果)"
            )),
            follow_up_en: compile(&format!(r"(?i)\b(?:then|now|and)\s+({OP_WORDS})\s+(\d+(?:\.\d+)?)")),
            prior_result: compile(r"(?:结果|等于|是|=|\bis)\s*(-?\d+(?:\.\d+)?)"),
            expression_runs: compile(r"[\d+\-*/()\s]+"),
            numbers: compile(r"\d+(?:\.\d+)?"),
            time_keywords: compile(
                r"(?i)时间|现在几点|日期|今天|当前时间|几号|几月|星期|\b(?:time|date|today|clock|weekday)\b",
            ),
            date_words: compile(r"(?i)几号|几月|今天是|日期|星期|哪一天|\b(?:date|day|weekday|today)\b"),
            clock_words: compile(r"(?i)几点|时间|\b(?:time|clock|hour)\b"),
            hour_words: compile(r"(?i)几点|现在几点|\b(?:what time|clock|hour)\b"),
            day_words: compile(r"(?i)几号|几月|日期|\b(?:date|day|today)\b"),
            search_keywords: compile(
                r"(?i)帮我搜索一下|帮我搜索|帮我搜|搜索一下|搜索|查找|查询|找|\b(?:search for|search|look up|find|google)\b",
            ),
            image_keywords: compile(
                r"(?i)找图片|搜图片|图片搜索|搜图|图片|照片|图|\b(?:images?|pictures?|photos?)\b",
            ),
            filler_words: compile(
                r"(?i)关于|的|信息|\b(?:about|information|info|on|of|for|me|please|some|the web)\b",
            ),
            whitespace: compile(r"\s+"),
        }
    }

    /// Synthesise tool calls from the latest user message.
    pub fn detect(&self, conversation: &Conversation) -> Vec<ToolCallRequest> {
        let Some(text) = conversation.last_user().map(|m| m.content.as_str()) else {
            return Vec::new();
        };

        if let Some(expression) = self.arithmetic(text, conversation) {
            debug!(expression = %expression, "Fallback detected a calculation");
            return vec![ToolCallRequest::new(
                unique_id("calc"),
                0,
                "calculate",
                json!({ "expression": expression }),
            )];
        }

        let mut calls = Vec::new();
        if let Some(format) = self.time_format(text) {
            calls.push(ToolCallRequest::new(
                unique_id("time"),
                calls.len() as u32,
                "getCurrentTime",
                json!({ "format": format }),
            ));
        }
        if let Some(query) = self.search_query(text) {
            calls.push(ToolCallRequest::new(
                unique_id("search"),
                calls.len() as u32,
                "searchWeb",
                json!({ "query": query }),
            ));
        }
        if let Some(query) = self.image_query(text) {
            calls.push(ToolCallRequest::new(
                unique_id("images"),
                calls.len() as u32,
                "searchImages",
                json!({ "query": query }),
            ));
        }
        if !calls.is_empty() {
            debug!(count = calls.len(), "Fallback detected tool intents");
        }
        calls
    }

    fn arithmetic(&self, text: &str, conversation: &Conversation) -> Option<String> {
        let candidate = if let Some(m) = self.math_expression.as_ref().and_then(|re| re.find(text)) {
            Some(strip_whitespace(m.as_str()))
        } else if let Some(c) = self.operator_phrase.as_ref().and_then(|re| re.captures(text)) {
            let op = operator_symbol(&c[2])?;
            Some(format!("{}{op}{}", &c[1], &c[3]))
        } else if let Some(c) = self.follow_up(text) {
            let op = operator_symbol(&c.0)?;
            let previous = self
                .previous_result(conversation)
                .map_or_else(|| "0".to_string(), format_number);
            Some(format!("{previous}{op}{}", c.1))
        } else if is_match(&self.calc_keywords, text) {
            self.keyword_expression(text)
        } else {
            None
        };

        candidate.filter(|c| is_expression(c))
    }

    fn follow_up(&self, text: &str) -> Option<(String, String)> {
        [&self.follow_up_zh, &self.follow_up_en]
            .into_iter()
            .flatten()
            .find_map(|re| re.captures(text))
            .map(|c| (c[1].to_string(), c[2].to_string()))
    }

    /// The most recent numeric result: last `calculate` tool message,
    /// then the last number stated in an assistant message.
    fn previous_result(&self, conversation: &Conversation) -> Option<f64> {
        let messages = conversation.messages();

        let from_tool = messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Tool && m.name.as_deref() == Some("calculate"))
            .find_map(|m| {
                let value: Value = serde_json::from_str(&m.content).ok()?;
                (value["success"] == true).then(|| value["result"].as_f64()).flatten()
            });
        if from_tool.is_some() {
            return from_tool;
        }

        let re = self.prior_result.as_ref()?;
        messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| {
                re.captures_iter(&m.content)
                    .last()
                    .and_then(|c| c[1].parse::<f64>().ok())
            })
    }

    fn keyword_expression(&self, text: &str) -> Option<String> {
        let joined: String = self
            .expression_runs
            .as_ref()?
            .find_iter(text)
            .map(|m| m.as_str())
            .collect();
        let joined = strip_whitespace(&joined);
        if is_expression(&joined) {
            return Some(joined);
        }

        let numbers: Vec<&str> = self.numbers.as_ref()?.find_iter(text).map(|m| m.as_str()).collect();
        (numbers.len() >= 2).then(|| numbers.join("+"))
    }

    fn time_format(&self, text: &str) -> Option<&'static str> {
        if !is_match(&self.time_keywords, text) {
            return None;
        }
        let format = if is_match(&self.date_words, text) && !is_match(&self.clock_words, text) {
            "date"
        } else if is_match(&self.hour_words, text) && !is_match(&self.day_words, text) {
            "time"
        } else {
            "full"
        };
        Some(format)
    }

    fn search_query(&self, text: &str) -> Option<String> {
        let keywords = self.search_keywords.as_ref()?;
        if !keywords.is_match(text) {
            return None;
        }
        let query = self.clean_query(&keywords.replace_all(text, " "));
        (query.chars().count() > 1).then_some(query)
    }

    fn image_query(&self, text: &str) -> Option<String> {
        let keywords = self.image_keywords.as_ref()?;
        if !keywords.is_match(text) {
            return None;
        }
        let mut stripped = keywords.replace_all(text, " ").into_owned();
        if let Some(search) = &self.search_keywords {
            stripped = search.replace_all(&stripped, " ").into_owned();
        }
        let query = self.clean_query(&stripped);
        (!query.is_empty()).then_some(query)
    }

    fn clean_query(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        if let Some(filler) = &self.filler_words {
            cleaned = filler.replace_all(&cleaned, " ").into_owned();
        }
        if let Some(ws) = &self.whitespace {
            cleaned = ws.replace_all(&cleaned, " ").into_owned();
        }
        cleaned
            .trim_matches(|c: char| c.is_whitespace() || "?？!！.。,，".contains(c))
            .to_string()
    }
}

impl Default for FallbackIntentDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn unique_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}
