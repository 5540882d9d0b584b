//! Failure classification and argument repair for tool retries.
//!
//! Rules are `(tool, error classifier, corrective transform)` entries
//! evaluated in priority order; the first match decides. Whether the
//! corrected call may run again is part of each transform's verdict.

use serde_json::{Value, json};

/// The verdict for one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub analysis: String,
    pub strategy: String,
    pub corrected_arguments: Value,
    pub can_retry: bool,
}

impl Correction {
    fn retry(analysis: impl Into<String>, strategy: impl Into<String>, arguments: Value) -> Self {
        Self {
            analysis: analysis.into(),
            strategy: strategy.into(),
            corrected_arguments: arguments,
            can_retry: true,
        }
    }

    fn give_up(analysis: impl Into<String>, strategy: impl Into<String>, arguments: Value) -> Self {
        Self {
            analysis: analysis.into(),
            strategy: strategy.into(),
            corrected_arguments: arguments,
            can_retry: false,
        }
    }
}

type Classifier = fn(&str) -> bool;
type Transform = fn(&Value) -> Correction;

struct Rule {
    /// `None` applies to every tool.
    tool: Option<&'static str>,
    label: &'static str,
    matches: Classifier,
    correct: Transform,
}

/// Ordered correction rules.
pub struct CorrectionEngine {
    rules: Vec<Rule>,
}

const OPERATORS: [char; 4] = ['+', '-', '*', '/'];
const MAX_SEARCH_QUERY_CHARS: usize = 20;
const MAX_TEXT_CHARS: usize = 500;

fn contains_any(error: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| error.contains(n))
}

impl CorrectionEngine {
    pub fn new() -> Self {
        let rules = vec![
            Rule {
                tool: None,
                label: "unknown tool",
                matches: |e| e.contains("tool not found"),
                correct: |args| {
                    Correction::give_up(
                        "No tool with this name is registered",
                        "Answer without this tool",
                        args.clone(),
                    )
                },
            },
            Rule {
                tool: Some("calculate"),
                label: "expression syntax",
                matches: |e| contains_any(e, &["syntax", "parse", "unexpected", "invalid", "token"]),
                correct: correct_expression,
            },
            Rule {
                tool: Some("calculate"),
                label: "undefined result",
                matches: |e| contains_any(e, &["undefined", "nan", "division by zero"]),
                correct: |args| {
                    Correction::give_up(
                        "The expression has no defined numeric result",
                        "Explain to the user that the calculation is undefined",
                        args.clone(),
                    )
                },
            },
            Rule {
                tool: Some("calculate"),
                label: "calculation failure",
                matches: |_| true,
                correct: |args| {
                    Correction::give_up(
                        "The calculator failed for a reason argument changes cannot fix",
                        "Report the failure",
                        args.clone(),
                    )
                },
            },
            Rule {
                tool: Some("getCurrentTime"),
                label: "time format",
                matches: |_| true,
                correct: |_| {
                    Correction::retry(
                        "The requested format may not be supported",
                        "Fall back to the full date and time format",
                        json!({ "format": "full" }),
                    )
                },
            },
            Rule {
                tool: Some("searchWeb"),
                label: "search transport",
                matches: |e| contains_any(e, &["timeout", "network"]),
                correct: |args| {
                    let query: String = args["query"]
                        .as_str()
                        .unwrap_or_default()
                        .chars()
                        .take(MAX_SEARCH_QUERY_CHARS)
                        .collect();
                    Correction::retry(
                        "The search timed out or the network is unstable",
                        format!(
                            "Shorten the query to {MAX_SEARCH_QUERY_CHARS} characters and ask for fewer results"
                        ),
                        json!({ "query": query, "limit": 3 }),
                    )
                },
            },
            Rule {
                tool: Some("searchWeb"),
                label: "search not found",
                matches: |e| contains_any(e, &["404", "not found"]),
                correct: |args| {
                    Correction::retry(
                        "The search source returned no page",
                        "Retry the same search once",
                        args.clone(),
                    )
                },
            },
            Rule {
                tool: Some("textProcess"),
                label: "text size",
                matches: |_| true,
                correct: |args| {
                    let mut corrected = args.clone();
                    if let Some(text) = args["text"].as_str() {
                        corrected["text"] = json!(text.chars().take(MAX_TEXT_CHARS).collect::<String>());
                    }
                    Correction::retry(
                        "The text may be too long to process",
                        format!("Truncate the text to {MAX_TEXT_CHARS} characters"),
                        corrected,
                    )
                },
            },
            Rule {
                tool: None,
                label: "generic",
                matches: |_| true,
                correct: |args| {
                    Correction::retry(
                        "The failure may be transient",
                        "Retry with the same arguments",
                        args.clone(),
                    )
                },
            },
        ];
        Self { rules }
    }

    /// Classify a failure of `tool` called with `arguments`.
    pub fn correct(&self, tool: &str, arguments: &Value, error: &str) -> Correction {
        let error = error.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.tool.is_none_or(|t| t == tool))
            .find(|rule| (rule.matches)(&error))
            .map(|rule| {
                tracing::debug!(tool, rule = rule.label, "Correction rule matched");
                (rule.correct)(arguments)
            })
            .unwrap_or_else(|| {
                Correction::retry("Unclassified failure", "Retry with the same arguments", arguments.clone())
            })
    }
}

impl Default for CorrectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn correct_expression(args: &Value) -> Correction {
    let original = args["expression"].as_str().unwrap_or_default().trim();
    let (analysis, strategy, repaired) = repair_expression(original);

    if repaired.is_empty() {
        return Correction::give_up(
            analysis,
            "Nothing computable remains after correction",
            json!({ "expression": repaired }),
        );
    }
    if !repaired.contains(OPERATORS) {
        return Correction::give_up(
            analysis,
            format!("{strategy}; no operator remains, so there is nothing to calculate"),
            json!({ "expression": repaired }),
        );
    }
    Correction::retry(analysis, strategy, json!({ "expression": repaired }))
}

/// First matching repair wins.
fn repair_expression(expr: &str) -> (&'static str, &'static str, String) {
    if expr.ends_with(OPERATORS) {
        return (
            "The expression ends with an operator and is incomplete",
            "Remove the trailing operator",
            expr.trim_end_matches(OPERATORS).trim_end().to_string(),
        );
    }
    if expr.starts_with(['+', '*', '/']) {
        return (
            "The expression starts with an operator",
            "Remove the leading operator",
            expr.trim_start_matches(['+', '*', '/']).trim_start().to_string(),
        );
    }
    if has_doubled_operator(expr) {
        return (
            "The expression contains consecutive operators",
            "Collapse repeated operators into a single '+'",
            collapse_operators(expr),
        );
    }

    let open = expr.matches('(').count();
    let close = expr.matches(')').count();
    if open > close {
        return (
            "The expression has an unclosed parenthesis",
            "Append the missing closing parenthesis",
            format!("{expr}{}", ")".repeat(open - close)),
        );
    }
    if close > open {
        return (
            "The expression has an unmatched closing parenthesis",
            "Prepend the missing opening parenthesis",
            format!("{}{expr}", "(".repeat(close - open)),
        );
    }

    (
        "The expression contains characters the calculator does not accept",
        "Keep only digits, operators, parentheses and decimal points",
        expr.chars()
            .filter(|c| c.is_ascii_digit() || "+-*/().%".contains(*c))
            .collect(),
    )
}

fn has_doubled_operator(expr: &str) -> bool {
    expr.chars()
        .zip(expr.chars().skip(1))
        .any(|(a, b)| OPERATORS.contains(&a) && OPERATORS.contains(&b))
}

fn collapse_operators(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut run = String::new();
    for c in expr.chars() {
        if OPERATORS.contains(&c) {
            run.push(c);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(c);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    match run.chars().count() {
        0 => {}
        1 => out.push_str(run),
        _ => out.push('+'),
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(expr: &str, error: &str) -> Correction {
        CorrectionEngine::new().correct("calculate", &json!({ "expression": expr }), error)
    }

    #[test]
    fn trailing_operator_is_stripped_and_not_retried() {
        let c = calc("12+", "Syntax error: unexpected end of expression");
        assert_eq!(c.corrected_arguments, json!({"expression": "12"}));
        assert!(!c.can_retry);
    }

    #[test]
    fn trailing_operator_with_remaining_operator_is_retried() {
        let c = calc("12+7*", "Syntax error: unexpected end of expression");
        assert_eq!(c.corrected_arguments, json!({"expression": "12+7"}));
        assert!(c.can_retry);
    }

    #[test]
    fn unclosed_parenthesis_is_appended() {
        let c = calc("(1+2", "Syntax error: expected closing parenthesis");
        assert_eq!(c.corrected_arguments, json!({"expression": "(1+2)"}));
        assert!(c.can_retry);
    }

    #[test]
    fn unmatched_closing_parenthesis_is_prepended() {
        let c = calc("1+2)", "Syntax error: unexpected token ')' at position 3");
        assert_eq!(c.corrected_arguments, json!({"expression": "(1+2)"}));
        assert!(c.can_retry);
    }

    #[test]
    fn leading_operator_is_stripped() {
        let c = calc("*3+4", "Syntax error: unexpected token '*'");
        assert_eq!(c.corrected_arguments, json!({"expression": "3+4"}));
        assert!(c.can_retry);
    }

    #[test]
    fn doubled_operators_collapse() {
        let c = calc("3+*4", "Syntax error: unexpected token '*'");
        assert_eq!(c.corrected_arguments, json!({"expression": "3+4"}));
        assert!(c.can_retry);
    }

    #[test]
    fn stray_characters_are_removed() {
        let c = calc("3 x 4 + 1", "Syntax error: invalid character 'x'");
        assert_eq!(c.corrected_arguments, json!({"expression": "34+1"}));
        assert!(c.can_retry);
    }

    #[test]
    fn nothing_left_is_not_retried() {
        let c = calc("abc", "Syntax error: invalid character 'a'");
        assert_eq!(c.corrected_arguments, json!({"expression": ""}));
        assert!(!c.can_retry);
    }

    #[test]
    fn division_by_zero_is_not_retried() {
        let c = calc("1/0", "Math error: division by zero");
        assert!(!c.can_retry);
        assert_eq!(c.corrected_arguments, json!({"expression": "1/0"}));
    }

    #[test]
    fn clock_resets_format() {
        let c = CorrectionEngine::new().correct("getCurrentTime", &json!({"format": "weekday"}), "boom");
        assert_eq!(c.corrected_arguments, json!({"format": "full"}));
        assert!(c.can_retry);
    }

    #[test]
    fn search_timeout_shortens_query() {
        let args = json!({"query": "a very long query about rust async runtimes", "limit": 10});
        let c = CorrectionEngine::new().correct("searchWeb", &args, "Tool timeout: searchWeb after 15s");
        assert_eq!(c.corrected_arguments, json!({"query": "a very long query ab", "limit": 3}));
        assert!(c.can_retry);
    }

    #[test]
    fn search_not_found_retries_unchanged() {
        let args = json!({"query": "rust"});
        let c = CorrectionEngine::new().correct("searchWeb", &args, "HTTP 404");
        assert_eq!(c.corrected_arguments, args);
        assert!(c.can_retry);
    }

    #[test]
    fn text_is_truncated() {
        let long = "x".repeat(800);
        let c = CorrectionEngine::new().correct("textProcess", &json!({"text": long, "operation": "count"}), "failed");
        assert_eq!(c.corrected_arguments["text"].as_str().unwrap().len(), 500);
        assert_eq!(c.corrected_arguments["operation"], "count");
    }

    #[test]
    fn unknown_tools_retry_with_original_arguments() {
        let args = json!({"symbol": "ACME"});
        let c = CorrectionEngine::new().correct("lookupStock", &args, "service unavailable");
        assert_eq!(c.corrected_arguments, args);
        assert!(c.can_retry);
    }

    #[test]
    fn unregistered_tool_is_not_retried() {
        let c = CorrectionEngine::new().correct("nope", &json!({}), "Tool not found: nope");
        assert!(!c.can_retry);
    }
}
