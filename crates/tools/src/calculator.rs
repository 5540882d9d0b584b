//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, parentheses, decimals and unary
//! negation through a recursive-descent parser. Characters outside that
//! set are rejected rather than silently dropped.

use agentwire_core::error::ToolError;
use agentwire_core::tool::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Use it whenever the user asks for a calculation. Supports +, -, *, /, %, parentheses and decimal numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. \"2 + 2\", \"10 * 5\", \"(3 + 4) * 2\""
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let Some(expression) = arguments["expression"].as_str() else {
            return Ok(json!({
                "success": false,
                "error": "Invalid arguments: missing 'expression'"
            }));
        };

        match evaluate(expression) {
            Ok(value) => Ok(json!({
                "success": true,
                "result": number_value(value),
                "expression": expression,
            })),
            Err(e) => Ok(json!({ "success": false, "error": e })),
        }
    }
}

/// Whole results are reported as JSON integers (`19`, not `19.0`).
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens);
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!(
            "Syntax error: unexpected token {} at position {}",
            tok, parser.pos
        ));
    }
    if !result.is_finite() {
        return Err("Math error: result is undefined (overflow)".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let single = match chars[i] {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }

        match chars[i] {
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Syntax error: invalid number '{num_str}'"))?;
                tokens.push(Token::Number(num));
            }
            c => return Err(format!("Syntax error: invalid character '{c}'")),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.consume();
                    left += self.parse_term()?;
                }
                Token::Minus => {
                    self.consume();
                    left -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.consume();
                    left *= self.parse_unary()?;
                }
                Token::Slash | Token::Percent => {
                    let is_modulo = *op == Token::Percent;
                    self.consume();
                    let right = self.parse_unary()?;
                    if right == 0.0 {
                        return Err("Math error: division by zero".into());
                    }
                    if is_modulo {
                        left %= right;
                    } else {
                        left /= right;
                    }
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary = ('-' | '+') unary | primary
    fn parse_unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(-self.parse_unary()?)
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Syntax error: expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("Syntax error: unexpected token {tok}")),
            None => Err("Syntax error: unexpected end of expression".into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
