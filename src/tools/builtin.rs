//! Built-in tools for the reference agent.
//!
//! Provides `current_time` and `calculator`. Each tool is constructed via
//! [`AgentTool::new`] and returned as `Arc<dyn Tool>`.
//!
//! # Usage
//!
//! ```rust
//! use parley::tools::builtin::all_tools;
//!
//! let tools = all_tools();
//! assert_eq!(tools.len(), 2);
//! ```

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use regex::Regex;

use crate::error::ParleyError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

const CALCULATOR: &str = "calculator";

/// Deepest nesting of parentheses and unary signs the calculator accepts.
const MAX_NESTING: usize = 64;

/// Create the `current_time` tool, returning the current UTC time in ISO-8601.
pub fn current_time_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "current_time",
        "Returns the current time in ISO-8601.",
        AgentToolParameters::empty(),
        |_args, _ctx: ToolExecutionContext| async move {
            Ok(serde_json::Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
        },
    ))
}

/// Create the `calculator` tool, evaluating simple arithmetic expressions.
///
/// Only digits, `+ - * / ( ) .` and whitespace are accepted.
pub fn calculator_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        CALCULATOR,
        "Evaluates simple arithmetic expressions. Example: (2+3*5)/2",
        AgentToolParameters::object()
            .string("expression", "Arithmetic expression to evaluate", true)
            .build(),
        |args, _ctx: ToolExecutionContext| async move {
            let expression = args.get_str("expression")?;
            let value = evaluate(expression)?;
            Ok(serde_json::Value::String(format_number(value)))
        },
    ))
}

/// All built-in tools.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![current_time_tool(), calculator_tool()]
}

fn calc_error(message: impl Into<String>) -> ParleyError {
    ParleyError::ToolExecution {
        tool_name: CALCULATOR.into(),
        message: message.into(),
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, ParleyError> {
    let allowed = Regex::new(r"^[\d+\-*/().\s]+$").map_err(|e| calc_error(e.to_string()))?;
    if !allowed.is_match(expression) {
        return Err(calc_error("expression not allowed"));
    }
    let mut parser = ExprParser {
        chars: expression.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(calc_error(format!(
            "unexpected '{}' at position {}",
            parser.chars[parser.pos], parser.pos
        )));
    }
    if !value.is_finite() {
        return Err(calc_error("result is not a finite number"));
    }
    Ok(value)
}

/// Integral values print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Recursive-descent parser over `expr := term (('+'|'-') term)*`,
/// `term := factor (('*'|'/') factor)*`,
/// `factor := ('+'|'-') factor | number | '(' expr ')'`.
struct ExprParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn peek(&mut self) -> Option<char> {
        while matches!(self.chars.get(self.pos), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, ParleyError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ParleyError> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(calc_error("division by zero"));
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, ParleyError> {
        if matches!(self.peek(), Some('-' | '+' | '(')) {
            self.depth += 1;
            if self.depth > MAX_NESTING {
                return Err(calc_error("expression nested too deeply"));
            }
            let value = self.nested();
            self.depth -= 1;
            return value;
        }
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(calc_error(format!("unexpected '{c}'"))),
            None => Err(calc_error("unexpected end of expression")),
        }
    }

    /// A unary sign or a parenthesized expression.
    fn nested(&mut self) -> Result<f64, ParleyError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err(calc_error("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(value)
            }
            _ => Err(calc_error("unexpected end of expression")),
        }
    }

    fn number(&mut self) -> Result<f64, ParleyError> {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(c) if c.is_ascii_digit() || *c == '.') {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| calc_error(format!("invalid number '{literal}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolArguments;
    use serde_json::json;

    #[test]
    fn evaluates_with_precedence() {
        assert_eq!(evaluate("(2+3*5)/2").unwrap(), 8.5);
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("-(1 - 4)").unwrap(), 3.0);
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(evaluate("2 ** x").is_err());
        assert!(evaluate("process.exit()").is_err());
        assert!(evaluate("").is_err());
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(evaluate("(1+2").is_err());
        assert!(evaluate("1..2").is_err());
        assert!(evaluate("1 2").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected_without_recursing() {
        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = evaluate(&deep).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let signs = format!("{}1", "-".repeat(10_000));
        assert!(evaluate(&signs).is_err());

        let shallow = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(evaluate(&shallow).unwrap(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deep_expression_fails_inside_a_worker_task() {
        let expression = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        let out = tokio::spawn(async move {
            calculator_tool()
                .execute(
                    &ToolArguments::new(json!({ "expression": expression })),
                    &ToolExecutionContext::default(),
                )
                .await
        })
        .await
        .unwrap();
        assert!(matches!(out, Err(ParleyError::ToolExecution { .. })));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = evaluate("1/0").unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn formats_like_plain_numbers() {
        assert_eq!(format_number(17.0), "17");
        assert_eq!(format_number(8.5), "8.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[tokio::test]
    async fn calculator_tool_returns_string_output() {
        let tool = calculator_tool();
        let out = tool
            .execute(
                &ToolArguments::new(json!({ "expression": "6*7" })),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!("42"));
    }

    #[tokio::test]
    async fn current_time_is_iso_8601() {
        let tool = current_time_tool();
        let out = tool
            .execute(&ToolArguments::new(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
        assert!(text.ends_with('Z'));
    }

    #[test]
    fn all_tools_have_distinct_names() {
        let tools = all_tools();
        let names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["current_time", "calculator"]);
        assert_eq!(tools[1].definition().parameters["required"], json!(["expression"]));
    }
}
