//! Boolean condition dialect used by the executor to select edges at runtime.
//!
//! Grammar (informal): `expr := or_expr`, `or_expr := and_expr ('||' and_expr)*`,
//! `and_expr := atom ('&&' atom)*`, `atom := '!'? (comparison | path)`.
//! `comparison := operand ('==' | '!=' | '>=' | '<=' | '>' | '<') operand`.
//! Operands are `true`/`false`/`null`, a quoted string, a bare number, or a
//! dotted path resolved against `context`, `nodeOutputs`, or `parallelOutputs`.

use crate::RuntimeContext;
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only view over the three namespaces a Dialect A expression may address.
pub struct EvalScope<'a> {
    pub context: &'a RuntimeContext,
    pub node_outputs: &'a BTreeMap<String, String>,
    pub parallel_outputs: &'a BTreeMap<String, BTreeMap<String, String>>,
}

pub fn evaluate(expression: &str, scope: &EvalScope<'_>) -> Result<bool, String> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Ok(true);
    }
    let (value, rest) = parse_or(trimmed, scope)?;
    if !rest.trim().is_empty() {
        return Err(format!("unexpected trailing input '{rest}'"));
    }
    Ok(value)
}

fn parse_or<'a>(input: &'a str, scope: &EvalScope<'_>) -> Result<(bool, &'a str), String> {
    let (mut acc, mut rest) = parse_and(input, scope)?;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("||") {
            let (right, remainder) = parse_and(after, scope)?;
            acc = acc || right;
            rest = remainder;
        } else {
            return Ok((acc, rest));
        }
    }
}

fn parse_and<'a>(input: &'a str, scope: &EvalScope<'_>) -> Result<(bool, &'a str), String> {
    let (mut acc, mut rest) = parse_unary(input, scope)?;
    loop {
        let trimmed = rest.trim_start();
        if trimmed.starts_with("&&") {
            let after = &trimmed[2..];
            let (right, remainder) = parse_unary(after, scope)?;
            acc = acc && right;
            rest = remainder;
        } else {
            return Ok((acc, rest));
        }
    }
}

fn parse_unary<'a>(input: &'a str, scope: &EvalScope<'_>) -> Result<(bool, &'a str), String> {
    let trimmed = input.trim_start();
    if let Some(after) = trimmed.strip_prefix('!') {
        let (value, rest) = parse_unary(after, scope)?;
        return Ok((!value, rest));
    }
    parse_comparison(trimmed, scope)
}

const COMPARISON_OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

fn parse_comparison<'a>(input: &'a str, scope: &EvalScope<'_>) -> Result<(bool, &'a str), String> {
    let (left_raw, rest_after_left) = take_operand_token(input)?;

    let trimmed_rest = rest_after_left.trim_start();
    for op in COMPARISON_OPERATORS {
        if let Some(after_op) = trimmed_rest.strip_prefix(op) {
            let (right_raw, rest) = take_operand_token(after_op)?;
            let left = resolve_operand(left_raw, scope);
            let right = resolve_operand(right_raw, scope);
            let result = match op {
                "==" => values_equal(&left, &right),
                "!=" => !values_equal(&left, &right),
                ">=" => numeric(&left) >= numeric(&right),
                "<=" => numeric(&left) <= numeric(&right),
                ">" => numeric(&left) > numeric(&right),
                "<" => numeric(&left) < numeric(&right),
                _ => unreachable!(),
            };
            return Ok((result, rest));
        }
    }

    // Bare expression: truthiness of the resolved operand.
    let value = resolve_operand(left_raw, scope);
    Ok((is_truthy(&value), rest_after_left))
}

/// Splits off one operand token: a quoted string, or a run of non-whitespace
/// characters up to the next operator/parenthesis boundary.
fn take_operand_token(input: &str) -> Result<(&str, &str), String> {
    let trimmed = input.trim_start();
    let offset = input.len() - trimmed.len();
    let bytes = trimmed.as_bytes();

    if bytes.is_empty() {
        return Err("expected operand, found end of expression".to_string());
    }

    if bytes[0] == b'"' {
        let mut i = 1;
        while i < bytes.len() {
            if bytes[i] == b'\\' {
                i += 2;
                continue;
            }
            if bytes[i] == b'"' {
                i += 1;
                let token = &trimmed[..i];
                return Ok((token, &input[offset + i..]));
            }
            i += 1;
        }
        return Err(format!("unterminated string literal in '{trimmed}'"));
    }

    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i] as char;
        if ch.is_whitespace() {
            break;
        }
        if matches_operator_at(&trimmed[i..]) {
            break;
        }
        i += 1;
    }
    if i == 0 {
        return Err(format!("expected operand in '{trimmed}'"));
    }
    Ok((&trimmed[..i], &input[offset + i..]))
}

fn matches_operator_at(slice: &str) -> bool {
    slice.starts_with("&&")
        || slice.starts_with("||")
        || COMPARISON_OPERATORS.iter().any(|op| slice.starts_with(op))
}

fn resolve_operand(raw: &str, scope: &EvalScope<'_>) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Some(unquoted) = trimmed.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return Value::String(unescape(unquoted));
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::Number(integer.into());
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    resolve_path(trimmed, scope).unwrap_or(Value::Null)
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn resolve_path(path: &str, scope: &EvalScope<'_>) -> Option<Value> {
    let (namespace, rest) = path.split_once('.')?;
    match namespace {
        "context" => scope.context.get(rest).cloned(),
        "nodeOutputs" => scope
            .node_outputs
            .get(rest)
            .cloned()
            .map(Value::String),
        "parallelOutputs" => {
            let (node_id, branch) = rest.split_once('.')?;
            scope
                .parallel_outputs
                .get(node_id)
                .and_then(|branches| branches.get(branch))
                .cloned()
                .map(Value::String)
        }
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.parse::<f64>().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
