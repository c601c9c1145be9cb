//! Turn raw oracle text into decisions
//!
//! The oracle is free to wrap its answer in prose, code fences or thinking
//! tags. Only the first bracket-balanced JSON array counts. Inline arithmetic
//! such as `"size": 0.5*0.02` is evaluated before parsing. Anything
//! unusable degrades to HOLD.

use serde_json::Value;
use tracing::warn;

use crate::domain::Decision;

/// First bracket-balanced `[...]` in `text`, ignoring brackets inside
/// JSON strings.
pub fn first_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(u8),
}

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let chars: Vec<u8> = expr.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    let mut tokens = Vec::new();
    let mut expect_operand = true;
    let mut i = 0;

    while i < chars.len() {
        if expect_operand {
            let start = i;
            if chars[i] == b'-' {
                i += 1;
            }
            let digits = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == b'.') {
                i += 1;
            }
            if i == digits {
                return None;
            }
            let literal = std::str::from_utf8(&chars[start..i]).ok()?;
            tokens.push(Token::Num(literal.parse().ok()?));
            expect_operand = false;
        } else {
            match chars[i] {
                op @ (b'+' | b'-' | b'*' | b'/') => tokens.push(Token::Op(op)),
                _ => return None,
            }
            i += 1;
            expect_operand = true;
        }
    }

    if expect_operand {
        return None;
    }
    Some(tokens)
}

/// Evaluate `+ - * /` over numeric literals with the usual precedence.
/// `None` for anything else, for division by zero, and for a lone literal.
pub fn eval_arithmetic(expr: &str) -> Option<f64> {
    let tokens = tokenize(expr)?;
    if tokens.len() < 3 {
        return None;
    }

    let mut iter = tokens.into_iter();
    let Some(Token::Num(first)) = iter.next() else {
        return None;
    };
    let mut sum = 0.0;
    let mut sign = 1.0;
    let mut term = first;

    while let Some(Token::Op(op)) = iter.next() {
        let Some(Token::Num(n)) = iter.next() else {
            return None;
        };
        match op {
            b'*' => term *= n,
            b'/' => {
                if n == 0.0 {
                    return None;
                }
                term /= n;
            }
            b'+' | b'-' => {
                sum += sign * term;
                sign = if op == b'+' { 1.0 } else { -1.0 };
                term = n;
            }
            _ => return None,
        }
    }

    let result = sum + sign * term;
    result.is_finite().then_some(result)
}

fn is_expr_byte(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'*' | b'/' | b' ' | b'\t')
}

/// Replace `key: <arithmetic>` values with their result. String contents
/// are never touched.
pub fn eval_numeric_literals(json: &str) -> String {
    let bytes = json.as_bytes();
    let mut out = String::with_capacity(json.len());
    let mut copied = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b':' => {
                let mut start = i + 1;
                while start < bytes.len() && bytes[start].is_ascii_whitespace() {
                    start += 1;
                }
                let mut end = start;
                while end < bytes.len() && is_expr_byte(bytes[end]) {
                    end += 1;
                }
                let expr = json[start..end].trim_end();
                let expr_end = start + expr.len();
                if let Some(value) = eval_arithmetic(expr) {
                    out.push_str(&json[copied..start]);
                    out.push_str(&value.to_string());
                    copied = expr_end;
                }
                i = expr_end.max(i + 1);
            }
            _ => i += 1,
        }
    }

    out.push_str(&json[copied..]);
    out
}

/// Decisions extracted from raw oracle text; never empty.
pub fn process_raw(raw: &str) -> Vec<Decision> {
    let Some(fragment) = first_json_array(raw) else {
        warn!("Oracle output has no JSON array");
        return vec![Decision::hold_because("No JSON detected")];
    };

    let cleaned = eval_numeric_literals(fragment);
    let items = match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Array(items)) => items,
        Ok(_) | Err(_) => {
            warn!("Oracle output is not valid JSON: {}", cleaned);
            return vec![Decision::hold_because("Malformed JSON")];
        }
    };

    let decisions: Vec<Decision> = items
        .iter()
        .map(|item| {
            Decision::from_value(item).unwrap_or_else(|e| {
                warn!("Invalid decision {}: {}", item, e);
                Decision::hold_because(format!("Validation error: {}", e))
            })
        })
        .collect();

    if decisions.is_empty() {
        vec![Decision::hold_because("Empty decision list")]
    } else {
        decisions
    }
}
