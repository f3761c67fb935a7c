//! Field extraction from request payloads.
//!
//! The engine consumes extraction through the [`KeyExtractor`] trait so any
//! expression evaluator can be plugged in. [`FieldPathExtractor`] is the
//! default and understands the subset of JMESPath that idempotency keys are
//! normally written in:
//!
//! | expression                          | meaning                                   |
//! |-------------------------------------|-------------------------------------------|
//! | `@`                                 | the whole payload                         |
//! | `body.order_id`                     | nested field                              |
//! | `Records[0].messageId`              | array index (negative counts from the end)|
//! | `"x-idempotency-key"`               | quoted field name                         |
//! | `[user_id, order.id]`               | multi-select list                         |
//! | `powertools_json(body).order_id`    | decode a JSON string, then continue       |

use serde_json::Value;
use thiserror::Error;

/// Error raised for an expression the extractor cannot evaluate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid extraction expression '{expression}': {message}")]
pub struct ExtractError {
    /// The offending expression
    pub expression: String,
    /// What is wrong with it
    pub message: String,
}

impl ExtractError {
    fn new(expression: &str, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluates an expression against a JSON payload.
pub trait KeyExtractor: Send + Sync {
    /// Returns the selected value, or `None` when the expression selects
    /// nothing.
    fn extract(&self, expression: &str, input: &Value) -> Result<Option<Value>, ExtractError>;

    /// Checks an expression without evaluating it. Called once when the
    /// coordinator is built so malformed expressions fail early.
    fn validate(&self, expression: &str) -> Result<(), ExtractError> {
        let _ = expression;
        Ok(())
    }
}

/// Default dotted-path / multi-select extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPathExtractor;

impl KeyExtractor for FieldPathExtractor {
    fn extract(&self, expression: &str, input: &Value) -> Result<Option<Value>, ExtractError> {
        let parsed = Expression::parse(expression)?;
        Ok(parsed.evaluate(input))
    }

    fn validate(&self, expression: &str) -> Result<(), ExtractError> {
        Expression::parse(expression).map(|_| ())
    }
}

/// Returns true when an extracted key carries no usable data: absent, null,
/// an empty string, or an array or object whose every entry is null.
pub fn is_missing_key(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.iter().all(Value::is_null),
        Some(Value::Object(map)) => map.values().all(Value::is_null),
        Some(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    /// Segments selecting a JSON-encoded string to decode first
    decode: Option<Vec<Segment>>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expression {
    Identity,
    Path(Path),
    MultiSelect(Vec<Path>),
}

const DECODE_FUNCTION: &str = "powertools_json(";

impl Expression {
    fn parse(expression: &str) -> Result<Self, ExtractError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ExtractError::new(expression, "expression is empty"));
        }
        if trimmed == "@" {
            return Ok(Self::Identity);
        }
        if let Some(inner) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            // `[0]` is an index expression, `[a, b]` a multi-select list.
            if inner.trim().parse::<i64>().is_err() {
                let paths = split_top_level(inner)
                    .into_iter()
                    .map(|part| parse_path(expression, part.trim()))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Self::MultiSelect(paths));
            }
        }
        parse_path(expression, trimmed).map(Self::Path)
    }

    fn evaluate(&self, input: &Value) -> Option<Value> {
        match self {
            Self::Identity => Some(input.clone()),
            Self::Path(path) => path.evaluate(input),
            Self::MultiSelect(paths) => Some(Value::Array(
                paths
                    .iter()
                    .map(|path| path.evaluate(input).unwrap_or(Value::Null))
                    .collect(),
            )),
        }
    }
}

impl Path {
    fn evaluate(&self, input: &Value) -> Option<Value> {
        match &self.decode {
            Some(prefix) => {
                let encoded = select(input, prefix)?;
                let decoded: Value = serde_json::from_str(encoded.as_str()?).ok()?;
                select(&decoded, &self.segments).cloned()
            }
            None => select(input, &self.segments).cloned(),
        }
    }
}

fn select<'a>(mut current: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.as_object()?.get(name)?,
            Segment::Index(index) => {
                let items = current.as_array()?;
                let len = items.len() as i64;
                let position = if *index < 0 { len + index } else { *index };
                if position < 0 {
                    return None;
                }
                items.get(usize::try_from(position).ok()?)?
            }
        };
    }
    Some(current)
}

/// Splits on commas that are not nested inside brackets, parentheses or quotes.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '[' | '(' if !in_quotes => depth += 1,
            ']' | ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_path(expression: &str, input: &str) -> Result<Path, ExtractError> {
    if let Some(rest) = input.strip_prefix(DECODE_FUNCTION) {
        let close = rest
            .find(')')
            .ok_or_else(|| ExtractError::new(expression, "unterminated powertools_json("))?;
        let decode = parse_segments(expression, rest[..close].trim())?;
        let tail = rest[close + 1..].trim();
        let segments = if tail.is_empty() {
            Vec::new()
        } else if let Some(after_dot) = tail.strip_prefix('.') {
            parse_segments(expression, after_dot)?
        } else if tail.starts_with('[') {
            parse_segments(expression, tail)?
        } else {
            return Err(ExtractError::new(
                expression,
                format!("unexpected '{}' after powertools_json(...)", tail),
            ));
        };
        return Ok(Path {
            decode: Some(decode),
            segments,
        });
    }
    Ok(Path {
        decode: None,
        segments: parse_segments(expression, input)?,
    })
}

fn parse_segments(expression: &str, input: &str) -> Result<Vec<Segment>, ExtractError> {
    let chars: Vec<char> = input.chars().collect();
    if chars.is_empty() {
        return Err(ExtractError::new(expression, "empty path"));
    }

    let mut segments = Vec::new();
    let mut expect_field = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '[' if !expect_field || segments.is_empty() => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| ExtractError::new(expression, "unterminated '['"))?;
                let literal: String = chars[i + 1..close].iter().collect();
                let index = literal.trim().parse::<i64>().map_err(|_| {
                    ExtractError::new(expression, format!("'{}' is not an array index", literal))
                })?;
                segments.push(Segment::Index(index));
                expect_field = false;
                i = close + 1;
            }
            '.' if !expect_field => {
                expect_field = true;
                i += 1;
            }
            '"' if expect_field => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '"')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| ExtractError::new(expression, "unterminated quoted field"))?;
                segments.push(Segment::Field(chars[i + 1..close].iter().collect()));
                expect_field = false;
                i = close + 1;
            }
            c if expect_field && (c.is_ascii_alphabetic() || c == '_') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .map_or(chars.len(), |offset| i + offset);
                segments.push(Segment::Field(chars[i..end].iter().collect()));
                expect_field = false;
                i = end;
            }
            other => {
                return Err(ExtractError::new(
                    expression,
                    format!("unexpected '{}' at position {}", other, i),
                ));
            }
        }
    }

    if expect_field {
        return Err(ExtractError::new(expression, "path ends with '.'"));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(expression: &str, input: &Value) -> Option<Value> {
        FieldPathExtractor.extract(expression, input).unwrap()
    }

    #[test]
    fn test_nested_field() {
        let input = json!({"body": {"order_id": "o-1", "amount": 5}});
        assert_eq!(extract("body.order_id", &input), Some(json!("o-1")));
        assert_eq!(extract("body", &input), Some(json!({"order_id": "o-1", "amount": 5})));
        assert_eq!(extract("body.missing", &input), None);
        assert_eq!(extract("body.order_id.deeper", &input), None);
    }

    #[test]
    fn test_identity() {
        let input = json!({"a": 1});
        assert_eq!(extract("@", &input), Some(input.clone()));
    }

    #[test]
    fn test_array_index() {
        let input = json!({"Records": [{"messageId": "m1"}, {"messageId": "m2"}]});
        assert_eq!(extract("Records[0].messageId", &input), Some(json!("m1")));
        assert_eq!(extract("Records[-1].messageId", &input), Some(json!("m2")));
        assert_eq!(extract("Records[5].messageId", &input), None);
        assert_eq!(extract("[0]", &json!(["x", "y"])), Some(json!("x")));
    }

    #[test]
    fn test_quoted_field() {
        let input = json!({"headers": {"x-idempotency-key": "abc"}});
        assert_eq!(
            extract(r#"headers."x-idempotency-key""#, &input),
            Some(json!("abc"))
        );
    }

    #[test]
    fn test_multi_select() {
        let input = json!({"user_id": 7, "order": {"id": "o-9"}});
        assert_eq!(
            extract("[user_id, order.id]", &input),
            Some(json!([7, "o-9"]))
        );
        assert_eq!(
            extract("[nope, order.nope]", &input),
            Some(json!([null, null]))
        );
    }

    #[test]
    fn test_decode_json_string() {
        let input = json!({"body": "{\"order_id\": \"o-1\", \"items\": [1, 2]}"});
        assert_eq!(
            extract("powertools_json(body).order_id", &input),
            Some(json!("o-1"))
        );
        assert_eq!(
            extract("powertools_json(body).items[1]", &input),
            Some(json!(2))
        );
        assert_eq!(
            extract("powertools_json(body)", &input),
            Some(json!({"order_id": "o-1", "items": [1, 2]}))
        );
        assert_eq!(extract("powertools_json(missing).x", &input), None);
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in ["", "a.", "a..b", "a[x]", "a[0", "1abc", "powertools_json(body"] {
            assert!(
                FieldPathExtractor.validate(bad).is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_is_missing_key() {
        assert!(is_missing_key(None));
        assert!(is_missing_key(Some(&json!(null))));
        assert!(is_missing_key(Some(&json!(""))));
        assert!(is_missing_key(Some(&json!([null, null]))));
        assert!(is_missing_key(Some(&json!({}))));
        assert!(is_missing_key(Some(&json!({"id": null}))));
        assert!(!is_missing_key(Some(&json!([null, 1]))));
        assert!(!is_missing_key(Some(&json!({"id": null, "ref": "r-1"}))));
        assert!(!is_missing_key(Some(&json!(0))));
        assert!(!is_missing_key(Some(&json!("k"))));
    }
}
