//! Recovery of JSON from free-form model output.

use super::LlmError;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex must compile"));

/// Scanner state shared by span extraction and bracket balancing.
#[derive(Default)]
struct Scan {
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Feed one character. Returns true when it closed the outermost bracket.
    fn push(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return false;
        }
        match c {
            '"' => self.in_string = true,
            '{' => self.stack.push('}'),
            '[' => self.stack.push(']'),
            '}' | ']' => {
                if self.stack.last() == Some(&c) {
                    self.stack.pop();
                    return self.stack.is_empty();
                }
            }
            _ => {}
        }
        false
    }
}

/// The first balanced `{...}` or `[...]` span in `text`. When the span never
/// closes, everything from the opening bracket on is returned so the caller
/// can try to repair it. `None` if there is no bracket at all.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut scan = Scan::default();
    for (offset, c) in text[start..].char_indices() {
        if scan.push(c) {
            return Some(&text[start..start + offset + c.len_utf8()]);
        }
    }
    Some(text[start..].trim_end())
}

/// Drop trailing commas before `}`/`]` and close anything left open,
/// innermost first.
pub fn repair_json(text: &str) -> String {
    let mut repaired = TRAILING_COMMA.replace_all(text, "$1").into_owned();

    let mut scan = Scan::default();
    for c in repaired.chars() {
        scan.push(c);
    }
    if scan.in_string {
        repaired.push('"');
    }
    let trimmed_len = repaired.trim_end().trim_end_matches(',').len();
    repaired.truncate(trimmed_len);
    while let Some(closer) = scan.stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Parse a model reply: the extracted span first, then exactly one retry
/// after repair.
pub fn parse_model_json(raw: &str) -> Result<Value, LlmError> {
    let candidate = extract_json_span(raw).unwrap_or_else(|| raw.trim());
    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!("Model output is not valid JSON ({}), attempting repair", first);
            serde_json::from_str(&repair_json(candidate)).map_err(|second| LlmError::Output {
                message: format!("could not parse model output as JSON: {}", second),
                raw: raw.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn span_skips_surrounding_prose() {
        let text = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nThanks";
        assert_eq!(extract_json_span(text), Some("{\"a\": [1, 2]}"));
    }

    #[test]
    fn span_ignores_brackets_inside_strings() {
        let text = r#"{"text": "a } tricky ] string"} trailing"#;
        assert_eq!(extract_json_span(text), Some(r#"{"text": "a } tricky ] string"}"#));
    }

    #[test]
    fn span_without_brackets_is_none() {
        assert_eq!(extract_json_span("no json here"), None);
    }

    #[test]
    fn trailing_comma_before_brace_is_repaired() {
        let raw = r#"{"users": [], "tree": {"id": "1", "speaker": "A", "text": "hi", "children": [],}}"#;
        let value = parse_model_json(raw).unwrap();
        assert_eq!(value["tree"]["id"], "1");
    }

    #[test]
    fn truncated_output_is_closed_in_nesting_order() {
        let raw = r#"{"users": [{"speaker": "A"}], "tree": {"id": "1", "children": [{"id": "2""#;
        let repaired = repair_json(raw);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["tree"]["children"][0]["id"], "2");
    }

    #[test]
    fn unterminated_string_is_closed() {
        let value = parse_model_json(r#"{"text": "cut off"#).unwrap();
        assert_eq!(value, json!({"text": "cut off"}));
    }

    #[test]
    fn hopeless_output_is_an_output_error() {
        let err = parse_model_json("{\"a\": nope}").unwrap_err();
        assert!(matches!(err, LlmError::Output { .. }));
        assert_eq!(err.kind(), "llm_output");
    }
}
