//! Best-effort JSON recovery from model output

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\}|\[.*?\])\s*```").expect("fenced json regex")
});

/// Pull the first JSON document out of free text
///
/// Tries, in order: the whole text, a fenced code block, and the widest
/// `{ ... }` span. Returns `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed)
        && (v.is_object() || v.is_array())
    {
        return Some(v);
    }

    if let Some(caps) = FENCED_JSON.captures(trimmed)
        && let Some(body) = caps.get(1)
        && let Ok(v) = serde_json::from_str::<Value>(body.as_str())
    {
        return Some(v);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Numeric view of a JSON value; numeric strings ("87", "87%") are accepted
pub fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn fenced_block_with_prose() {
        let text = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nThanks!";
        assert_eq!(extract_json(text), Some(json!({"summary": "ok"})));
    }

    #[test]
    fn embedded_object() {
        let text = "Result follows {\"confidence\": 80, \"issues\": []} end";
        assert_eq!(
            extract_json(text),
            Some(json!({"confidence": 80, "issues": []}))
        );
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
        assert_eq!(extract_json("{ not: json }"), None);
        assert_eq!(extract_json(""), None);
    }

    #[test]
    fn numbers_from_strings() {
        assert_eq!(number_value(&json!(42)), Some(42.0));
        assert_eq!(number_value(&json!("87%")), Some(87.0));
        assert_eq!(number_value(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(number_value(&json!(null)), None);
        assert_eq!(number_value(&json!("high")), None);
    }
}
