//! Layered extraction of structured fields from free-form model output.
//!
//! Models rarely return clean JSON. [`extract`] tries, in order:
//!
//! 1. a direct JSON parse of the (fence-stripped) text,
//! 2. the first balanced `{...}` substring that parses as a JSON object,
//! 3. `LABEL: value` lines (`HEADLINE: "X"`, `SIGNIFICANCE_SCORE: 90`),
//! 4. the `"3 | 0.8"` category shorthand.
//!
//! Each layer is a pure function returning `Option<Fields>`. Callers always
//! supply their own default for `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

/// Extracted key/value pairs.
pub type Fields = Map<String, Value>;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[\s>*_#-]*([A-Za-z][A-Za-z0-9_ ]{0,40}?)[*_]*\s*:[ \t]*(\S.*?)\s*$").unwrap()
});

static PIPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d)\s*\|\s*([01](?:\.\d+)?|\.\d+)").unwrap());

/// Run every layer; first success wins.
pub fn extract(text: &str) -> Option<Fields> {
    let body = strip_code_fences(text);
    parse_direct(body)
        .or_else(|| parse_braced(body))
        .or_else(|| parse_braced(text))
        .or_else(|| parse_labeled(text))
        .or_else(|| parse_pipe_category(text))
}

/// Contents of the first markdown code fence, or the trimmed text.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Layer 1: the whole text is a JSON object.
pub fn parse_direct(text: &str) -> Option<Fields> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Index of the `}` closing the object opened at `start`, skipping braces
/// inside string literals.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
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
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Layer 2: the first balanced brace-delimited substring that is a JSON object.
pub fn parse_braced(text: &str) -> Option<Fields> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{')
        .find_map(|(start, _)| {
            let end = balanced_end(bytes, start)?;
            parse_direct(&text[start..=end])
        })
}

/// Strip surrounding quotes, brackets and trailing commas from a raw value.
fn clean_value(raw: &str) -> &str {
    raw.trim()
        .trim_end_matches(',')
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '[' | ']' | '<' | '>' | '(' | ')'))
        .trim()
}

/// Turn a cleaned scalar into the most specific JSON value.
fn scalar(value: &str) -> Value {
    if let Ok(n) = value.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Some(n) = value.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}

/// `"Significance Score"` → `"significance_score"`.
fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Layer 3: `LABEL: value` lines. The first occurrence of a label wins.
pub fn parse_labeled(text: &str) -> Option<Fields> {
    let mut fields = Fields::new();
    for caps in LABEL_RE.captures_iter(text) {
        let key = normalize_label(&caps[1]);
        let value = clean_value(&caps[2]);
        if key.is_empty() || value.is_empty() || fields.contains_key(&key) {
            continue;
        }
        fields.insert(key, scalar(value));
    }
    (!fields.is_empty()).then_some(fields)
}

/// Layer 4: `"<category> | <confidence>"`.
pub fn parse_pipe_category(text: &str) -> Option<Fields> {
    let caps = PIPE_RE.captures(text)?;
    let category_id: i64 = caps[1].parse().ok()?;
    let confidence: f64 = caps[2].parse().ok()?;
    let mut fields = Fields::new();
    fields.insert("category_id".into(), Value::Number(category_id.into()));
    fields.insert("confidence".into(), scalar(&confidence.to_string()));
    Some(fields)
}

/// Find a single labeled value such as `selected_image_url: "https://..."`,
/// tolerating JSON-ish quoting and brackets.
pub fn labeled_field(text: &str, label: &str) -> Option<String> {
    let pattern = format!(
        r#"(?i)["']?{}["']?\s*[:=]\s*["'\[<(]*([^"'\]>)\s,]+)"#,
        regex::escape(label)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    let value = clean_value(&caps[1]);
    (!value.is_empty()).then(|| value.to_string())
}

/// Non-empty string value; numbers are stringified.
pub fn field_str(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer value; accepts floats (rounded) and numeric strings.
pub fn field_i64(fields: &Fields, key: &str) -> Option<i64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = clean_value(s);
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Float value; accepts numeric strings.
pub fn field_f64(fields: &Fields, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => clean_value(s).parse().ok(),
        _ => None,
    }
}

/// Boolean value; accepts `"true"`/`"yes"`/`"false"`/`"no"` and 0/1.
pub fn field_bool(fields: &Fields, key: &str) -> Option<bool> {
    match fields.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match clean_value(s).to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-negative integers from an array, or from a comma separated string.
pub fn field_index_list(fields: &Fields, key: &str) -> Vec<usize> {
    match fields.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64().map(|n| n as usize),
                Value::String(s) => clean_value(s).parse().ok(),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .filter_map(|part| clean_value(part).parse().ok())
            .collect(),
        Some(Value::Number(n)) => n.as_u64().map(|n| vec![n as usize]).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_lines_with_prose_and_fences() {
        let plain = "HEADLINE: \"X\"\nSUMMARY: Y.\nSIGNIFICANCE_SCORE: 90";
        let wrapped = format!("Sure! Here's the result.\n\n```\n{plain}\n```\nHope this helps!");
        for text in [plain.to_string(), wrapped] {
            let fields = extract(&text).unwrap();
            assert_eq!(fields["headline"], "X");
            assert_eq!(fields["summary"], "Y.");
            assert_eq!(fields["significance_score"], 90);
        }
    }

    #[test]
    fn test_direct_json() {
        let fields = extract(r#"{"category_id": 3, "confidence": 0.9}"#).unwrap();
        assert_eq!(field_i64(&fields, "category_id"), Some(3));
        assert_eq!(field_f64(&fields, "confidence"), Some(0.9));
    }

    #[test]
    fn test_json_in_fence() {
        let text = "```json\n{\"headline\": \"Big news\", \"significance_score\": 77}\n```";
        let fields = extract(text).unwrap();
        assert_eq!(field_str(&fields, "headline").as_deref(), Some("Big news"));
        assert_eq!(field_i64(&fields, "significance_score"), Some(77));
    }

    #[test]
    fn test_json_wrapped_in_prose() {
        let text = "I think {this} is it: {\"main_lead_index\": 2, \"note\": \"a } brace\"} ok?";
        let fields = extract(text).unwrap();
        assert_eq!(field_i64(&fields, "main_lead_index"), Some(2));
        assert_eq!(field_str(&fields, "note").as_deref(), Some("a } brace"));
    }

    #[test]
    fn test_nested_objects_are_balanced() {
        let text = "Result: {\"outer\": {\"inner\": 1}, \"ok\": true} trailing";
        let fields = parse_braced(text).unwrap();
        assert_eq!(fields["outer"]["inner"], 1);
        assert_eq!(field_bool(&fields, "ok"), Some(true));
    }

    #[test]
    fn test_pipe_shorthand() {
        let fields = extract("3 | 0.8").unwrap();
        assert_eq!(field_i64(&fields, "category_id"), Some(3));
        assert_eq!(field_f64(&fields, "confidence"), Some(0.8));
        assert!(parse_pipe_category("no digits here").is_none());
    }

    #[test]
    fn test_nothing_to_extract() {
        assert!(extract("").is_none());
        assert!(extract("I cannot help with that request.").is_none());
        assert!(extract("{not json at all").is_none());
    }

    #[test]
    fn test_labeled_field_permissive() {
        let text = r#"... "selected_image_url": "https://cdn.example.com/a.png", "image_layout": "WIDE" ..."#;
        assert_eq!(
            labeled_field(text, "selected_image_url").as_deref(),
            Some("https://cdn.example.com/a.png")
        );
        assert_eq!(
            labeled_field("SELECTED_IMAGE_URL: [https://x.io/b.jpg]", "selected_image_url")
                .as_deref(),
            Some("https://x.io/b.jpg")
        );
        assert_eq!(labeled_field("nothing", "selected_image_url"), None);
    }

    #[test]
    fn test_labeled_normalizes_keys_and_types() {
        let fields =
            parse_labeled("**Significance Score**: 42\nWorth Showing Image: true\nConfidence: 0.75")
                .unwrap();
        assert_eq!(fields["significance_score"], 42);
        assert_eq!(fields["worth_showing_image"], true);
        assert_eq!(field_f64(&fields, "confidence"), Some(0.75));
    }

    #[test]
    fn test_first_label_wins() {
        let fields = parse_labeled("HEADLINE: one\nHEADLINE: two").unwrap();
        assert_eq!(fields["headline"], "one");
    }

    #[test]
    fn test_typed_accessors_tolerate_strings() {
        let fields = parse_direct(
            r#"{"score": "90", "conf": "0.5", "flag": "yes", "idx": ["1", 2, "x"], "csv": "3, 4"}"#,
        )
        .unwrap();
        assert_eq!(field_i64(&fields, "score"), Some(90));
        assert_eq!(field_f64(&fields, "conf"), Some(0.5));
        assert_eq!(field_bool(&fields, "flag"), Some(true));
        assert_eq!(field_index_list(&fields, "idx"), vec![1, 2]);
        assert_eq!(field_index_list(&fields, "csv"), vec![3, 4]);
        assert_eq!(field_index_list(&fields, "missing"), Vec::<usize>::new());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }
}
