//! Tolerant JSON handling shared by the provider adapters.

use serde_json::{Deserializer, Value as JsonValue};

use crate::AdapterError;

const SNIPPET_CHARS: usize = 200;
/// Candidate `{`/`[` offsets tried before giving up on a junk-wrapped body.
const MAX_RECOVERY_STARTS: usize = 64;

/// Parses a provider response, recovering the first well-formed JSON value
/// when the body carries leading or trailing junk (HTML banners, debug
/// output, a second concatenated document).
pub fn parse_lenient_json(raw: &str) -> Result<JsonValue, AdapterError> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let starts = trimmed
        .char_indices()
        .filter(|(_, ch)| matches!(ch, '{' | '['))
        .map(|(start, _)| start)
        .take(MAX_RECOVERY_STARTS);
    for start in starts {
        let mut stream = Deserializer::from_str(&trimmed[start..]).into_iter::<JsonValue>();
        if let Some(Ok(value)) = stream.next() {
            return Ok(value);
        }
    }

    Err(AdapterError::UpstreamProtocol(format!(
        "non-JSON response, snippet: {}",
        snippet(trimmed)
    )))
}

/// Short single-line excerpt for diagnostics; never the whole body.
pub fn snippet(raw: &str) -> String {
    let mut out: String = raw.chars().take(SNIPPET_CHARS).collect();
    if raw.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    out.replace('\r', "\\r").replace('\n', "\\n")
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Non-negative count; accepts numbers and numeric strings, clamps to `u32`.
pub(crate) fn json_count(value: &JsonValue, path: &[&str]) -> Option<u32> {
    let raw = json_at(value, path)?;
    let n = match raw {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .or_else(|| n.as_i64().map(|_| 0))?,
        JsonValue::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    Some(u32::try_from(n).unwrap_or(u32::MAX))
}

pub(crate) fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Provider ids arrive as numbers or strings; both map to the same text form.
pub(crate) fn json_id(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Collects the items under `path`, flattening any nested lists.
pub(crate) fn flatten_items<'a>(value: &'a JsonValue, path: &[&str]) -> Vec<&'a JsonValue> {
    fn walk<'a>(value: &'a JsonValue, out: &mut Vec<&'a JsonValue>) {
        match value {
            JsonValue::Array(items) => items.iter().for_each(|item| walk(item, out)),
            JsonValue::Null => {}
            other => out.push(other),
        }
    }

    let mut out = Vec::new();
    if let Some(root) = json_at(value, path) {
        walk(root, &mut out);
    }
    out
}

/// Like [`flatten_items`], but the value under `path` must be a list. A
/// missing key or any other shape is a protocol error; `[]` is a valid
/// empty listing.
pub(crate) fn required_items<'a>(
    value: &'a JsonValue,
    path: &[&str],
    what: &str,
) -> Result<Vec<&'a JsonValue>, AdapterError> {
    match json_at(value, path) {
        Some(list @ JsonValue::Array(_)) => Ok(flatten_items(list, &[])),
        _ => Err(AdapterError::UpstreamProtocol(format!(
            "{what} has no `{}` list, snippet: {}",
            path.join("."),
            snippet(&value.to_string())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_parses_directly() {
        let value = parse_lenient_json("  {\"status\":\"0\"}\n").unwrap();
        assert_eq!(value, json!({"status": "0"}));
    }

    #[test]
    fn trailing_garbage_after_a_document_is_ignored() {
        let value = parse_lenient_json("{\"a\":1}<!-- served by node-7 -->").unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = parse_lenient_json("[1,2]{\"second\":true}").unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn leading_noise_before_the_document_is_skipped() {
        let value = parse_lenient_json("Warning: deprecated call\n{\"values\":[]}").unwrap();
        assert_eq!(value, json!({"values": []}));
    }

    #[test]
    fn unrecoverable_body_reports_a_short_snippet() {
        let body = format!("<html>\n<body>{}</body></html>", "x".repeat(1000));
        let err = parse_lenient_json(&body).unwrap_err();
        let AdapterError::UpstreamProtocol(message) = err else {
            panic!("expected protocol error");
        };
        assert!(message.contains("<html>\\n<body>"));
        assert!(message.len() < 300, "snippet too long: {}", message.len());
    }

    #[test]
    fn recovery_gives_up_after_a_bounded_number_of_starts() {
        let noise = "{ not json ".repeat(MAX_RECOVERY_STARTS);
        let err = parse_lenient_json(&format!("{noise}{{\"late\":true}}")).unwrap_err();
        assert!(matches!(err, AdapterError::UpstreamProtocol(_)));

        let noise = "{ not json ".repeat(MAX_RECOVERY_STARTS - 1);
        let value = parse_lenient_json(&format!("{noise}{{\"late\":true}}")).unwrap();
        assert_eq!(value, json!({"late": true}));
    }

    #[test]
    fn required_items_rejects_missing_or_non_list_values() {
        let listing = json!({"values": [{"id": 1}, [{"id": 2}]]});
        assert_eq!(required_items(&listing, &["values"], "listing").unwrap().len(), 2);
        assert!(required_items(&json!({"values": []}), &["values"], "listing")
            .unwrap()
            .is_empty());

        for body in [
            json!({"response_status": {"error_code": 403}}),
            json!({"values": null}),
            json!({"values": {"id": 1}}),
            json!([0]),
        ] {
            let err = required_items(&body, &["values"], "timepad listing").unwrap_err();
            let AdapterError::UpstreamProtocol(message) = err else {
                panic!("expected protocol error for {body}");
            };
            assert!(message.contains("timepad listing has no `values` list"), "{message}");
        }
    }

    #[test]
    fn nested_lists_are_flattened() {
        let value = json!({"result": [[{"id": 1}, {"id": 2}], {"id": 3}, null]});
        let ids: Vec<_> = flatten_items(&value, &["result"])
            .into_iter()
            .filter_map(|v| json_id(v, "id"))
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn counts_accept_numbers_and_numeric_strings() {
        let value = json!({"a": 5, "b": "12", "c": -3, "d": "n/a", "e": null});
        assert_eq!(json_count(&value, &["a"]), Some(5));
        assert_eq!(json_count(&value, &["b"]), Some(12));
        assert_eq!(json_count(&value, &["c"]), Some(0));
        assert_eq!(json_count(&value, &["d"]), None);
        assert_eq!(json_count(&value, &["e"]), None);
    }
}
