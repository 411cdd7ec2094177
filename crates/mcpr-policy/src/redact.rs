//! Field-level redaction by dot-notation paths.
//!
//! Paths are parsed into segment lists up front; redaction is one
//! recursive walk over a cloned value. Missing paths are skipped, and
//! applying the same paths twice is a no-op (the replacement text is
//! itself a leaf).

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Clone `data` and replace every leaf addressed by `paths` with the
/// literal `"[REDACTED]"`.
pub fn apply_redactions(data: &Value, paths: &[String]) -> Value {
    let parsed: Vec<Vec<&str>> = paths
        .iter()
        .map(|path| path.split('.').filter(|s| !s.is_empty()).collect())
        .filter(|segments: &Vec<&str>| !segments.is_empty())
        .collect();

    let mut cloned = data.clone();
    for segments in &parsed {
        redact_path(&mut cloned, segments);
    }
    cloned
}

fn redact_path(value: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get_mut(*head) {
                if rest.is_empty() {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    redact_path(child, rest);
                }
            }
        }
        // A path meeting an array applies to every element.
        Value::Array(items) => {
            for item in items {
                redact_path(item, segments);
            }
        }
        _ => {}
    }
}
