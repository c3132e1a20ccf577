//! Extraction of cache parameters from GET queries and POST bodies.

use serde_json::Value;
use tracing::debug;

use crate::fingerprint::Params;

/// Parameters of a GET request. A leading `?` is ignored.
pub fn query_params(query: &str) -> Params {
    Params::from_query(query.strip_prefix('?').unwrap_or(query))
}

/// Parameters of a POST request.
///
/// The body is decoded as UTF-8 (invalid sequences are replaced) and parsed
/// as JSON. A top-level object is flattened into string pairs, with arrays
/// joined by `,`. Anything else, including malformed JSON, yields no
/// parameters.
pub fn body_params(body: &[u8]) -> Params {
    if body.is_empty() {
        return Params::new();
    }

    let text = String::from_utf8_lossy(body);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map.into_iter().map(|(k, v)| (k, flatten(v))).collect(),
        Ok(other) => {
            debug!(kind = json_kind(&other), "JSON body is not an object, no cache parameters");
            Params::new()
        }
        Err(e) => {
            debug!(error = %e, "body is not JSON, no cache parameters");
            Params::new()
        }
    }
}

// Strings are taken verbatim and arrays are joined with `,` the way form
// encoders stringify them. Everything else uses its compact JSON text.
fn flatten(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => flatten(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
