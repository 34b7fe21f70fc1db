//! Inbound payload decoding
//!
//! PLM payloads are loosely typed: ids arrive as strings or numbers, flags as
//! booleans or strings, optional objects as `null`. Decoders here never reject
//! a payload for a shape mismatch in a field we do not key on; the lenient
//! helpers below normalise what they can and drop the rest.

pub mod entities;
pub mod envelope;
pub mod flatten;
pub mod status;

pub use envelope::{EventData, EventEnvelope, EventType};
pub use flatten::CollectionKind;
pub use status::normalize_status;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Text of a scalar; empty strings, null and structured values give `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `obj[key].value`, the PLM's wrapper around every header field
pub fn field_value<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    obj.get(key)?.get("value").filter(|v| !v.is_null())
}

/// Decode `raw` into `T`, falling back to an empty shape on mismatch.
pub fn decode<T: DeserializeOwned + Default>(raw: &Value) -> T {
    match serde_json::from_value(raw.clone()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed {} payload, using empty shape: {}", std::any::type_name::<T>(), e);
            T::default()
        }
    }
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_text))
}

pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    })
}

/// Integers given as numbers or numeric strings
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn lenient_object<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

/// A list whose undecodable items are skipped; anything but an array is empty.
pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Skipping malformed list item: {}", e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// Like [`lenient_vec`] but keeps "absent" apart from "empty".
pub(crate) fn lenient_opt_vec<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("a")), Some("a".into()));
        assert_eq!(scalar_text(&json!("")), None);
        assert_eq!(scalar_text(&json!(12)), Some("12".into()));
        assert_eq!(scalar_text(&json!(false)), Some("false".into()));
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!({"a": 1})), None);
    }

    #[test]
    fn test_field_value_unwraps_plm_wrapper() {
        let after = json!({
            "brand_1": {"value": "GREYSON"},
            "status": {"value": null},
            "notes": "plain"
        });
        assert_eq!(field_value(&after, "brand_1"), Some(&json!("GREYSON")));
        assert_eq!(field_value(&after, "status"), None);
        assert_eq!(field_value(&after, "notes"), None);
        assert_eq!(field_value(&after, "missing"), None);
    }
}
