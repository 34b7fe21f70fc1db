//! Change-event envelope

use super::lenient_string;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// PLM event kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum EventType {
    OnCreate,
    OnChange,
    OnCopy,
    OnDelete,
    #[default]
    #[serde(other)]
    Unsupported,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OnCreate => "OnCreate",
            EventType::OnChange => "OnChange",
            EventType::OnCopy => "OnCopy",
            EventType::OnDelete => "OnDelete",
            EventType::Unsupported => "Unsupported",
        }
    }

    /// Events that carry an `after` snapshot to upsert
    pub fn is_upsert(&self) -> bool {
        matches!(self, EventType::OnCreate | EventType::OnChange | EventType::OnCopy)
    }
}

/// `{eventType, headerId, headerNumber, headerName, folderId, folderName, data}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventEnvelope {
    pub event_type: EventType,
    #[serde(deserialize_with = "lenient_string")]
    pub header_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub header_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub header_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub folder_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub folder_name: Option<String>,
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventData {
    pub before: Option<Value>,
    pub after: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub plan_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub plan_folder_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventEnvelope {
    /// Decode an envelope; only a non-object body is rejected.
    pub fn from_value(raw: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw.clone())
    }

    /// `data.before.<key>` as a list, `None` when the snapshot or key is absent
    pub fn before_list(&self, key: &str) -> Option<Vec<Value>> {
        list_at(self.data.before.as_ref()?, key)
    }

    /// `data.after.<key>` as a list, `None` when the snapshot or key is absent
    pub fn after_list(&self, key: &str) -> Option<Vec<Value>> {
        list_at(self.data.after.as_ref()?, key)
    }
}

/// A missing or null key is `None`; a lone scalar or object is a one-item list.
fn list_at(snapshot: &Value, key: &str) -> Option<Vec<Value>> {
    match snapshot.get(key)? {
        Value::Null => None,
        Value::Array(items) => Some(items.clone()),
        single => Some(vec![single.clone()]),
    }
}
