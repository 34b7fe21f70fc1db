//! Append-only sync audit log

use crate::store::{Row, Store, TableRef};
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SYNC_LOG: TableRef = TableRef::new("ops", "sync_log");

/// One audit record
#[derive(Debug, Clone)]
pub struct SyncLogEntry<'a> {
    pub entity_type: &'a str,
    pub entity_id: Option<&'a str>,
    pub action: &'a str,
    pub payload: &'a Value,
    pub error: Option<String>,
}

/// Writes one row per inbound event, success or failure
#[derive(Clone)]
pub struct SyncLog {
    store: Arc<dyn Store>,
}

impl SyncLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record an event. A failed write is logged, never propagated.
    pub async fn record(&self, entry: SyncLogEntry<'_>) {
        let row = to_row(&entry);
        match self.store.insert(&SYNC_LOG, &[row]).await {
            Ok(_) => debug!(
                "Logged {} {} for {}",
                entry.entity_type,
                entry.action,
                entry.entity_id.unwrap_or("-")
            ),
            Err(e) => warn!(
                "Failed to write sync log for {} {}: {}",
                entry.entity_type, entry.action, e
            ),
        }
    }

    /// Record a body whose envelope could not be read
    pub async fn record_unreadable(&self, entity_type: &str, raw: &Value, error: String) {
        let action = raw.get("eventType").and_then(Value::as_str).unwrap_or("Unknown");
        self.record(SyncLogEntry {
            entity_type,
            entity_id: None,
            action,
            payload: raw,
            error: Some(error),
        })
        .await
    }
}

/// Hex SHA-256 of the payload's canonical JSON text
pub fn payload_digest(payload: &Value) -> String {
    format!("{:x}", Sha256::digest(payload.to_string().as_bytes()))
}

fn to_row(entry: &SyncLogEntry<'_>) -> Row {
    let status = if entry.error.is_some() { "error" } else { "ok" };
    let value = json!({
        "id": Uuid::new_v4().to_string(),
        "entity_type": entry.entity_type,
        "entity_id": entry.entity_id,
        "action": entry.action,
        "payload": entry.payload,
        "payload_sha256": payload_digest(entry.payload),
        "status": status,
        "error": entry.error,
        "created_at": Utc::now().to_rfc3339(),
    });
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_records_success_and_failure() {
        let store = Arc::new(MemoryStore::new());
        let log = SyncLog::new(store.clone());
        let payload = json!({"eventType": "OnCreate", "headerId": "m1"});

        log.record(SyncLogEntry {
            entity_type: "material",
            entity_id: Some("m1"),
            action: "OnCreate",
            payload: &payload,
            error: None,
        })
        .await;
        log.record(SyncLogEntry {
            entity_type: "material",
            entity_id: Some("m1"),
            action: "OnCreate",
            payload: &payload,
            error: Some("boom".into()),
        })
        .await;

        let rows = store.rows(&SYNC_LOG);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["status"], json!("ok"));
        assert_eq!(rows[1]["status"], json!("error"));
        assert_eq!(rows[0]["payload_sha256"], rows[1]["payload_sha256"]);
        assert_eq!(rows[0]["payload_sha256"].as_str().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.fail_table(&SYNC_LOG);
        let log = SyncLog::new(store.clone());
        log.record(SyncLogEntry {
            entity_type: "tracking",
            entity_id: None,
            action: "OnDelete",
            payload: &Value::Null,
            error: None,
        })
        .await;
        assert!(store.rows(&SYNC_LOG).is_empty());
    }
}
