//! Masterdata choice lists into `config.app_config`

use crate::payload::{decode, lenient_bool, lenient_opt_vec, lenient_string};
use crate::plm::PlmClient;
use crate::store::{Row, Store};
use crate::tables::APP_CONFIG;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MasterdataResponse {
    properties: ChoiceProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ChoiceProperties {
    #[serde(deserialize_with = "lenient_opt_vec")]
    choices_designer: Option<Vec<Choice>>,
    #[serde(deserialize_with = "lenient_opt_vec")]
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Choice {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    value: Option<String>,
    allowed_for: Option<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    active: Option<bool>,
}

impl ChoiceProperties {
    /// Designer choices win; an empty designer list falls back to `Choices`.
    fn into_choices(self) -> Vec<Choice> {
        match self.choices_designer {
            Some(designer) if !designer.is_empty() => designer,
            _ => self.choices.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FieldResult {
    pub synced: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MasterdataReport {
    pub status: &'static str,
    pub timestamp: String,
    pub results: BTreeMap<String, FieldResult>,
}

#[derive(Clone)]
pub struct MasterdataSync {
    store: Arc<dyn Store>,
    plm: Arc<dyn PlmClient>,
    fields: Vec<String>,
}

impl MasterdataSync {
    pub fn new(store: Arc<dyn Store>, plm: Arc<dyn PlmClient>, fields: Vec<String>) -> Self {
        Self { store, plm, fields }
    }

    /// Sync every configured field; one field's failure never stops the rest.
    pub async fn sync_all(&self) -> MasterdataReport {
        info!("Starting masterdata sync for {} fields", self.fields.len());
        let mut results = BTreeMap::new();
        for field in &self.fields {
            let result = self.sync_field(field).await;
            info!("Synced {} values for {}", result.synced, field);
            results.insert(field.clone(), result);
        }

        MasterdataReport {
            status: "success",
            timestamp: Utc::now().to_rfc3339(),
            results,
        }
    }

    async fn sync_field(&self, field: &str) -> FieldResult {
        let body = match self.plm.fetch_masterdata(field).await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to fetch masterdata for {}: {}", field, e);
                return FieldResult {
                    synced: 0,
                    errors: vec![e.to_string()],
                };
            }
        };

        let response: MasterdataResponse = decode(&body);
        let synced_at = Utc::now().to_rfc3339();
        let rows: Vec<Row> = response
            .properties
            .into_choices()
            .into_iter()
            .filter_map(|choice| choice_row(field, choice, &synced_at))
            .collect();
        if rows.is_empty() {
            return FieldResult::default();
        }

        match self.store.upsert(&APP_CONFIG, &rows, &["category", "key"]).await {
            Ok(_) => FieldResult {
                synced: rows.len(),
                errors: Vec::new(),
            },
            Err(e) => {
                error!("Batch upsert for {} failed: {}", field, e);
                FieldResult {
                    synced: 0,
                    errors: vec![format!("Batch upsert failed: {e}")],
                }
            }
        }
    }
}

/// `None` for a choice with neither value nor code
fn choice_row(field: &str, choice: Choice, synced_at: &str) -> Option<Row> {
    if choice.value.is_none() && choice.code.is_none() {
        return None;
    }
    let key = choice.code.or(choice.id)?;
    let value = json!({
        "category": field,
        "key": key,
        "value": choice.value.unwrap_or_default(),
        "is_active": choice.active.unwrap_or(true),
        "allowed_for": choice.allowed_for.filter(|v| !v.is_null()),
        "last_synced_at": synced_at,
        "updated_at": synced_at,
        "config_type": "enum",
        "data_type": "text",
    });
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testing::FakePlm;
    use pretty_assertions::assert_eq;

    fn sync(plm: FakePlm, fields: &[&str]) -> (Arc<MemoryStore>, MasterdataSync) {
        let store = Arc::new(MemoryStore::new());
        let sync = MasterdataSync::new(
            store.clone(),
            Arc::new(plm),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        (store, sync)
    }

    #[tokio::test]
    async fn test_designer_choices_win_and_blank_choices_are_skipped() {
        let plm = FakePlm::default().with_masterdata(
            "gender",
            json!({"fieldId": "gender", "properties": {
                "ChoicesDesigner": [
                    {"id": "1", "code": "M", "value": "Mens", "allowedFor": ["apparel"]},
                    {"id": "2", "code": null, "value": "Womens", "active": false},
                    {"id": "3", "code": null, "value": null}
                ],
                "Choices": [{"id": "9", "code": "X", "value": "Ignored"}]
            }}),
        );
        let (store, sync) = sync(plm, &["gender"]);
        let report = sync.sync_all().await;

        assert_eq!(report.status, "success");
        assert_eq!(report.results["gender"].synced, 2);

        let rows = store.rows(&APP_CONFIG);
        assert_eq!(rows.len(), 2);
        let mens = rows.iter().find(|r| r["key"] == json!("M")).unwrap();
        assert_eq!(mens["value"], json!("Mens"));
        assert_eq!(mens["is_active"], json!(true));
        assert_eq!(mens["allowed_for"], json!(["apparel"]));
        assert_eq!(mens["config_type"], json!("enum"));
        let womens = rows.iter().find(|r| r["key"] == json!("2")).unwrap();
        assert_eq!(womens["is_active"], json!(false));
        assert_eq!(womens["allowed_for"], Value::Null);
    }

    #[tokio::test]
    async fn test_resync_updates_in_place() {
        let plm = FakePlm::default().with_masterdata(
            "season",
            json!({"properties": {"Choices": [{"id": "1", "code": "FW25", "value": "Fall 25"}]}}),
        );
        let (store, sync) = sync(plm, &["season"]);
        store.seed(
            &APP_CONFIG,
            vec![json!({"category": "season", "key": "FW25", "value": "Old"})],
        );

        sync.sync_all().await;

        let rows = store.rows(&APP_CONFIG);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], json!("Fall 25"));
    }

    #[tokio::test]
    async fn test_one_field_failure_does_not_stop_others() {
        let plm = FakePlm::default().with_masterdata(
            "year",
            json!({"properties": {"Choices": [{"id": "1", "value": "2025"}]}}),
        );
        let (store, sync) = sync(plm, &["delivery", "year"]);
        let report = sync.sync_all().await;

        assert_eq!(report.results["delivery"].synced, 0);
        assert_eq!(report.results["delivery"].errors.len(), 1);
        assert_eq!(
            report.results["year"],
            FieldResult {
                synced: 1,
                errors: vec![]
            }
        );
        assert_eq!(store.rows(&APP_CONFIG)[0]["key"], json!("1"));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_per_field() {
        let plm = FakePlm::default().with_masterdata(
            "status",
            json!({"properties": {"Choices": [{"id": "1", "code": "A", "value": "Active"}]}}),
        );
        let (store, sync) = sync(plm, &["status"]);
        store.fail_table(&APP_CONFIG);

        let report = sync.sync_all().await;
        let result = &report.results["status"];
        assert_eq!(result.synced, 0);
        assert!(result.errors[0].starts_with("Batch upsert failed"));
    }
}
