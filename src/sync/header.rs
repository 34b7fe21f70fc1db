//! Material and style header sync
//!
//! Both headers follow the same flow and differ only in their descriptor:
//! which `after.<field>.value` entries become fixed columns, which images are
//! split into preview/url pairs, and which child collections hang off them.

use super::log::{SyncLog, SyncLogEntry};
use super::reconcile::{CollectionReconciler, CollectionTarget, ReconcileOutcome};
use crate::error::{not_found_error, validation_error, AppError};
use crate::payload::{field_value, scalar_text, CollectionKind, EventEnvelope, EventType};
use crate::schema::SchemaEvolver;
use crate::store::{Filter, Row, Store, TableRef};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A child collection of a header
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    /// Key under `data.after` / `data.before`
    pub source: &'static str,
    pub table: TableRef,
    pub kind: CollectionKind,
}

/// Everything that differs between header entity types
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity_type: &'static str,
    pub table: TableRef,
    pub id_column: &'static str,
    /// Foreign key column on child tables
    pub parent_column: &'static str,
    /// `(column, sources)`: first `after.<source>.value` present wins
    pub fields: &'static [(&'static str, &'static [&'static str])],
    /// `(column prefix, after key)` -> `<prefix>_preview`, `<prefix>_url`
    pub images: &'static [(&'static str, &'static str)],
    pub deleted_source: &'static str,
    pub collections: &'static [CollectionSpec],
    /// Absent collection in `after`: skip it (true) or treat it as empty (false)
    pub skip_absent_collections: bool,
}

pub const MATERIAL: EntityDescriptor = EntityDescriptor {
    entity_type: "material",
    table: TableRef::new("pim", "material"),
    id_column: "beproduct_material_id",
    parent_column: "material_id",
    fields: &[
        ("brand", &["brand_1"]),
        ("material_type", &["material_type"]),
        ("fabric_group", &["fabric_group"]),
        ("fabric_name_cn", &["fabric_name_cn"]),
        ("status", &["status"]),
        ("season_year", &["season_year"]),
        ("composition", &["composition"]),
        ("back_content", &["back_content"]),
        ("care_instructions", &["care_instructions"]),
        ("properties_fabric", &["properties_fabric"]),
        ("supplier", &["supplier"]),
        ("supplier_code", &["supplier_code"]),
        ("material_reference_code", &["material_reference_code"]),
        ("lead_time", &["lead_time", "leadtime"]),
        ("material_width", &["material_width"]),
        ("material_full_width", &["material_full_width"]),
        ("material_weight", &["material_weight"]),
        ("unit_of_measure_base", &["unit_of_measure_base"]),
        ("material_purchase_price", &["material_purchase_price"]),
        ("currency_lookup", &["currency_lookup"]),
        ("unit_of_measure_purchase_price", &["unit_of_measure_purchase_price"]),
        ("costing_price_usd", &["costing_price_usd"]),
        ("material_yield", &["material_yield"]),
        ("material_moq", &["material_moq"]),
        ("material_mcq", &["material_mcq"]),
        ("surcharge_moq", &["surcharge_moq"]),
        ("surcharge_mcq", &["surcharge_mcq"]),
        ("core_3d_material", &["core_3d_material"]),
        ("notes", &["notes"]),
    ],
    images: &[("main_image", "mainImage"), ("detail_image", "detailImage")],
    deleted_source: "isDeleted",
    collections: &[
        CollectionSpec {
            source: "colorways",
            table: TableRef::new("pim", "material_colorway"),
            kind: CollectionKind::MaterialColorway,
        },
        CollectionSpec {
            source: "sizeRange",
            table: TableRef::new("pim", "material_size_range"),
            kind: CollectionKind::MaterialSizeRange,
        },
        CollectionSpec {
            source: "suppliers",
            table: TableRef::new("pim", "material_supplier"),
            kind: CollectionKind::MaterialSupplier,
        },
        CollectionSpec {
            source: "tags",
            table: TableRef::new("pim", "material_tag"),
            kind: CollectionKind::MaterialTag,
        },
        CollectionSpec {
            source: "planIds",
            table: TableRef::new("pim", "material_plan_link"),
            kind: CollectionKind::MaterialPlanLink,
        },
    ],
    skip_absent_collections: false,
};

pub const STYLE: EntityDescriptor = EntityDescriptor {
    entity_type: "style",
    table: TableRef::new("pim", "style"),
    id_column: "beproduct_style_id",
    parent_column: "style_id",
    fields: &[
        ("version", &["version"]),
        ("brand", &["brand_1"]),
        ("product_type", &["product_type"]),
        ("product_category", &["product_category"]),
        ("delivery", &["delivery"]),
        ("gender", &["gender"]),
        ("season", &["season"]),
        ("year", &["year"]),
        ("season_year", &["season_year"]),
        ("fabric_group", &["fabric_group"]),
        ("classification", &["classification"]),
        ("status", &["status"]),
        ("account_manager", &["account_manager"]),
        ("senior_product_developer", &["senior_product_developer"]),
        ("core_size_range", &["core_size_range"]),
        ("core_main_material", &["core_main_material"]),
    ],
    images: &[("front_image", "frontImage")],
    deleted_source: "deleted",
    collections: &[
        CollectionSpec {
            source: "colorways",
            table: TableRef::new("pim", "style_colorway"),
            kind: CollectionKind::StyleColorway,
        },
        CollectionSpec {
            source: "sizeClasses",
            table: TableRef::new("pim", "style_size_class"),
            kind: CollectionKind::StyleSizeClass,
        },
    ],
    skip_absent_collections: true,
};

/// Result of one header event
#[derive(Debug, Default, Serialize)]
pub struct HeaderOutcome {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub collections: BTreeMap<&'static str, ReconcileOutcome>,
    pub errors: Vec<String>,
}

impl HeaderOutcome {
    fn ignored(reason: &'static str) -> Self {
        Self {
            action: "ignored",
            reason: Some(reason),
            ..Default::default()
        }
    }
}

/// Handles material and style header events
#[derive(Clone)]
pub struct HeaderSync {
    store: Arc<dyn Store>,
    evolver: SchemaEvolver,
    reconciler: CollectionReconciler,
    log: SyncLog,
}

impl HeaderSync {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            evolver: SchemaEvolver::new(store.clone()),
            reconciler: CollectionReconciler::new(store.clone()),
            log: SyncLog::new(store.clone()),
            store,
        }
    }

    /// Process one event and record it in the sync log, success or failure.
    pub async fn handle_event(
        &self,
        descriptor: &EntityDescriptor,
        raw: &Value,
    ) -> Result<HeaderOutcome, AppError> {
        let envelope = match EventEnvelope::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = validation_error(format!("Invalid event envelope: {e}"));
                self.log.record_unreadable(descriptor.entity_type, raw, err.to_string()).await;
                return Err(err);
            }
        };

        let result = self.process(descriptor, &envelope, raw).await;

        self.log
            .record(SyncLogEntry {
                entity_type: descriptor.entity_type,
                entity_id: envelope.header_id.as_deref(),
                action: envelope.event_type.as_str(),
                payload: raw,
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;
        result
    }

    async fn process(
        &self,
        descriptor: &EntityDescriptor,
        envelope: &EventEnvelope,
        raw: &Value,
    ) -> Result<HeaderOutcome, AppError> {
        match envelope.event_type {
            EventType::OnDelete => self.soft_delete(descriptor, envelope, raw).await,
            t if t.is_upsert() => match &envelope.data.after {
                Some(after) => self.upsert(descriptor, envelope, after).await,
                None => {
                    warn!("{} {} without after data, ignoring", descriptor.entity_type, t.as_str());
                    Ok(HeaderOutcome::ignored("No after data"))
                }
            },
            _ => Ok(HeaderOutcome::ignored("Unsupported eventType")),
        }
    }

    async fn soft_delete(
        &self,
        descriptor: &EntityDescriptor,
        envelope: &EventEnvelope,
        raw: &Value,
    ) -> Result<HeaderOutcome, AppError> {
        let header_id = envelope
            .header_id
            .as_deref()
            .ok_or_else(|| validation_error("Missing headerId for deletion"))?;
        let by_external_id = [Filter::eq(descriptor.id_column, header_id)];

        let existing = self.store.select(&descriptor.table, &by_external_id).await?;
        let row_id = existing
            .first()
            .and_then(|r| r.get("id"))
            .cloned()
            .ok_or_else(|| not_found_error(format!("{} {} not found", descriptor.entity_type, header_id)))?;

        let mut values = Row::new();
        values.insert("deleted".into(), Value::Bool(true));
        values.insert("raw_beproduct_data".into(), raw.clone());
        values.insert("beproduct_modified_at".into(), json!(Utc::now().to_rfc3339()));
        self.store.update(&descriptor.table, &values, &by_external_id).await?;
        info!("{} soft-deleted: {}", descriptor.entity_type, header_id);

        let mut outcome = HeaderOutcome {
            action: "deleted",
            entity_id: Some(header_id.to_string()),
            row_id: scalar_text(&row_id),
            ..Default::default()
        };

        let mut flag = Row::new();
        flag.insert("deleted".into(), Value::Bool(true));
        for spec in descriptor.collections {
            self.evolver.ensure_columns(&spec.table, &flag).await;
            let owned = [Filter::Eq(descriptor.parent_column.to_string(), row_id.clone())];
            match self.store.update(&spec.table, &flag, &owned).await {
                Ok(n) => info!("Soft-deleted {} rows in {}", n, spec.table),
                Err(e) => {
                    error!("Cascade delete failed for {}: {}", spec.table, e);
                    outcome.errors.push(format!("{}: {}", spec.table, e));
                }
            }
        }
        Ok(outcome)
    }

    async fn upsert(
        &self,
        descriptor: &EntityDescriptor,
        envelope: &EventEnvelope,
        after: &Value,
    ) -> Result<HeaderOutcome, AppError> {
        let header_id = envelope
            .header_id
            .clone()
            .ok_or_else(|| validation_error("Missing headerId"))?;
        let header = header_row(descriptor, envelope, after)?;

        let evolved = self.evolver.ensure_columns(&descriptor.table, &header).await;
        info!("Upserting {} with {} fields", descriptor.entity_type, evolved.fields.len());
        let stored = self
            .store
            .upsert(&descriptor.table, &[evolved.fields], &[descriptor.id_column])
            .await?;
        let row_id = stored
            .first()
            .and_then(|r| r.get("id"))
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                AppError::Internal(format!("{} row id not found after upsert", descriptor.entity_type))
            })?;

        let mut outcome = HeaderOutcome {
            action: "upserted",
            entity_id: Some(header_id),
            row_id: scalar_text(&row_id),
            ..Default::default()
        };

        for spec in descriptor.collections {
            let current = match envelope.after_list(spec.source) {
                Some(items) => items,
                None if descriptor.skip_absent_collections => continue,
                None => Vec::new(),
            };
            let previous = envelope
                .before_list(spec.source)
                .map(|items| spec.kind.flatten_all(&items, descriptor.parent_column, &row_id));
            let target = CollectionTarget {
                table: spec.table,
                parent_column: descriptor.parent_column,
                key_column: spec.kind.unique_key(),
                kept_columns: &[],
            };
            let rows = spec.kind.flatten_all(&current, descriptor.parent_column, &row_id);
            info!("Found {} {} in payload", rows.len(), spec.source);

            match self.reconciler.reconcile(&target, &row_id, rows, previous.as_deref()).await {
                Ok(result) => {
                    outcome.collections.insert(spec.source, result);
                }
                Err(e) => {
                    error!("Partial sync failure on {}: {}", spec.table, e);
                    outcome.errors.push(format!("{}: {}", spec.table, e));
                }
            }
        }

        Ok(outcome)
    }
}

/// Build the header row; null values are dropped.
fn header_row(
    descriptor: &EntityDescriptor,
    envelope: &EventEnvelope,
    after: &Value,
) -> Result<Row, AppError> {
    let header_number = field_value(after, "header_number")
        .cloned()
        .or_else(|| envelope.header_number.clone().map(Value::String));
    let header_name = field_value(after, "header_name")
        .cloned()
        .or_else(|| envelope.header_name.clone().map(Value::String));
    let (Some(header_number), Some(header_name)) = (header_number, header_name) else {
        return Err(validation_error("Missing required fields: header_number or header_name"));
    };

    let mut row = Row::new();
    row.insert(descriptor.id_column.into(), json!(envelope.header_id));
    row.insert("header_number".into(), header_number);
    row.insert("header_name".into(), header_name);
    row.insert("beproduct_folder_id".into(), json!(envelope.folder_id));
    row.insert("folder_name".into(), json!(envelope.folder_name));

    for (column, sources) in descriptor.fields {
        let value = sources.iter().find_map(|s| field_value(after, s)).cloned();
        row.insert((*column).into(), value.unwrap_or(Value::Null));
    }
    for (prefix, source) in descriptor.images {
        let image = after.get(*source);
        row.insert(format!("{prefix}_preview"), image.and_then(|i| i.get("preview")).cloned().unwrap_or(Value::Null));
        row.insert(format!("{prefix}_url"), image.and_then(|i| i.get("origin")).cloned().unwrap_or(Value::Null));
    }

    let user = |object: &str, field: &str| {
        after
            .get(object)
            .and_then(|u| u.get("name"))
            .filter(|v| !v.is_null())
            .or_else(|| field_value(after, field))
            .cloned()
            .unwrap_or(Value::Null)
    };
    row.insert("created_by".into(), user("createdBy", "created_by"));
    row.insert("modified_by".into(), user("modifiedBy", "modified_by"));
    row.insert("beproduct_created_at".into(), after.get("createdAt").cloned().unwrap_or(Value::Null));
    row.insert("beproduct_modified_at".into(), after.get("modifiedAt").cloned().unwrap_or(Value::Null));
    row.insert(
        "deleted".into(),
        after
            .get(descriptor.deleted_source)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Bool(false)),
    );
    row.insert("raw_beproduct_data".into(), after.clone());

    row.retain(|_, v| !v.is_null());
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::sync::log::SYNC_LOG;
    use pretty_assertions::assert_eq;

    const COLORWAYS: TableRef = TableRef::new("pim", "material_colorway");

    fn colorway(id: &str, name: &str) -> Value {
        json!({"id": id, "colorName": name, "colorNumber": format!("{id}-N"), "primaryColor": "#000000"})
    }

    fn material_event(event: &str, before: Option<Value>, after: Option<Value>) -> Value {
        json!({
            "eventType": event,
            "headerId": "M-100",
            "headerNumber": "MAT-100",
            "headerName": "Stretch Twill",
            "folderId": "fold-1",
            "folderName": "Fabrics",
            "data": {"before": before, "after": after}
        })
    }

    fn colorway_keys(store: &MemoryStore) -> Vec<String> {
        let mut keys: Vec<String> = store
            .rows(&COLORWAYS)
            .iter()
            .filter_map(|r| r.get("colorway_id").and_then(scalar_text))
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_material_create_then_change_reconciles_colorways() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());

        let create = material_event(
            "OnCreate",
            None,
            Some(json!({
                "brand_1": {"value": "GREYSON"},
                "lead_time": {"value": null},
                "leadtime": {"value": 30},
                "mainImage": {"preview": "p.png", "origin": "o.png"},
                "createdBy": {"name": "Ann"},
                "colorways": [colorway("A", "Navy"), colorway("B", "Black")]
            })),
        );
        let outcome = sync.handle_event(&MATERIAL, &create).await.unwrap();
        assert_eq!(outcome.action, "upserted");
        assert_eq!(colorway_keys(&store), vec!["A", "B"]);

        let header = &store.rows(&MATERIAL.table)[0];
        assert_eq!(header["brand"], json!("GREYSON"));
        assert_eq!(header["lead_time"], json!(30));
        assert_eq!(header["main_image_url"], json!("o.png"));
        assert_eq!(header["created_by"], json!("Ann"));
        assert_eq!(header["deleted"], json!(false));
        assert!(!header.contains_key("status"));

        let change = material_event(
            "OnChange",
            Some(json!({"colorways": [colorway("A", "Navy"), colorway("B", "Black")]})),
            Some(json!({"colorways": [colorway("B", "Jet Black"), colorway("C", "White")]})),
        );
        let outcome = sync.handle_event(&MATERIAL, &change).await.unwrap();

        assert_eq!(colorway_keys(&store), vec!["B", "C"]);
        assert_eq!(outcome.collections["colorways"].deleted, 1);
        let b = store
            .rows(&COLORWAYS)
            .into_iter()
            .find(|r| r["colorway_id"] == json!("B"))
            .unwrap();
        assert_eq!(b["name"], json!("Jet Black"));
        assert_eq!(store.rows(&MATERIAL.table).len(), 1);
        assert_eq!(store.rows(&SYNC_LOG).len(), 2);
    }

    #[tokio::test]
    async fn test_material_missing_collection_is_empty_style_skips() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());

        sync.handle_event(
            &MATERIAL,
            &material_event("OnCreate", None, Some(json!({"colorways": [colorway("A", "Navy")]}))),
        )
        .await
        .unwrap();
        let outcome = sync
            .handle_event(
                &MATERIAL,
                &material_event(
                    "OnChange",
                    Some(json!({"colorways": [colorway("A", "Navy")]})),
                    Some(json!({})),
                ),
            )
            .await
            .unwrap();
        assert!(colorway_keys(&store).is_empty());
        assert_eq!(outcome.collections["colorways"].deleted, 1);

        let style_event = json!({
            "eventType": "OnChange",
            "headerId": "S-1",
            "headerNumber": "ST-1",
            "headerName": "Polo",
            "data": {
                "before": {"colorways": [colorway("A", "Navy")]},
                "after": {"sizeClasses": [{"name": "Regular"}]}
            }
        });
        let outcome = sync.handle_event(&STYLE, &style_event).await.unwrap();
        assert!(!outcome.collections.contains_key("colorways"));
        assert!(outcome.collections.contains_key("sizeClasses"));
    }

    #[tokio::test]
    async fn test_missing_header_fields_is_validation_error() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());
        let event = json!({"eventType": "OnCreate", "headerId": "M-1", "data": {"after": {}}});

        let err = sync.handle_event(&MATERIAL, &event).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.rows(&MATERIAL.table).is_empty());
        assert_eq!(store.rows(&SYNC_LOG)[0]["status"], json!("error"));
    }

    #[tokio::test]
    async fn test_unreadable_envelope_is_still_logged() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());
        let event = json!({"eventType": "OnCreate", "headerId": "M-1", "data": "oops"});

        let err = sync.handle_event(&MATERIAL, &event).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let log = store.rows(&SYNC_LOG);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["status"], json!("error"));
        assert_eq!(log[0]["action"], json!("OnCreate"));
        assert_eq!(log[0]["entity_id"], Value::Null);
        assert_eq!(log[0]["payload"], event);
    }

    #[tokio::test]
    async fn test_change_clears_colorway_fields_dropped_by_plm() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());

        let mut noted = colorway("A", "Navy");
        noted["comments"] = json!("old note");
        noted["fields"] = json!({"Fabric Weight": 180});
        let create = material_event("OnCreate", None, Some(json!({"colorways": [noted.clone()]})));
        sync.handle_event(&MATERIAL, &create).await.unwrap();

        let stored = &store.rows(&COLORWAYS)[0];
        assert_eq!(stored["comments"], json!("old note"));
        assert_eq!(stored["fabric_weight"], json!(180));

        let mut cleared = colorway("A", "Navy");
        cleared["fields"] = json!({"Fabric Weight": null});
        let change = material_event(
            "OnChange",
            Some(json!({"colorways": [noted]})),
            Some(json!({"colorways": [cleared]})),
        );
        sync.handle_event(&MATERIAL, &change).await.unwrap();

        let stored = store.rows(&COLORWAYS);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["name"], json!("Navy"));
        assert_eq!(stored[0]["comments"], Value::Null);
        assert_eq!(stored[0]["fabric_weight"], Value::Null);
    }

    #[tokio::test]
    async fn test_unsupported_and_missing_after_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());

        let archived = sync
            .handle_event(&STYLE, &json!({"eventType": "OnArchive", "headerId": "S-1"}))
            .await
            .unwrap();
        assert_eq!(archived.action, "ignored");

        let no_after = sync
            .handle_event(&STYLE, &json!({"eventType": "OnChange", "headerId": "S-1", "data": {}}))
            .await
            .unwrap();
        assert_eq!(no_after.reason, Some("No after data"));
        assert!(store.rows(&STYLE.table).is_empty());
    }

    #[tokio::test]
    async fn test_delete_soft_deletes_header_and_cascades() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());
        sync.handle_event(
            &MATERIAL,
            &material_event("OnCreate", None, Some(json!({"colorways": [colorway("A", "Navy")]}))),
        )
        .await
        .unwrap();

        let outcome = sync
            .handle_event(&MATERIAL, &material_event("OnDelete", None, None))
            .await
            .unwrap();

        assert_eq!(outcome.action, "deleted");
        let header = &store.rows(&MATERIAL.table)[0];
        assert_eq!(header["deleted"], json!(true));
        assert_eq!(header["raw_beproduct_data"]["eventType"], json!("OnDelete"));
        assert_eq!(store.rows(&COLORWAYS)[0]["deleted"], json!(true));
    }

    #[tokio::test]
    async fn test_delete_unknown_header_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let sync = HeaderSync::new(store.clone());

        let err = sync
            .handle_event(&STYLE, &json!({"eventType": "OnDelete", "headerId": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = sync
            .handle_event(&STYLE, &json!({"eventType": "OnDelete"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_collection_failure_is_partial() {
        let store = Arc::new(MemoryStore::new());
        store.fail_table(&COLORWAYS);
        let sync = HeaderSync::new(store.clone());

        let outcome = sync
            .handle_event(
                &MATERIAL,
                &material_event(
                    "OnCreate",
                    None,
                    Some(json!({"colorways": [colorway("A", "Navy")], "tags": ["eco"]})),
                ),
            )
            .await
            .unwrap();

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.collections["tags"].upserted, 1);
    }
}
