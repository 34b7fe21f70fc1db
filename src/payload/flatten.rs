//! Entity flattener
//!
//! Turns one nested PLM entity into a flat row: the fixed, well-known columns
//! first, then pass-through columns for everything else the entity carries
//! (its `fields` map and any top-level scalar). Fixed columns always win.

use super::entities::{
    AssignedUser, ColorwayPayload, LabelPayload, MilestonePayload, SizeClassPayload,
    SizeRangePayload, SupplierPayload, TimelineTemplate,
};
use super::{decode, normalize_status, scalar_text};
use crate::schema::sanitize;
use crate::store::Row;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Child collections we know how to flatten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    MaterialColorway,
    MaterialSizeRange,
    MaterialSupplier,
    MaterialTag,
    MaterialPlanLink,
    StyleColorway,
    StyleSizeClass,
    TimelineAssignment,
}

impl CollectionKind {
    /// Column identifying a row within its parent
    pub fn unique_key(&self) -> &'static str {
        match self {
            CollectionKind::MaterialColorway => "colorway_id",
            CollectionKind::MaterialSizeRange => "size_range_id",
            CollectionKind::MaterialSupplier => "supplier_id",
            CollectionKind::MaterialTag => "tag",
            CollectionKind::MaterialPlanLink => "plan_id",
            CollectionKind::StyleColorway => "beproduct_colorway_id",
            CollectionKind::StyleSizeClass => "size_class_name",
            CollectionKind::TimelineAssignment => "assignee_id",
        }
    }

    /// Flatten one raw item owned by `parent_id` (stored under `parent_column`)
    pub fn flatten(&self, raw: &Value, parent_column: &str, parent_id: &Value) -> Row {
        let mut row = RowBuilder::new(parent_column, parent_id);
        match self {
            CollectionKind::MaterialColorway => material_colorway(&mut row, decode(raw)),
            CollectionKind::MaterialSizeRange => size_range(&mut row, raw, decode(raw)),
            CollectionKind::MaterialSupplier => supplier(&mut row, decode(raw)),
            CollectionKind::MaterialTag => tag(&mut row, raw),
            CollectionKind::MaterialPlanLink => plan_link(&mut row, raw),
            CollectionKind::StyleColorway => style_colorway(&mut row, raw, decode(raw)),
            CollectionKind::StyleSizeClass => size_class(&mut row, raw, decode(raw)),
            CollectionKind::TimelineAssignment => assignment(&mut row, decode(raw)),
        }
        row.finish()
    }

    /// Flatten a whole list
    pub fn flatten_all(&self, raw: &[Value], parent_column: &str, parent_id: &Value) -> Vec<Row> {
        raw.iter()
            .map(|item| self.flatten(item, parent_column, parent_id))
            .collect()
    }
}

struct RowBuilder {
    row: Row,
}

impl RowBuilder {
    fn new(parent_column: &str, parent_id: &Value) -> Self {
        let mut row = Row::new();
        row.insert(parent_column.to_string(), parent_id.clone());
        Self { row }
    }

    /// Fixed column, null when absent
    fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.row.insert(column.to_string(), value.into());
    }

    /// Fixed column written only when the entity carries it
    fn set_present<V: Into<Value>>(&mut self, column: &str, value: Option<V>) {
        if let Some(v) = value {
            self.row.insert(column.to_string(), v.into());
        }
    }

    /// Pass-through: sanitized name, nulls skipped, never overriding a fixed column
    fn pass_through(&mut self, entries: &Map<String, Value>, scalars_only: bool) {
        for (key, value) in entries {
            if value.is_null() || (scalars_only && (value.is_object() || value.is_array())) {
                continue;
            }
            let column = sanitize(key);
            if column.is_empty() || self.row.contains_key(&column) {
                continue;
            }
            self.row.insert(column, value.clone());
        }
    }

    fn finish(self) -> Row {
        self.row
    }
}

fn material_colorway(row: &mut RowBuilder, c: ColorwayPayload) {
    row.set("colorway_id", c.id);
    row.set("name", c.color_name);
    row.set("code", c.color_number);
    row.set("hex", c.primary_color.clone());
    row.set_present("comments", c.comments.filter(truthy));
    row.set_present("image", c.image.filter(truthy));
    row.set_present("hide_colorway", c.hide_colorway);
    row.set_present("primary_color", c.primary_color);
    row.set_present("secondary_color", c.secondary_color);
    row.set_present("secondary_color_name", c.secondary_color_name);
    row.set_present("secondary_color_number", c.secondary_color_number);
    row.set_present("color_source_id", c.color_source_id);
    row.set_present("image_header_id", c.image_header_id);
    row.pass_through(&c.fields, false);
    row.pass_through(&c.extra, true);
}

fn size_range(row: &mut RowBuilder, raw: &Value, s: SizeRangePayload) {
    row.set("size_range_id", s.name.clone());
    row.set("name", s.name);
    row.set("sizes", raw.to_string());
    row.pass_through(&s.fields, false);
    row.pass_through(&s.extra, true);
}

fn supplier(row: &mut RowBuilder, s: SupplierPayload) {
    let key = s.id.clone().or_else(|| s.code.clone()).or_else(|| s.value.clone());
    row.set("supplier_id", key);
    row.set("name", s.name.or(s.value));
    row.set("code", s.code);
    row.set("is_primary", s.is_primary.unwrap_or(false));
    row.pass_through(&s.fields, false);
    row.pass_through(&s.extra, true);
}

fn tag(row: &mut RowBuilder, raw: &Value) {
    match Labelled::from(raw) {
        Labelled::Plain(text) => row.set("tag", text),
        Labelled::Detailed(t) => {
            row.set("tag", t.value);
            row.set_present("name", t.name);
            row.pass_through(&t.fields, false);
        }
    }
}

fn plan_link(row: &mut RowBuilder, raw: &Value) {
    match Labelled::from(raw) {
        Labelled::Plain(text) => row.set("plan_id", text),
        Labelled::Detailed(p) => {
            row.set("plan_id", p.id);
            row.pass_through(&p.fields, false);
        }
    }
}

fn style_colorway(row: &mut RowBuilder, raw: &Value, c: ColorwayPayload) {
    let named = |key: &str| c.fields.get(key).cloned().unwrap_or(Value::Null);
    row.set("beproduct_colorway_id", c.id.clone());
    row.set("color_number", c.color_number.clone());
    row.set("color_name", c.color_name.clone());
    row.set("primary_hex", c.primary_color.clone());
    row.set("secondary_hex", c.secondary_color.clone());
    row.set("secondary_color_number", c.secondary_color_number.clone());
    row.set("secondary_color_name", c.secondary_color_name.clone());
    row.set("comments", c.comments.clone());
    row.set("hide_colorway", c.hide_colorway);
    row.set("image_header_id", c.image_header_id.clone());
    row.set("color_source_id", c.color_source_id.clone());
    row.set("brand_marketing_name", named("marketing_name"));
    row.set("marketing_name", named("marketing_name"));
    row.set("color_reference", named("color_reference"));
    row.set("color_number_ls", named("color_number_ls"));
    row.set("bulk_order_qty", named("bulk_order_qty"));
    row.set("core_colorway_main_material", named("core_colorway_main_material"));
    row.set("raw_beproduct_data", raw.clone());
    row.pass_through(&c.fields, false);
    row.pass_through(&c.extra, true);
}

fn size_class(row: &mut RowBuilder, raw: &Value, s: SizeClassPayload) {
    row.set("beproduct_size_class_id", s.id);
    row.set("size_class_name", s.name);
    row.set("is_default", s.is_default);
    row.set(
        "sizes",
        s.size_range.filter(|v| !v.is_null()).map(|v| v.to_string()),
    );
    row.set("raw_beproduct_data", raw.clone());
    row.set("size_class_fields", s.fields);
    row.pass_through(&s.extra, true);
}

fn assignment(row: &mut RowBuilder, user: AssignedUser) {
    row.set("assignee_id", user.code.clone());
    row.set("source_user_id", user.code);
}

/// Tags and plan links arrive either as a bare scalar or as an object.
enum Labelled {
    Plain(Option<String>),
    Detailed(LabelPayload),
}

impl From<&Value> for Labelled {
    fn from(raw: &Value) -> Self {
        if raw.is_object() {
            Labelled::Detailed(LabelPayload::deserialize(raw).unwrap_or_default())
        } else {
            Labelled::Plain(scalar_text(raw))
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `2025-01-06T00:00:00Z` -> `2025-01-06`; blank or absent -> null
pub fn date_only(value: Option<&str>) -> Value {
    match value.and_then(|v| v.split('T').next()).filter(|d| !d.is_empty()) {
        Some(date) => Value::String(date.to_string()),
        None => Value::Null,
    }
}

/// Timeline row for one milestone, enriched from its template item
pub fn timeline_row(
    milestone: &MilestonePayload,
    raw: &Value,
    plan_style_id: &str,
    template: Option<&TimelineTemplate>,
) -> Row {
    let mut row = RowBuilder::new("plan_style_id", &Value::String(plan_style_id.to_string()));
    row.set("id", milestone.id.clone());
    row.set("template_item_id", milestone.time_line_id.clone());
    row.set("status", normalize_status(milestone.status.as_deref()));
    row.set("plan_date", date_only(milestone.project_date.as_deref()));
    row.set("rev_date", date_only(milestone.rev_date.as_deref()));
    row.set("final_date", date_only(milestone.final_date.as_deref()));
    row.set("due_date", date_only(milestone.due_date.as_deref()));
    row.set("late", milestone.late.unwrap_or(false));

    let t = template.cloned().unwrap_or_default();
    row.set("milestone_name", t.action_description);
    row.set("milestone_short_name", t.short_description);
    row.set("dept_customer", t.department);
    row.set("milestone_page_name", t.page_name);
    row.set("offset_days", t.days);
    row.set("calendar_days", t.calendar_days);
    row.set("calendar_name", t.calendar);
    row.set("group_task", t.group_task);
    row.set("when_rule", t.when);
    row.set("share_when_rule", t.share_when);
    row.set("activity_description", t.act_desc);
    row.set("revised_days", t.revised_days);
    row.set(
        "default_status",
        t.default_status.as_deref().map(|s| normalize_status(Some(s))),
    );
    row.set("auto_share_linked_page", t.auto_share_linked_page);
    row.set("sync_with_group_task", t.sync_with_group_task);
    row.set("external_share_with", t.external_share_with);
    row.set("raw_payload", raw.clone());
    row.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parent() -> Value {
        json!("row-1")
    }

    #[test]
    fn test_material_colorway_fixed_and_pass_through() {
        let row = CollectionKind::MaterialColorway.flatten(
            &json!({
                "id": "c1",
                "colorName": "Navy",
                "colorNumber": "19-4024",
                "primaryColor": "#1F2A44",
                "hideColorway": false,
                "fields": {"Fabric Weight": 180, "name": "shadowed", "empty": null},
                "season": "FW25",
                "thumbnails": [1, 2]
            }),
            "material_id",
            &parent(),
        );
        assert_eq!(row.get("material_id"), Some(&json!("row-1")));
        assert_eq!(row.get("colorway_id"), Some(&json!("c1")));
        assert_eq!(row.get("name"), Some(&json!("Navy")));
        assert_eq!(row.get("hex"), Some(&json!("#1F2A44")));
        assert_eq!(row.get("primary_color"), Some(&json!("#1F2A44")));
        assert_eq!(row.get("hide_colorway"), Some(&json!(false)));
        assert_eq!(row.get("fabric_weight"), Some(&json!(180)));
        assert_eq!(row.get("season"), Some(&json!("FW25")));
        assert!(!row.contains_key("empty"));
        assert!(!row.contains_key("thumbnails"));
        assert!(!row.contains_key("secondary_color"));
    }

    #[test]
    fn test_absent_fixed_fields_are_null() {
        let row = CollectionKind::MaterialColorway.flatten(&json!({}), "material_id", &parent());
        assert_eq!(row.get("colorway_id"), Some(&Value::Null));
        assert_eq!(row.get("hex"), Some(&Value::Null));
    }

    #[test]
    fn test_size_range_keyed_by_name_with_json_text() {
        let raw = json!({"name": "S-XL", "sizes": ["S", "M"]});
        let row = CollectionKind::MaterialSizeRange.flatten(&raw, "material_id", &parent());
        assert_eq!(row.get("size_range_id"), Some(&json!("S-XL")));
        let sizes: Value = serde_json::from_str(row["sizes"].as_str().unwrap()).unwrap();
        assert_eq!(sizes, raw);
    }

    #[test]
    fn test_supplier_key_fallbacks() {
        let by_code = CollectionKind::MaterialSupplier.flatten(
            &json!({"id": "", "code": "SUP-9", "value": "Acme"}),
            "material_id",
            &parent(),
        );
        assert_eq!(by_code.get("supplier_id"), Some(&json!("SUP-9")));
        assert_eq!(by_code.get("name"), Some(&json!("Acme")));
        assert_eq!(by_code.get("is_primary"), Some(&json!(false)));

        let by_value =
            CollectionKind::MaterialSupplier.flatten(&json!({"value": "Bolt"}), "material_id", &parent());
        assert_eq!(by_value.get("supplier_id"), Some(&json!("Bolt")));
    }

    #[test]
    fn test_tag_and_plan_link_forms() {
        let tag = CollectionKind::MaterialTag;
        assert_eq!(tag.flatten(&json!("eco"), "material_id", &parent())["tag"], json!("eco"));
        let detailed = tag.flatten(&json!({"value": "recycled", "name": "Recycled"}), "material_id", &parent());
        assert_eq!(detailed["tag"], json!("recycled"));
        assert_eq!(detailed["name"], json!("Recycled"));

        let link = CollectionKind::MaterialPlanLink;
        assert_eq!(link.flatten(&json!("P1"), "material_id", &parent())["plan_id"], json!("P1"));
        assert_eq!(link.flatten(&json!({"id": "P2"}), "material_id", &parent())["plan_id"], json!("P2"));
    }

    #[test]
    fn test_style_size_class() {
        let row = CollectionKind::StyleSizeClass.flatten(
            &json!({"id": "sc1", "name": "Regular", "isDefault": true, "sizeRange": ["S", "M"]}),
            "style_id",
            &parent(),
        );
        assert_eq!(row["size_class_name"], json!("Regular"));
        assert_eq!(row["sizes"], json!("[\"S\",\"M\"]"));
        assert_eq!(row["size_class_fields"], Value::Null);
    }

    #[test]
    fn test_date_only() {
        assert_eq!(date_only(Some("2025-03-01T00:00:00Z")), json!("2025-03-01"));
        assert_eq!(date_only(Some("2025-03-01")), json!("2025-03-01"));
        assert_eq!(date_only(Some("")), Value::Null);
        assert_eq!(date_only(None), Value::Null);
    }

    #[test]
    fn test_timeline_row_enriched_from_template() {
        let raw = json!({
            "Id": "tl1",
            "TimeLineId": "t1",
            "Status": "in_progress",
            "ProjectDate": "2025-02-01T00:00:00",
            "Late": true
        });
        let milestone: MilestonePayload = decode(&raw);
        let template: TimelineTemplate = decode(&json!({
            "id": "t1",
            "actionDescription": "CUT APPROVAL",
            "Department": "PROD",
            "Days": 3,
            "DefaultStatus": "not-started"
        }));
        let row = timeline_row(&milestone, &raw, "ps1", Some(&template));
        assert_eq!(row["id"], json!("tl1"));
        assert_eq!(row["plan_style_id"], json!("ps1"));
        assert_eq!(row["status"], json!("In Progress"));
        assert_eq!(row["plan_date"], json!("2025-02-01"));
        assert_eq!(row["late"], json!(true));
        assert_eq!(row["milestone_name"], json!("CUT APPROVAL"));
        assert_eq!(row["dept_customer"], json!("PROD"));
        assert_eq!(row["offset_days"], json!(3));
        assert_eq!(row["default_status"], json!("Not Started"));
        assert!(!row.contains_key("row_number"));
    }
}
