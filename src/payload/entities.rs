//! Serde shapes for the nested PLM entities
//!
//! Every shape is all-optional with an `extra` bucket catching the fields we
//! do not name, so new PLM fields flow through to dynamic columns.

use super::{lenient_bool, lenient_object, lenient_opt_vec, lenient_string, lenient_vec};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Colorway on a material or style
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorwayPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub color_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub color_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub primary_color: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub secondary_color: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub secondary_color_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub secondary_color_number: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub color_source_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_header_id: Option<String>,
    pub comments: Option<Value>,
    pub image: Option<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    pub hide_colorway: Option<bool>,
    #[serde(deserialize_with = "lenient_object")]
    pub fields: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeRangePayload {
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_object")]
    pub fields: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupplierPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_primary: Option<bool>,
    #[serde(deserialize_with = "lenient_object")]
    pub fields: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Object form of a tag or plan link; both may also arrive as a bare string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_object")]
    pub fields: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeClassPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_default: Option<bool>,
    pub size_range: Option<Value>,
    pub fields: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `{value, code}` user reference on a milestone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssignedUser {
    #[serde(deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub code: Option<String>,
}

/// One milestone instance on a plan-style
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MilestonePayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub time_line_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(rename = "Rev", deserialize_with = "lenient_string")]
    pub rev_date: Option<String>,
    #[serde(rename = "Final", deserialize_with = "lenient_string")]
    pub final_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub project_date: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub assigned_to: Vec<AssignedUser>,
    pub share_with: Option<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    pub late: Option<bool>,
    pub submits_quantity: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MilestonePayload {
    /// Assignee codes, blanks dropped
    pub fn assignee_codes(&self) -> Vec<String> {
        self.assigned_to.iter().filter_map(|u| u.code.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ColorRef {
    #[serde(rename = "_id", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub suggested_name: Option<String>,
}

/// The plan-style record carried in tracking events
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlanStylePayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub plan_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub header_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub style_id: Option<String>,
    pub color: Option<ColorRef>,
    #[serde(deserialize_with = "lenient_opt_vec")]
    pub supplier: Option<Vec<Value>>,
    #[serde(deserialize_with = "lenient_vec")]
    pub timelines: Vec<Value>,
    pub time_line_item: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanStylePayload {
    /// First supplier's name, or the first supplier itself when it is a string
    pub fn supplier_name(&self) -> Option<String> {
        let first = self.supplier.as_ref()?.first()?;
        first
            .get("name")
            .and_then(super::scalar_text)
            .or_else(|| super::scalar_text(first))
    }
}

/// One template item from the plan's timeline schema
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineTemplate {
    #[serde(alias = "Id", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(alias = "TaskDescription", deserialize_with = "lenient_string")]
    pub action_description: Option<String>,
    #[serde(alias = "ShortDescription", deserialize_with = "lenient_string")]
    pub short_description: Option<String>,
    #[serde(alias = "Department", deserialize_with = "lenient_string")]
    pub department: Option<String>,
    #[serde(alias = "Page", deserialize_with = "lenient_string")]
    pub page_name: Option<String>,
    #[serde(alias = "Days")]
    pub days: Option<Value>,
    #[serde(alias = "CalendarDays")]
    pub calendar_days: Option<Value>,
    #[serde(alias = "Calendar", deserialize_with = "lenient_string")]
    pub calendar: Option<String>,
    #[serde(alias = "GroupTask", deserialize_with = "lenient_string")]
    pub group_task: Option<String>,
    #[serde(alias = "When", deserialize_with = "lenient_string")]
    pub when: Option<String>,
    #[serde(alias = "ShareWhen", deserialize_with = "lenient_string")]
    pub share_when: Option<String>,
    #[serde(alias = "ActDesc", deserialize_with = "lenient_string")]
    pub act_desc: Option<String>,
    #[serde(alias = "RevisedDays")]
    pub revised_days: Option<Value>,
    #[serde(alias = "DefaultStatus", deserialize_with = "lenient_string")]
    pub default_status: Option<String>,
    #[serde(alias = "AutoShareLinkedPage", deserialize_with = "lenient_bool")]
    pub auto_share_linked_page: Option<bool>,
    #[serde(alias = "SyncWithGroupTask", deserialize_with = "lenient_bool")]
    pub sync_with_group_task: Option<bool>,
    #[serde(alias = "ExternalShareWith")]
    pub external_share_with: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NamedUser {
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlanStyleSection {
    #[serde(deserialize_with = "lenient_vec")]
    pub timelines: Vec<TimelineTemplate>,
}

/// Tracking plan as returned by the PLM API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub folder_id: Option<String>,
    #[serde(alias = "StartDate", deserialize_with = "lenient_string")]
    pub start_date: Option<String>,
    #[serde(alias = "EndDate", deserialize_with = "lenient_string")]
    pub end_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub template_id: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub active: Option<bool>,
    #[serde(deserialize_with = "lenient_string")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub modified_at: Option<String>,
    pub created_by: Option<NamedUser>,
    pub modified_by: Option<NamedUser>,
    #[serde(deserialize_with = "lenient_opt_vec")]
    pub timelines: Option<Vec<TimelineTemplate>>,
    pub style: Option<PlanStyleSection>,
}

impl PlanPayload {
    /// Timeline schema: top-level `timelines` wins over `style.timelines`
    pub fn timeline_templates(&self) -> &[TimelineTemplate] {
        match (&self.timelines, &self.style) {
            (Some(t), _) => t,
            (None, Some(style)) => &style.timelines,
            (None, None) => &[],
        }
    }

    pub fn template(&self, template_id: &str) -> Option<&TimelineTemplate> {
        self.timeline_templates()
            .iter()
            .find(|t| t.id.as_deref() == Some(template_id))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FolderRef {
    #[serde(alias = "Id", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(alias = "Name", deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

/// Tracking folder as listed by the PLM API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderPayload {
    #[serde(alias = "Id", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(alias = "Name", deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(alias = "StyleFolder")]
    pub style_folder: Option<FolderRef>,
    #[serde(alias = "StyleFolderId", deserialize_with = "lenient_string")]
    pub style_folder_id: Option<String>,
    #[serde(alias = "StyleFolderName", deserialize_with = "lenient_string")]
    pub style_folder_name: Option<String>,
    #[serde(alias = "Brand", deserialize_with = "lenient_string")]
    pub brand: Option<String>,
    #[serde(alias = "Active", alias = "isActive", alias = "IsActive", deserialize_with = "lenient_bool")]
    pub active: Option<bool>,
}
