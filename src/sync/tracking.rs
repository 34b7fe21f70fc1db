//! Tracking plan-style sync
//!
//! A plan-style is one style placed on a tracking plan. Creating one pulls
//! the plan (and its folder) from the PLM, asks the dependency agent for the
//! plan's graph and lays down the style's milestone timelines between two
//! synthetic bookends. Changes arrive one milestone at a time.

use super::log::{SyncLog, SyncLogEntry};
use super::reconcile::{CollectionReconciler, CollectionTarget};
use crate::dependency::{Bookend, DependencyRequester, BOOKEND_DEPARTMENT, END_DATE, START_DATE};
use crate::error::{validation_error, AppError};
use crate::payload::entities::{FolderPayload, MilestonePayload, PlanPayload, PlanStylePayload};
use crate::payload::flatten::{date_only, timeline_row};
use crate::payload::status::{COMPLETE, NOT_STARTED};
use crate::payload::{decode, normalize_status, scalar_text, CollectionKind, EventEnvelope, EventType};
use crate::plm::{with_single_retry, PlmClient};
use crate::recalc::DateRecalculator;
use crate::schema::SchemaEvolver;
use crate::store::{Filter, Row, Store};
use crate::tables::{TIMELINE, TIMELINE_ASSIGNMENT, TRACKING_FOLDER, TRACKING_PLAN, TRACKING_PLAN_STYLE};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const TIMELINES: CollectionTarget = CollectionTarget {
    table: TIMELINE,
    parent_column: "plan_style_id",
    key_column: "id",
    kept_columns: &["row_number", "depends_on", "dependency_uuid", "relationship"],
};

const ASSIGNMENTS: CollectionTarget = CollectionTarget {
    table: TIMELINE_ASSIGNMENT,
    parent_column: "timeline_id",
    key_column: "assignee_id",
    kept_columns: &[],
};

/// Result of one tracking event
#[derive(Debug, Default, Serialize)]
pub struct TrackingOutcome {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_style_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_id: Option<String>,
    pub timelines: usize,
    pub assignments: usize,
    pub dependency_requested: bool,
    pub recalculated: Option<u64>,
    pub errors: Vec<String>,
}

impl TrackingOutcome {
    fn ignored(reason: &'static str) -> Self {
        Self {
            action: "ignored",
            reason: Some(reason),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct TrackingSync {
    store: Arc<dyn Store>,
    plm: Arc<dyn PlmClient>,
    requester: DependencyRequester,
    recalculator: Arc<dyn DateRecalculator>,
    evolver: SchemaEvolver,
    reconciler: CollectionReconciler,
    log: SyncLog,
    retry_backoff: Duration,
}

impl TrackingSync {
    pub fn new(
        store: Arc<dyn Store>,
        plm: Arc<dyn PlmClient>,
        requester: DependencyRequester,
        recalculator: Arc<dyn DateRecalculator>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            evolver: SchemaEvolver::new(store.clone()),
            reconciler: CollectionReconciler::new(store.clone()),
            log: SyncLog::new(store.clone()),
            store,
            plm,
            requester,
            recalculator,
            retry_backoff,
        }
    }

    /// Process one event and record it in the sync log, success or failure.
    pub async fn handle_event(&self, raw: &Value) -> Result<TrackingOutcome, AppError> {
        let envelope = match EventEnvelope::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = validation_error(format!("Invalid event envelope: {e}"));
                self.log.record_unreadable("tracking", raw, err.to_string()).await;
                return Err(err);
            }
        };
        info!(
            "Received {} event for {}",
            envelope.event_type.as_str(),
            envelope.header_number.as_deref().unwrap_or("-")
        );

        let result = match envelope.event_type {
            EventType::OnCreate => self.on_create(&envelope).await,
            EventType::OnChange => self.on_change(&envelope).await,
            EventType::OnDelete => self.on_delete(&envelope).await,
            other => {
                warn!("Unknown event type: {}", other.as_str());
                Ok(TrackingOutcome::ignored("Unsupported eventType"))
            }
        };

        self.log
            .record(SyncLogEntry {
                entity_type: "tracking",
                entity_id: envelope.header_id.as_deref(),
                action: envelope.event_type.as_str(),
                payload: raw,
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;
        result
    }

    async fn on_create(&self, envelope: &EventEnvelope) -> Result<TrackingOutcome, AppError> {
        let (Some(plan_id), Some(folder_id)) = (
            envelope.data.plan_id.as_deref(),
            envelope.data.plan_folder_id.as_deref(),
        ) else {
            return Err(validation_error("Missing planId or planFolderId"));
        };
        let after_raw = envelope
            .data
            .after
            .as_ref()
            .ok_or_else(|| validation_error("Missing 'after' data in OnCreate event"))?;
        let after: PlanStylePayload = decode(after_raw);
        let plan_style_id = after
            .id
            .clone()
            .ok_or_else(|| validation_error("Missing plan-style Id in OnCreate event"))?;

        self.ensure_folder(folder_id, envelope.folder_name.as_deref()).await?;

        let plan_raw = with_single_retry("fetch plan", self.retry_backoff, || self.plm.fetch_plan(plan_id)).await?;
        let plan: PlanPayload = decode(&plan_raw);
        let plan_row = plan_row(plan_id, folder_id, &plan, &plan_raw);
        let evolved = self.evolver.ensure_columns(&TRACKING_PLAN, &plan_row).await;
        self.store.upsert(&TRACKING_PLAN, &[evolved.fields], &["id"]).await?;
        info!("Upserted plan {}", plan_id);

        let dependency_requested = self.requester.request(plan_id, folder_id).is_some();

        let style_row = plan_style_row(envelope, plan_id, &after, after_raw);
        let evolved = self.evolver.ensure_columns(&TRACKING_PLAN_STYLE, &style_row).await;
        self.store.upsert(&TRACKING_PLAN_STYLE, &[evolved.fields], &["id"]).await?;
        info!("Upserted plan-style {}", plan_style_id);

        let mut outcome = TrackingOutcome {
            action: "created",
            plan_id: Some(plan_id.to_string()),
            plan_style_id: Some(plan_style_id.clone()),
            dependency_requested,
            ..Default::default()
        };

        let milestones: Vec<(MilestonePayload, &Value)> =
            after.timelines.iter().map(|raw| (decode(raw), raw)).collect();

        let mut rows = Vec::with_capacity(milestones.len() + 2);
        rows.push(bookend_timeline(
            &START_DATE,
            &plan_style_id,
            plan.start_date.as_deref(),
            COMPLETE,
            "tracking_plan.start_date",
        ));
        for (milestone, raw) in &milestones {
            let template = milestone.time_line_id.as_deref().and_then(|id| plan.template(id));
            rows.push(timeline_row(milestone, raw, &plan_style_id, template));
        }
        rows.push(bookend_timeline(
            &END_DATE,
            &plan_style_id,
            plan.end_date.as_deref(),
            NOT_STARTED,
            "tracking_plan.end_date",
        ));

        let parent = Value::String(plan_style_id.clone());
        match self.reconciler.reconcile(&TIMELINES, &parent, rows, None).await {
            Ok(result) => outcome.timelines = result.upserted,
            Err(e) => {
                error!("Failed to upsert timelines for {}: {}", plan_style_id, e);
                outcome.errors.push(format!("{}: {}", TIMELINE, e));
            }
        }

        for (milestone, raw) in &milestones {
            let Some(timeline_id) = milestone.id.as_deref() else {
                continue;
            };
            let current = assigned_to(raw);
            if current.is_empty() {
                continue;
            }
            let (count, err) = self.sync_assignments(timeline_id, current, None).await;
            outcome.assignments += count;
            outcome.errors.extend(err);
        }

        self.recalculate(plan_id, &mut outcome).await;
        info!("OnCreate handled for plan-style {}", plan_style_id);
        Ok(outcome)
    }

    async fn on_change(&self, envelope: &EventEnvelope) -> Result<TrackingOutcome, AppError> {
        let item = |snapshot: &Option<Value>| {
            snapshot
                .as_ref()
                .and_then(|s| s.get("TimeLineItem"))
                .filter(|v| !v.is_null())
                .cloned()
        };
        let (Some(before_raw), Some(after_raw)) = (item(&envelope.data.before), item(&envelope.data.after)) else {
            warn!("Missing before/after TimeLineItem data in OnChange event");
            return Ok(TrackingOutcome::ignored("Missing before/after TimeLineItem"));
        };
        let before: MilestonePayload = decode(&before_raw);
        let after: MilestonePayload = decode(&after_raw);
        let timeline_id = after
            .id
            .clone()
            .ok_or_else(|| validation_error("Missing TimeLineItem Id"))?;

        info!(
            "Timeline {} status {:?} -> {:?}, due {:?} -> {:?}, assignees {:?} -> {:?}",
            timeline_id,
            before.status,
            after.status,
            before.due_date,
            after.due_date,
            before.assignee_codes(),
            after.assignee_codes()
        );

        let mut values = Row::new();
        values.insert(
            "status".into(),
            json!(normalize_status(after.status.as_deref().or(before.status.as_deref()))),
        );
        values.insert("plan_date".into(), date_only(after.project_date.as_deref()));
        values.insert("rev_date".into(), date_only(after.rev_date.as_deref()));
        values.insert("final_date".into(), date_only(after.final_date.as_deref()));
        values.insert("due_date".into(), date_only(after.due_date.as_deref()));
        if let Some(late) = after.late {
            values.insert("late".into(), json!(late));
        }
        values.insert("shared_with".into(), after.share_with.clone().unwrap_or(Value::Null));
        values.insert(
            "submits_quantity".into(),
            after.submits_quantity.clone().filter(|v| !v.is_null()).unwrap_or(json!(0)),
        );
        values.insert("raw_payload".into(), after_raw.clone());
        values.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));

        let evolved = self.evolver.ensure_columns(&TIMELINE, &values).await;
        let touched = self
            .store
            .update(&TIMELINE, &evolved.fields, &[Filter::eq("id", timeline_id.as_str())])
            .await?;
        if touched == 0 {
            warn!("Timeline {} not found, nothing updated", timeline_id);
        }

        let mut outcome = TrackingOutcome {
            action: "updated",
            timeline_id: Some(timeline_id.clone()),
            timelines: touched as usize,
            ..Default::default()
        };

        let previous = assigned_to(&before_raw);
        let (count, err) = self
            .sync_assignments(&timeline_id, assigned_to(&after_raw), Some(previous))
            .await;
        outcome.assignments = count;
        outcome.errors.extend(err);

        match self.plan_of_timeline(&timeline_id).await {
            Ok(Some((plan_style_id, plan_id))) => {
                outcome.plan_style_id = Some(plan_style_id);
                self.recalculate(&plan_id, &mut outcome).await;
                outcome.plan_id = Some(plan_id);
            }
            Ok(None) => warn!("No plan found for timeline {}, skipping recalculation", timeline_id),
            Err(e) => {
                error!("Failed to resolve plan of timeline {}: {}", timeline_id, e);
                outcome.errors.push(e.to_string());
            }
        }

        Ok(outcome)
    }

    async fn on_delete(&self, envelope: &EventEnvelope) -> Result<TrackingOutcome, AppError> {
        let Some(before) = envelope.data.before.as_ref() else {
            warn!("Missing before data in OnDelete event");
            return Ok(TrackingOutcome::ignored("No before data"));
        };
        let before: PlanStylePayload = decode(before);
        let plan_style_id = before
            .id
            .ok_or_else(|| validation_error("Missing plan-style Id for deletion"))?;

        let mut values = Row::new();
        values.insert("active".into(), Value::Bool(false));
        let touched = self
            .store
            .update(&TRACKING_PLAN_STYLE, &values, &[Filter::eq("id", plan_style_id.as_str())])
            .await?;
        if touched == 0 {
            warn!("Plan-style {} not found, nothing deactivated", plan_style_id);
        }
        info!("Deactivated plan-style {}", plan_style_id);

        Ok(TrackingOutcome {
            action: "deactivated",
            plan_id: before.plan_id,
            plan_style_id: Some(plan_style_id),
            ..Default::default()
        })
    }

    /// Upsert the folder when it is missing or only known by its fallback name.
    async fn ensure_folder(&self, folder_id: &str, envelope_name: Option<&str>) -> Result<(), AppError> {
        let existing = match self
            .store
            .select(&TRACKING_FOLDER, &[Filter::eq("id", folder_id)])
            .await
        {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                warn!("Failed to fetch folder record {}: {}", folder_id, e);
                None
            }
        };

        let needs_update = match &existing {
            None => true,
            Some(folder) => {
                let name = folder.get("name").and_then(scalar_text);
                name.is_some() && name.as_deref() == envelope_name
                    || folder.get("style_folder_name").and_then(scalar_text).is_none()
            }
        };
        if !needs_update {
            return Ok(());
        }

        info!("Folder {} missing or incomplete, fetching from PLM", folder_id);
        let details = match self.plm.list_tracking_folders().await {
            Ok(folders) => folders.into_iter().find(|f| {
                f.get("id")
                    .or_else(|| f.get("Id"))
                    .and_then(scalar_text)
                    .as_deref()
                    == Some(folder_id)
            }),
            Err(e) => {
                error!("Failed to resolve folder {} from PLM: {}", folder_id, e);
                None
            }
        };

        let fallback = envelope_name.unwrap_or(folder_id);
        let row = folder_row(folder_id, fallback, details.as_ref());
        let evolved = self.evolver.ensure_columns(&TRACKING_FOLDER, &row).await;
        self.store.upsert(&TRACKING_FOLDER, &[evolved.fields], &["id"]).await?;
        Ok(())
    }

    /// Reconcile one timeline's assignees; returns (upserted, error).
    async fn sync_assignments(
        &self,
        timeline_id: &str,
        current: Vec<Value>,
        previous: Option<Vec<Value>>,
    ) -> (usize, Option<String>) {
        let parent = Value::String(timeline_id.to_string());
        let kind = CollectionKind::TimelineAssignment;
        let rows = kind.flatten_all(&current, ASSIGNMENTS.parent_column, &parent);
        let previous = previous.map(|p| kind.flatten_all(&p, ASSIGNMENTS.parent_column, &parent));

        match self.reconciler.reconcile(&ASSIGNMENTS, &parent, rows, previous.as_deref()).await {
            Ok(result) => (result.upserted, None),
            Err(e) => {
                error!("Failed to sync assignments for timeline {}: {}", timeline_id, e);
                (0, Some(format!("{}: {}", TIMELINE_ASSIGNMENT, e)))
            }
        }
    }

    /// (plan_style_id, plan_id) owning a timeline
    async fn plan_of_timeline(&self, timeline_id: &str) -> Result<Option<(String, String)>, AppError> {
        let timeline = self.store.select(&TIMELINE, &[Filter::eq("id", timeline_id)]).await?;
        let Some(plan_style_id) = timeline
            .first()
            .and_then(|t| t.get("plan_style_id"))
            .and_then(scalar_text)
        else {
            return Ok(None);
        };

        let style = self
            .store
            .select(&TRACKING_PLAN_STYLE, &[Filter::eq("id", plan_style_id.as_str())])
            .await?;
        Ok(style
            .first()
            .and_then(|s| s.get("plan_id"))
            .and_then(scalar_text)
            .map(|plan_id| (plan_style_id, plan_id)))
    }

    async fn recalculate(&self, plan_id: &str, outcome: &mut TrackingOutcome) {
        info!("Recalculating start dates for plan {}", plan_id);
        match self.recalculator.recalculate_start_dates(plan_id).await {
            Ok(count) => outcome.recalculated = Some(count),
            Err(e) => {
                error!("Failed to recalculate start dates for plan {}: {}", plan_id, e);
                outcome.errors.push(format!("recalculation: {e}"));
            }
        }
    }
}

/// `AssignedTo` of a raw milestone
fn assigned_to(raw: &Value) -> Vec<Value> {
    raw.get("AssignedTo")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn first_word(name: &str) -> Option<String> {
    name.split_whitespace().next().map(str::to_string)
}

fn folder_row(folder_id: &str, fallback_name: &str, details: Option<&Value>) -> Row {
    let folder: FolderPayload = details.map(decode).unwrap_or_default();
    let name = folder.name.clone().unwrap_or_else(|| fallback_name.to_string());
    let style_folder = folder.style_folder.unwrap_or_default();

    let mut row = Row::new();
    row.insert("id".into(), json!(folder_id));
    row.insert("brand".into(), json!(folder.brand.or_else(|| first_word(&name))));
    row.insert("name".into(), json!(name));
    row.insert(
        "style_folder_id".into(),
        json!(style_folder.id.or(folder.style_folder_id)),
    );
    row.insert(
        "style_folder_name".into(),
        json!(style_folder.name.or(folder.style_folder_name)),
    );
    row.insert("active".into(), json!(folder.active.unwrap_or(true)));
    row.insert("raw_payload".into(), details.cloned().unwrap_or(Value::Null));
    row
}

fn plan_row(plan_id: &str, folder_id: &str, plan: &PlanPayload, raw: &Value) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(plan.id.as_deref().unwrap_or(plan_id)));
    row.insert("name".into(), json!(plan.name));
    row.insert("description".into(), json!(plan.description));
    row.insert("folder_id".into(), json!(plan.folder_id.as_deref().unwrap_or(folder_id)));
    row.insert("start_date".into(), date_only(plan.start_date.as_deref()));
    row.insert("end_date".into(), date_only(plan.end_date.as_deref()));
    row.insert("template_id".into(), json!(plan.template_id));
    row.insert("active".into(), json!(plan.active != Some(false)));
    row.insert("raw_payload".into(), raw.clone());
    row.insert("created_at".into(), json!(plan.created_at));
    row.insert("updated_at".into(), json!(plan.modified_at));
    row.insert(
        "created_by".into(),
        json!(plan.created_by.as_ref().and_then(|u| u.name.clone())),
    );
    row.insert(
        "updated_by".into(),
        json!(plan.modified_by.as_ref().and_then(|u| u.name.clone())),
    );
    row
}

fn plan_style_row(envelope: &EventEnvelope, plan_id: &str, after: &PlanStylePayload, raw: &Value) -> Row {
    let color = after.color.clone().unwrap_or_default();
    let mut row = Row::new();
    row.insert("id".into(), json!(after.id));
    row.insert("plan_id".into(), json!(plan_id));
    row.insert("style_header_id".into(), json!(envelope.header_id));
    row.insert("color_id".into(), json!(color.id));
    row.insert("style_number".into(), json!(envelope.header_number));
    row.insert("style_name".into(), json!(envelope.header_name));
    row.insert("color_name".into(), json!(color.suggested_name));
    row.insert("supplier_name".into(), json!(after.supplier_name()));
    row.insert("active".into(), json!(true));
    row.insert("raw_payload".into(), raw.clone());
    row
}

fn bookend_timeline(
    bookend: &Bookend,
    plan_style_id: &str,
    date: Option<&str>,
    status: &str,
    source: &str,
) -> Row {
    let date = date_only(date);
    let mut row = Row::new();
    row.insert("id".into(), json!(bookend.timeline_id(plan_style_id)));
    row.insert("plan_style_id".into(), json!(plan_style_id));
    row.insert("template_item_id".into(), Value::Null);
    row.insert("status".into(), json!(status));
    row.insert("plan_date".into(), date.clone());
    row.insert("due_date".into(), date);
    row.insert("late".into(), json!(false));
    row.insert("milestone_name".into(), json!(bookend.name));
    row.insert("milestone_short_name".into(), json!(bookend.name));
    row.insert("dept_customer".into(), json!(BOOKEND_DEPARTMENT));
    row.insert("row_number".into(), json!(bookend.row_number));
    row.insert("raw_payload".into(), json!({"synthesized": true, "source": source}));
    row
}
