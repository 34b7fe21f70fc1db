//! Dependency delivery: store the graph, resolve it onto timelines, recalculate.

use super::{Bookend, DependencyRow, END_DATE, START_DATE};
use crate::error::{not_found_error, validation_error, AppError};
use crate::payload::scalar_text;
use crate::recalc::DateRecalculator;
use crate::store::{Filter, Row, Store};
use crate::sync::log::{SyncLog, SyncLogEntry};
use crate::tables::{PLAN_DEPENDENCIES, TIMELINE, TRACKING_PLAN, TRACKING_PLAN_STYLE};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Body the agent posts back
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct DependencyDelivery {
    #[validate(length(min = 1, message = "Missing plan_id"))]
    pub plan_id: String,
    pub folder_id: Option<String>,
    pub tracking_url: Option<String>,
    pub dependencies: Option<Vec<DependencyRow>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub plan_id: String,
    pub dependencies_stored: u64,
    pub timelines_updated: usize,
    pub styles_processed: usize,
    /// Rows touched by recalculation; `None` when it failed
    pub recalculated: Option<u64>,
}

#[derive(Clone)]
pub struct DependencyPopulator {
    store: Arc<dyn Store>,
    recalculator: Arc<dyn DateRecalculator>,
    log: SyncLog,
}

impl DependencyPopulator {
    pub fn new(store: Arc<dyn Store>, recalculator: Arc<dyn DateRecalculator>) -> Self {
        Self {
            log: SyncLog::new(store.clone()),
            store,
            recalculator,
        }
    }

    /// Handle one delivery and record it in the sync log.
    pub async fn deliver(&self, raw: &Value) -> Result<DeliveryOutcome, AppError> {
        let result = self.process(raw).await;

        let plan_id = raw.get("plan_id").and_then(scalar_text);
        self.log
            .record(SyncLogEntry {
                entity_type: "tracking_dependency",
                entity_id: plan_id.as_deref(),
                action: "DependencyReceived",
                payload: raw,
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;
        result
    }

    async fn process(&self, raw: &Value) -> Result<DeliveryOutcome, AppError> {
        let delivery: DependencyDelivery = serde_json::from_value(raw.clone())
            .map_err(|e| validation_error(format!("Invalid dependency delivery: {e}")))?;
        delivery.validate().map_err(|e| validation_error(e.to_string()))?;
        let delivered = delivery
            .dependencies
            .ok_or_else(|| validation_error("Missing or invalid dependencies array"))?;
        let plan_id = delivery.plan_id.trim();
        info!("Received {} dependencies for plan {}", delivered.len(), plan_id);
        debug!(
            "Delivery for folder {:?} from {:?}",
            delivery.folder_id, delivery.tracking_url
        );

        let plan = self.store.select(&TRACKING_PLAN, &[Filter::eq("id", plan_id)]).await?;
        if plan.is_empty() {
            warn!("Plan {} not found in database", plan_id);
            return Err(not_found_error(format!("Plan {plan_id} not found")));
        }

        let dependencies = with_bookends(delivered);
        let now = Utc::now().to_rfc3339();
        let rows: Vec<Row> = dependencies
            .iter()
            .map(|d| dependency_row(plan_id, d, &now))
            .collect();
        let stored = self
            .store
            .replace(&PLAN_DEPENDENCIES, &[Filter::eq("plan_id", plan_id)], &rows)
            .await?;
        info!("Stored {} dependencies for plan {}", stored, plan_id);

        let (styles_processed, timelines_updated) = self.resolve(plan_id, &dependencies, &now).await;
        info!(
            "Updated {} timeline records across {} styles of plan {}",
            timelines_updated, styles_processed, plan_id
        );

        let recalculated = match self.recalculator.recalculate_start_dates(plan_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                error!("Failed to recalculate start dates for plan {}: {}", plan_id, e);
                None
            }
        };

        Ok(DeliveryOutcome {
            plan_id: plan_id.to_string(),
            dependencies_stored: stored,
            timelines_updated,
            styles_processed,
            recalculated,
        })
    }

    /// Apply the graph to every style of the plan; returns (styles, timelines updated).
    async fn resolve(&self, plan_id: &str, dependencies: &[DependencyRow], now: &str) -> (usize, usize) {
        let styles = match self
            .store
            .select(&TRACKING_PLAN_STYLE, &[Filter::eq("plan_id", plan_id)])
            .await
        {
            Ok(styles) => styles,
            Err(e) => {
                error!("Failed to fetch styles for plan {}: {}", plan_id, e);
                return (0, 0);
            }
        };
        if styles.is_empty() {
            warn!("No styles found for plan {}", plan_id);
        }

        let mut processed = 0;
        let mut updated = 0;
        for style in &styles {
            let Some(style_id) = style.get("id").and_then(scalar_text) else {
                continue;
            };
            let timelines = match self
                .store
                .select(&TIMELINE, &[Filter::eq("plan_style_id", style_id.as_str())])
                .await
            {
                Ok(timelines) => timelines,
                Err(e) => {
                    error!("Failed to fetch timelines for style {}: {}", style_id, e);
                    continue;
                }
            };
            processed += 1;

            let lookup = MilestoneLookup::new(&timelines);
            for dependency in dependencies {
                let Some(name) = dependency.action_description.as_deref() else {
                    continue;
                };
                if START_DATE.shadows(dependency) || END_DATE.shadows(dependency) {
                    debug!("Row {:?} repeats a bookend, leaving {} to the bookend", dependency.row_number, name);
                    continue;
                }
                let targets = lookup.all(name);
                if targets.is_empty() {
                    debug!("No timeline named {:?} on style {}", name, style_id);
                    continue;
                }

                for timeline_id in targets {
                    // Same-style predecessor only, never the row itself
                    let dependency_uuid = dependency
                        .depends_on
                        .as_deref()
                        .and_then(|d| lookup.first(d))
                        .filter(|id| *id != timeline_id);

                    let mut values = Row::new();
                    values.insert("row_number".into(), json!(dependency.row_number));
                    values.insert("depends_on".into(), json!(dependency.depends_on));
                    values.insert("dependency_uuid".into(), json!(dependency_uuid));
                    values.insert("relationship".into(), json!(dependency.relationship));
                    values.insert("updated_at".into(), json!(now));

                    let filters = [
                        Filter::eq("id", timeline_id),
                        Filter::eq("plan_style_id", style_id.as_str()),
                    ];
                    match self.store.update(&TIMELINE, &values, &filters).await {
                        Ok(_) => {
                            updated += 1;
                            if let Some(predecessor) = dependency_uuid {
                                debug!("{} -> depends on {:?} ({})", name, dependency.depends_on, predecessor);
                            }
                        }
                        Err(e) => error!("Failed to update timeline {}: {}", timeline_id, e),
                    }
                }
            }
        }
        (processed, updated)
    }
}

/// START DATE, every delivered row, END DATE.
///
/// A delivered row numbered 0 or 99 keeps its place but loses the ordinal,
/// so the bookends stay the only rows holding them.
fn with_bookends(delivered: Vec<DependencyRow>) -> Vec<DependencyRow> {
    let mut out = Vec::with_capacity(delivered.len() + 2);
    out.push(START_DATE.dependency());
    for mut row in delivered {
        if Bookend::is_bookend_row(row.row_number) {
            warn!(
                "Delivered row {:?} ({:?}) collides with a bookend ordinal, storing it unnumbered",
                row.row_number, row.action_description
            );
            row.row_number = None;
        }
        if row.action_description.is_none() {
            debug!("Dependency row {:?} has no action_description, it cannot be resolved", row.row_number);
        }
        out.push(row);
    }
    out.push(END_DATE.dependency());
    out
}

fn dependency_row(plan_id: &str, dependency: &DependencyRow, now: &str) -> Row {
    let mut row = match serde_json::to_value(dependency) {
        Ok(Value::Object(map)) => map,
        _ => Row::new(),
    };
    row.insert("id".into(), json!(Uuid::new_v4().to_string()));
    row.insert("plan_id".into(), json!(plan_id));
    row.insert("created_at".into(), json!(now));
    row
}

/// Case-insensitive milestone name -> timeline ids of one style
struct MilestoneLookup {
    entries: Vec<(String, String)>,
}

impl MilestoneLookup {
    fn new(timelines: &[Row]) -> Self {
        let entries = timelines
            .iter()
            .filter_map(|t| {
                let name = t.get("milestone_name").and_then(scalar_text)?;
                let id = t.get("id").and_then(scalar_text)?;
                Some((name.trim().to_lowercase(), id))
            })
            .collect();
        Self { entries }
    }

    fn all(&self, name: &str) -> Vec<&str> {
        let key = name.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == key)
            .map(|(_, id)| id.as_str())
            .collect()
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.all(name).into_iter().next()
    }
}
