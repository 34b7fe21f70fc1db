//! Before/after collection reconciliation
//!
//! Given a parent's current child rows and, when known, the rows it had
//! before, bring the table in line: evolve the schema, upsert everything
//! current, delete what disappeared. Without a previous snapshot nothing is
//! deleted.
//!
//! Upserted rows replace what is stored: every row is written with the full
//! column set seen across the current and previous snapshots, so a field the
//! PLM cleared lands as NULL instead of keeping its old value.

use crate::payload::scalar_text;
use crate::schema::{sanitize_keys, SchemaEvolver};
use crate::store::{Filter, Row, Store, StoreError, TableRef};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a collection lives and how its rows are keyed
#[derive(Debug, Clone, Copy)]
pub struct CollectionTarget {
    pub table: TableRef,
    pub parent_column: &'static str,
    pub key_column: &'static str,
    /// Columns owned by another writer, left as stored when a row omits them
    pub kept_columns: &'static [&'static str],
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub upserted: usize,
    pub deleted: u64,
    pub columns_added: Vec<String>,
}

#[derive(Clone)]
pub struct CollectionReconciler {
    store: Arc<dyn Store>,
    evolver: SchemaEvolver,
}

impl CollectionReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let evolver = SchemaEvolver::new(store.clone());
        Self { store, evolver }
    }

    pub async fn reconcile(
        &self,
        target: &CollectionTarget,
        parent_id: &Value,
        current: Vec<Row>,
        previous: Option<&[Row]>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let table = &target.table;
        let mut outcome = ReconcileOutcome::default();

        let rows = dedupe_by_key(target, current);
        let columns = replacement_columns(target, &rows, previous);
        let rows: Vec<Row> = rows.into_iter().map(|row| fill_missing(row, &columns)).collect();
        let incoming: BTreeSet<String> = rows.iter().filter_map(|r| key_of(r, target.key_column)).collect();

        if !rows.is_empty() {
            let mut union = Row::new();
            union.insert(target.parent_column.to_string(), parent_id.clone());
            for row in &rows {
                merge_non_null(&mut union, row);
            }
            let evolved = self.evolver.ensure_columns(table, &union).await;
            outcome.columns_added = evolved.added.into_iter().map(|(c, _)| c).collect();

            let stored = self
                .store
                .upsert(table, &rows, &[target.parent_column, target.key_column])
                .await?;
            outcome.upserted = stored.len();
            info!("Upserted {} rows in {}", outcome.upserted, table);
        }

        let Some(previous) = previous else {
            debug!("No previous snapshot for {}, skipping deletions", table);
            return Ok(outcome);
        };
        let previous_keys: BTreeSet<String> = previous.iter().filter_map(|r| key_of(r, target.key_column)).collect();

        if rows.is_empty() {
            if !previous_keys.is_empty() {
                outcome.deleted = self
                    .store
                    .delete(table, &[Filter::Eq(target.parent_column.to_string(), parent_id.clone())])
                    .await?;
                info!("Empty collection for {}, deleted all {} rows of parent", table, outcome.deleted);
            }
            return Ok(outcome);
        }

        let removed: Vec<String> = previous_keys.difference(&incoming).cloned().collect();
        if !removed.is_empty() {
            outcome.deleted = self
                .store
                .delete(
                    table,
                    &[
                        Filter::Eq(target.parent_column.to_string(), parent_id.clone()),
                        Filter::any(target.key_column, removed.clone()),
                    ],
                )
                .await?;
            info!("Deleted {} removed rows from {}: {:?}", outcome.deleted, table, removed);
        }

        Ok(outcome)
    }
}

fn key_of(row: &Row, key_column: &str) -> Option<String> {
    row.get(key_column).and_then(scalar_text)
}

/// Sanitize keys, drop rows without a key, keep the last row per key.
fn dedupe_by_key(target: &CollectionTarget, rows: Vec<Row>) -> Vec<Row> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let row = sanitize_keys(&row);
        let Some(key) = key_of(&row, target.key_column) else {
            warn!("Skipping {} row without {}", target.table, target.key_column);
            continue;
        };
        match position.get(&key) {
            Some(&i) => out[i] = row,
            None => {
                position.insert(key, out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Every column a row of this parent may carry, minus the kept ones.
fn replacement_columns(
    target: &CollectionTarget,
    rows: &[Row],
    previous: Option<&[Row]>,
) -> BTreeSet<String> {
    let previous = previous.unwrap_or_default().iter().map(sanitize_keys);
    rows.iter()
        .cloned()
        .chain(previous)
        .flat_map(|row| row.into_iter().map(|(k, _)| k))
        .filter(|column| !target.kept_columns.contains(&column.as_str()))
        .collect()
}

fn fill_missing(mut row: Row, columns: &BTreeSet<String>) -> Row {
    for column in columns {
        if !row.contains_key(column) {
            row.insert(column.clone(), Value::Null);
        }
    }
    row
}

/// Union of fields; a later null never hides an earlier value.
fn merge_non_null(union: &mut Row, row: &Row) {
    for (k, v) in row {
        match union.get(k) {
            Some(existing) if !existing.is_null() && v.is_null() => {}
            _ => {
                union.insert(k.clone(), v.clone());
            }
        }
    }
}
