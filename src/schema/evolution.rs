//! Schema evolution manager
//!
//! Before a batch of rows is written, every field it carries must exist as a
//! column. Missing columns are added one by one with
//! `ADD COLUMN IF NOT EXISTS`; none of this is ever fatal for the write that
//! follows.

use super::{sanitize, ColumnType};
use crate::store::{Row, Store, TableRef};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields re-keyed by column name, plus what had to be added
#[derive(Debug, Default, Clone, Serialize)]
pub struct EvolvedFields {
    pub fields: Row,
    pub added: Vec<(String, ColumnType)>,
}

/// Adds missing columns through the storage port
#[derive(Clone)]
pub struct SchemaEvolver {
    store: Arc<dyn Store>,
}

impl SchemaEvolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Re-key `fields` by sanitized name and make sure each has a column.
    pub async fn ensure_columns(&self, table: &TableRef, fields: &Row) -> EvolvedFields {
        let renamed = sanitize_keys(fields);

        let existing = match self.store.get_columns(table).await {
            Ok(columns) => columns,
            Err(e) => {
                warn!("Could not read columns of {}, assuming none: {}", table, e);
                HashSet::new()
            }
        };

        let missing: Vec<(String, ColumnType)> = renamed
            .iter()
            .filter(|(column, _)| !existing.contains(column.as_str()))
            .map(|(column, value)| (column.clone(), ColumnType::infer(value)))
            .collect();

        if missing.is_empty() {
            debug!("No new columns needed for {}", table);
            return EvolvedFields {
                fields: renamed,
                added: Vec::new(),
            };
        }

        info!("Adding {} new columns to {}", missing.len(), table);
        let mut added = Vec::with_capacity(missing.len());
        for (column, column_type) in missing {
            match self
                .store
                .add_column_if_not_exists(table, &column, column_type)
                .await
            {
                Ok(()) => {
                    debug!("Added column {} ({}) to {}", column, column_type, table);
                    added.push((column, column_type));
                }
                Err(e) => warn!("Column {} may not have been created on {}: {}", column, table, e),
            }
        }

        EvolvedFields {
            fields: renamed,
            added,
        }
    }
}

/// Re-key by sanitized name; empty names are dropped, later keys win.
pub fn sanitize_keys(fields: &Row) -> Row {
    let mut out = Row::new();
    for (key, value) in fields {
        let column = sanitize(key);
        if column.is_empty() {
            debug!("Dropping field {:?}: no usable column name", key);
            continue;
        }
        out.insert(column, value.clone());
    }
    out
}
