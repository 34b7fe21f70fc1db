//! In-memory store for unit tests.
//!
//! Semantics follow the PostgreSQL store: upserts replace the provided
//! columns of a conflicting row, `replace` is atomic, unfiltered deletes are
//! refused. Tables spring into existence on first touch with an `id` column.

use super::{Filter, Row, Store, StoreError, TableRef};
use crate::schema::ColumnType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemTable {
    columns: BTreeSet<String>,
    rows: Vec<Row>,
}

impl MemTable {
    fn new() -> Self {
        Self {
            columns: BTreeSet::from(["id".to_string()]),
            rows: Vec::new(),
        }
    }
}

/// A recorded write, for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    AddColumn { table: String, column: String, column_type: ColumnType },
    Upsert { table: String, keys: Vec<String> },
    Insert { table: String, count: usize },
    Update { table: String, filters: Vec<Filter> },
    Delete { table: String, filters: Vec<Filter> },
    Replace { table: String, count: usize },
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, MemTable>,
    ops: Vec<Op>,
    strict: bool,
    fail_introspection: bool,
    fail_ddl: bool,
    failing_tables: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn injected(table: &TableRef) -> StoreError {
    StoreError::Unexpected(format!("injected failure on {table}"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that mention columns the table does not have
    pub fn strict(self) -> Self {
        self.inner.lock().unwrap().strict = true;
        self
    }

    pub fn fail_introspection(&self) {
        self.inner.lock().unwrap().fail_introspection = true;
    }

    pub fn fail_ddl(&self) {
        self.inner.lock().unwrap().fail_ddl = true;
    }

    /// Every write or read against `table` fails from now on
    pub fn fail_table(&self, table: &TableRef) {
        self.inner.lock().unwrap().failing_tables.insert(table.to_string());
    }

    /// Seed a table with columns and rows, bypassing the op log
    pub fn seed(&self, table: &TableRef, rows: Vec<Value>) {
        let mut inner = self.inner.lock().unwrap();
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        for value in rows {
            let mut row = value.as_object().cloned().expect("seed rows are objects");
            row.entry("id".to_string())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            t.columns.extend(row.keys().cloned());
            t.rows.push(row);
        }
    }

    pub fn declare_columns(&self, table: &TableRef, columns: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        t.columns.extend(columns.iter().map(|c| c.to_string()));
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(&table.to_string())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn columns(&self, table: &TableRef) -> BTreeSet<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(&table.to_string())
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub fn deletes_on(&self, table: &TableRef) -> Vec<Vec<Filter>> {
        let name = table.to_string();
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Delete { table, filters } if table == name => Some(filters),
                _ => None,
            })
            .collect()
    }

    fn check(inner: &Inner, table: &TableRef, rows: &[&Row]) -> Result<(), StoreError> {
        let name = table.to_string();
        if inner.failing_tables.contains(&name) {
            return Err(injected(table));
        }
        if inner.strict {
            let known = inner.tables.get(&name).map(|t| &t.columns);
            for row in rows {
                for column in row.keys() {
                    if !known.map(|c| c.contains(column)).unwrap_or(false) {
                        return Err(StoreError::InvalidRow {
                            table: name.clone(),
                            message: format!("column \"{column}\" does not exist"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn with_id(row: &Row) -> Row {
    let mut row = row.clone();
    row.entry("id".to_string())
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    row
}

fn same_conflict(a: &Row, b: &Row, conflict: &[&str]) -> bool {
    conflict
        .iter()
        .all(|c| Filter::Eq(c.to_string(), b.get(*c).cloned().unwrap_or(Value::Null)).matches(a))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_columns(&self, table: &TableRef) -> Result<HashSet<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_introspection {
            return Err(StoreError::Unexpected("introspection unavailable".into()));
        }
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        Ok(t.columns.iter().cloned().collect())
    }

    async fn add_column_if_not_exists(
        &self,
        table: &TableRef,
        column: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_ddl {
            return Err(StoreError::Unexpected(format!("cannot add {column}")));
        }
        inner
            .tables
            .entry(table.to_string())
            .or_insert_with(MemTable::new)
            .columns
            .insert(column.to_string());
        inner.ops.push(Op::AddColumn {
            table: table.to_string(),
            column: column.to_string(),
            column_type,
        });
        Ok(())
    }

    async fn upsert(
        &self,
        table: &TableRef,
        rows: &[Row],
        conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &rows.iter().collect::<Vec<_>>())?;

        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            match t.rows.iter_mut().find(|existing| same_conflict(existing, row, conflict)) {
                Some(existing) => {
                    for (k, v) in row {
                        existing.insert(k.clone(), v.clone());
                    }
                    stored.push(existing.clone());
                }
                None => {
                    let row = with_id(row);
                    t.rows.push(row.clone());
                    stored.push(row);
                }
            }
        }

        let key = conflict.last().copied().unwrap_or("id");
        let keys = rows
            .iter()
            .filter_map(|r| r.get(key).and_then(super::value_text))
            .collect();
        inner.ops.push(Op::Upsert {
            table: table.to_string(),
            keys,
        });
        Ok(stored)
    }

    async fn insert(&self, table: &TableRef, rows: &[Row]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &rows.iter().collect::<Vec<_>>())?;
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        t.rows.extend(rows.iter().map(with_id));
        inner.ops.push(Op::Insert {
            table: table.to_string(),
            count: rows.len(),
        });
        Ok(rows.len() as u64)
    }

    async fn update(
        &self,
        table: &TableRef,
        values: &Row,
        filters: &[Filter],
    ) -> Result<u64, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::Unfiltered {
                operation: "update",
                table: table.to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &[values])?;
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        let mut count = 0;
        for row in t.rows.iter_mut().filter(|r| filters.iter().all(|f| f.matches(r))) {
            for (k, v) in values {
                row.insert(k.clone(), v.clone());
            }
            count += 1;
        }
        inner.ops.push(Op::Update {
            table: table.to_string(),
            filters: filters.to_vec(),
        });
        Ok(count)
    }

    async fn delete(&self, table: &TableRef, filters: &[Filter]) -> Result<u64, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::Unfiltered {
                operation: "delete",
                table: table.to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &[])?;
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        let before = t.rows.len();
        t.rows.retain(|r| !filters.iter().all(|f| f.matches(r)));
        let removed = (before - t.rows.len()) as u64;
        inner.ops.push(Op::Delete {
            table: table.to_string(),
            filters: filters.to_vec(),
        });
        Ok(removed)
    }

    async fn select(&self, table: &TableRef, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &[])?;
        Ok(inner
            .tables
            .get(&table.to_string())
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| filters.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        table: &TableRef,
        filters: &[Filter],
        rows: &[Row],
    ) -> Result<u64, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::Unfiltered {
                operation: "replace",
                table: table.to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, table, &rows.iter().collect::<Vec<_>>())?;
        let t = inner.tables.entry(table.to_string()).or_insert_with(MemTable::new);
        t.rows.retain(|r| !filters.iter().all(|f| f.matches(r)));
        t.rows.extend(rows.iter().map(with_id));
        inner.ops.push(Op::Replace {
            table: table.to_string(),
            count: rows.len(),
        });
        Ok(rows.len() as u64)
    }
}
