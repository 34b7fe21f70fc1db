//! Storage port
//!
//! Every component reaches the relational store through the [`Store`] trait.
//! Rows travel as JSON objects keyed by column name, so columns discovered at
//! runtime never need a compile-time struct.

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod queries;

use crate::schema::ColumnType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

pub use postgres::PgStore;

/// One row: column name -> value
pub type Row = serde_json::Map<String, Value>;

/// Schema-qualified table name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: &'static str,
    pub name: &'static str,
}

impl TableRef {
    pub const fn new(schema: &'static str, name: &'static str) -> Self {
        Self { schema, name }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Row filter. Values are compared by their text form so that a filter
/// works the same against TEXT, UUID or numeric key columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn any<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) => c,
        }
    }

    /// Whether `row` satisfies this filter
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.column()).and_then(value_text);
        match self {
            Filter::Eq(_, expected) => actual == value_text(expected),
            Filter::In(_, values) => match actual {
                Some(a) => values.iter().filter_map(value_text).any(|v| v == a),
                None => false,
            },
        }
    }
}

/// Text form used for key comparison; `None` for null and structured values
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Invalid row for {table}: {message}")]
    InvalidRow { table: String, message: String },

    #[error("Refusing unfiltered {operation} on {table}")]
    Unfiltered {
        operation: &'static str,
        table: String,
    },

    #[error("Unexpected result: {0}")]
    Unexpected(String),
}

/// The operations the sync core needs from a relational store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Current column names of `table`
    async fn get_columns(&self, table: &TableRef) -> Result<HashSet<String>, StoreError>;

    /// Additive, idempotent DDL
    async fn add_column_if_not_exists(
        &self,
        table: &TableRef,
        column: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError>;

    /// Insert or update rows on `conflict`; returns the stored rows.
    ///
    /// Every key a row carries is written, nulls included. Columns the row
    /// omits keep their stored value.
    async fn upsert(
        &self,
        table: &TableRef,
        rows: &[Row],
        conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: &TableRef, rows: &[Row]) -> Result<u64, StoreError>;

    async fn update(
        &self,
        table: &TableRef,
        values: &Row,
        filters: &[Filter],
    ) -> Result<u64, StoreError>;

    async fn delete(&self, table: &TableRef, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn select(&self, table: &TableRef, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;

    /// Delete every row matching `filters` and insert `rows`, atomically.
    async fn replace(
        &self,
        table: &TableRef,
        filters: &[Filter],
        rows: &[Row],
    ) -> Result<u64, StoreError>;
}
