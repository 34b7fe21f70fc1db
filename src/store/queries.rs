//! SQL query constants and builders
//!
//! Identifiers are always quoted; values only ever travel as bind parameters.
//! Row payloads are shipped as one JSONB parameter and expanded server-side
//! with `jsonb_populate_recordset`, which lets PostgreSQL coerce each value to
//! the target column type.

use super::{value_text, Filter, TableRef};

/// Column names of a table
pub const GET_COLUMNS: &str = r#"
    SELECT c.column_name::text AS column_name
    FROM information_schema.columns c
    WHERE c.table_schema = $1
        AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

/// Recompute derived milestone start dates for one plan; one row per timeline touched
pub const RECALCULATE_START_DATES: &str =
    "SELECT * FROM ops.calculate_timeline_start_dates($1::text)";

/// A WHERE clause plus the text parameters it binds, numbered from an offset
#[derive(Debug, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<BindValue>,
}

/// Parameter bound by a filter
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    TextArray(Vec<String>),
}

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// `"schema"."table"`
    pub fn qualified(table: &TableRef) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(table.schema),
            Self::quote_ident(table.name)
        )
    }

    fn column_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build ALTER TABLE ADD COLUMN IF NOT EXISTS
    pub fn add_column(table: &TableRef, column: &str, sql_type: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            Self::qualified(table),
            Self::quote_ident(column),
            sql_type
        )
    }

    /// Batch insert from a JSONB array bound at `$1`
    pub fn insert(table: &TableRef, columns: &[String]) -> String {
        let cols = Self::column_list(columns);
        format!(
            "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_recordset(NULL::{table}, $1::jsonb)",
            table = Self::qualified(table),
        )
    }

    /// Batch upsert from a JSONB array bound at `$1`, returning stored rows as JSONB
    pub fn upsert(table: &TableRef, columns: &[String], conflict: &[&str]) -> String {
        let cols = Self::column_list(columns);
        let conflict_cols = conflict
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = columns
            .iter()
            .map(|c| {
                let q = Self::quote_ident(c);
                format!("{q} = EXCLUDED.{q}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {table} AS t ({cols}) \
             SELECT {cols} FROM jsonb_populate_recordset(NULL::{table}, $1::jsonb) \
             ON CONFLICT ({conflict_cols}) DO UPDATE SET {assignments} \
             RETURNING to_jsonb(t.*) AS row",
            table = Self::qualified(table),
        )
    }

    /// Update from a JSONB object bound at `$1`; filters bind from `$2`
    pub fn update(table: &TableRef, columns: &[String], filters: &WhereClause) -> String {
        let cols = Self::column_list(columns);
        format!(
            "UPDATE {table} SET ({cols}) = (SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1::jsonb)) WHERE {filters}",
            table = Self::qualified(table),
            filters = filters.sql,
        )
    }

    pub fn delete(table: &TableRef, filters: &WhereClause) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            Self::qualified(table),
            filters.sql
        )
    }

    pub fn select(table: &TableRef, filters: &WhereClause) -> String {
        let mut sql = format!("SELECT to_jsonb(t.*) AS row FROM {} AS t", Self::qualified(table));
        if !filters.sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.sql);
        }
        sql
    }

    /// Render filters as a conjunction with parameters numbered from `first_param`
    pub fn where_clause(filters: &[Filter], first_param: usize) -> WhereClause {
        let mut parts = Vec::with_capacity(filters.len());
        let mut params = Vec::new();

        for filter in filters {
            let column = Self::quote_ident(filter.column());
            match filter {
                Filter::Eq(_, value) => match value_text(value) {
                    Some(text) => {
                        params.push(BindValue::Text(text));
                        parts.push(format!("{}::text = ${}", column, first_param + params.len() - 1));
                    }
                    None => parts.push(format!("{} IS NULL", column)),
                },
                Filter::In(_, values) => {
                    let texts: Vec<String> = values.iter().filter_map(value_text).collect();
                    params.push(BindValue::TextArray(texts));
                    parts.push(format!("{}::text = ANY(${})", column, first_param + params.len() - 1));
                }
            }
        }

        WhereClause {
            sql: parts.join(" AND "),
            params,
        }
    }
}
