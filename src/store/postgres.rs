//! PostgreSQL implementation of the storage port

use super::queries::{BindValue, SqlBuilder, GET_COLUMNS};
use super::{Filter, Row, Store, StoreError, TableRef};
use crate::schema::ColumnType;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::{Json, ToSql};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Store backed by a deadpool-managed PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Rows grouped by their exact column set, in first-seen order.
///
/// `jsonb_populate_recordset` fills absent keys with NULL, so rows with
/// different shapes go out as separate statements; a column a row does not
/// carry is then neither overwritten on conflict nor forced to NULL on insert.
/// Callers wanting a full replace send every column, explicit nulls included.
fn group_by_shape(rows: &[Row]) -> Vec<(Vec<String>, Vec<Row>)> {
    let mut groups: Vec<(Vec<String>, Vec<Row>)> = Vec::new();
    for row in rows {
        let shape: Vec<String> = row.keys().cloned().collect();
        match groups.iter_mut().find(|(s, _)| *s == shape) {
            Some((_, members)) => members.push(row.clone()),
            None => groups.push((shape, vec![row.clone()])),
        }
    }
    groups
}

fn require_filters(operation: &'static str, table: &TableRef, filters: &[Filter]) -> Result<(), StoreError> {
    if filters.is_empty() {
        return Err(StoreError::Unfiltered {
            operation,
            table: table.to_string(),
        });
    }
    Ok(())
}

fn rows_payload(rows: &[Row]) -> Value {
    Value::Array(rows.iter().cloned().map(Value::Object).collect())
}

fn bind_params(values: &[BindValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    values
        .iter()
        .map(|v| -> Box<dyn ToSql + Sync + Send> {
            match v {
                BindValue::Text(s) => Box::new(s.clone()),
                BindValue::TextArray(items) => Box::new(items.clone()),
            }
        })
        .collect()
}

fn as_refs(params: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn into_row(table: &TableRef, value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRow {
            table: table.to_string(),
            message: format!("expected a JSON object, got {other}"),
        }),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_columns(&self, table: &TableRef) -> Result<HashSet<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client.query(GET_COLUMNS, &[&table.schema, &table.name]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>("column_name")).collect())
    }

    async fn add_column_if_not_exists(
        &self,
        table: &TableRef,
        column: &str,
        column_type: ColumnType,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let sql = SqlBuilder::add_column(table, column, column_type.sql());
        debug!("Executing: {}", sql);
        client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        table: &TableRef,
        rows: &[Row],
        conflict: &[&str],
    ) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;

        let mut stored = Vec::with_capacity(rows.len());
        for (columns, group) in group_by_shape(rows) {
            let sql = SqlBuilder::upsert(table, &columns, conflict);
            let payload = rows_payload(&group);
            for r in client.query(&sql, &[&Json(&payload)]).await? {
                stored.push(into_row(table, r.get::<_, Value>("row"))?);
            }
        }
        Ok(stored)
    }

    async fn insert(&self, table: &TableRef, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await?;

        let mut inserted = 0;
        for (columns, group) in group_by_shape(rows) {
            let sql = SqlBuilder::insert(table, &columns);
            inserted += client.execute(&sql, &[&Json(&rows_payload(&group))]).await?;
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        table: &TableRef,
        values: &Row,
        filters: &[Filter],
    ) -> Result<u64, StoreError> {
        require_filters("update", table, filters)?;
        if values.is_empty() {
            return Ok(0);
        }
        let columns: Vec<String> = values.keys().cloned().collect();
        let clause = SqlBuilder::where_clause(filters, 2);
        let sql = SqlBuilder::update(table, &columns, &clause);

        let payload = Value::Object(values.clone());
        let json = Json(&payload);
        let bound = bind_params(&clause.params);
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&json];
        params.extend(as_refs(&bound));

        let client = self.pool.get().await?;
        Ok(client.execute(&sql, &params).await?)
    }

    async fn delete(&self, table: &TableRef, filters: &[Filter]) -> Result<u64, StoreError> {
        require_filters("delete", table, filters)?;
        let clause = SqlBuilder::where_clause(filters, 1);
        let sql = SqlBuilder::delete(table, &clause);
        let bound = bind_params(&clause.params);

        let client = self.pool.get().await?;
        Ok(client.execute(&sql, &as_refs(&bound)).await?)
    }

    async fn select(&self, table: &TableRef, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let clause = SqlBuilder::where_clause(filters, 1);
        let sql = SqlBuilder::select(table, &clause);
        let bound = bind_params(&clause.params);

        let client = self.pool.get().await?;
        let rows = client.query(&sql, &as_refs(&bound)).await?;
        rows.into_iter()
            .map(|r| into_row(table, r.get::<_, Value>("row")))
            .collect()
    }

    async fn replace(
        &self,
        table: &TableRef,
        filters: &[Filter],
        rows: &[Row],
    ) -> Result<u64, StoreError> {
        require_filters("replace", table, filters)?;
        let clause = SqlBuilder::where_clause(filters, 1);
        let delete_sql = SqlBuilder::delete(table, &clause);
        let bound = bind_params(&clause.params);

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let removed = tx.execute(&delete_sql, &as_refs(&bound)).await?;

        let mut inserted = 0;
        for (columns, group) in group_by_shape(rows) {
            let insert_sql = SqlBuilder::insert(table, &columns);
            inserted += tx.execute(&insert_sql, &[&Json(&rows_payload(&group))]).await?;
        }
        tx.commit().await?;

        debug!("Replaced {} rows with {} rows in {}", removed, inserted, table);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_grouped_by_shape() {
        let rows = vec![
            json!({"id": "a", "row_number": 0}).as_object().cloned().unwrap(),
            json!({"id": "b"}).as_object().cloned().unwrap(),
            json!({"row_number": 99, "id": "c"}).as_object().cloned().unwrap(),
        ];
        let groups = group_by_shape(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec!["id", "row_number"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, vec!["id"]);
    }

    #[test]
    fn test_unfiltered_delete_is_refused() {
        let table = TableRef::new("ops", "tracking_plan_dependencies");
        let err = require_filters("delete", &table, &[]).unwrap_err();
        assert!(err.to_string().contains("unfiltered delete"));
    }
}
