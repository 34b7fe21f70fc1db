//! Column type inference

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Storage type chosen for a newly discovered column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Boolean,
    Integer,
    Decimal,
    Json,
    Text,
}

impl ColumnType {
    /// Infer the column type from a sample value.
    ///
    /// Null gives TEXT, the widest type we can later hold anything in.
    /// Floats with no fractional part count as integral.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => ColumnType::Integer,
                _ => ColumnType::Decimal,
            },
            Value::Object(_) | Value::Array(_) => ColumnType::Json,
            Value::Null | Value::String(_) => ColumnType::Text,
        }
    }

    /// PostgreSQL type name
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "BIGINT",
            ColumnType::Decimal => "NUMERIC",
            ColumnType::Json => "JSONB",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}
