//! Dynamic schema evolution
//!
//! Tables grow as the PLM introduces fields we have never seen:
//! - identifier sanitizing (external field name -> column name)
//! - type inference (JSON value -> column type)
//! - additive, idempotent column creation ahead of every write

pub mod evolution;
pub mod ident;
pub mod types;

pub use evolution::{sanitize_keys, EvolvedFields, SchemaEvolver};
pub use ident::sanitize;
pub use types::ColumnType;
