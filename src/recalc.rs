//! Milestone date recalculation
//!
//! The propagation arithmetic lives in the database; this port only triggers
//! it and reports how many timeline rows it touched.

use crate::store::queries::RECALCULATE_START_DATES;
use crate::store::StoreError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::info;

#[async_trait]
pub trait DateRecalculator: Send + Sync {
    async fn recalculate_start_dates(&self, plan_id: &str) -> Result<u64, StoreError>;
}

/// Calls `ops.calculate_timeline_start_dates`
#[derive(Clone)]
pub struct PgDateRecalculator {
    pool: Pool,
}

impl PgDateRecalculator {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DateRecalculator for PgDateRecalculator {
    async fn recalculate_start_dates(&self, plan_id: &str) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let rows = client.query(RECALCULATE_START_DATES, &[&plan_id]).await?;
        info!("Recalculated start dates for {} timeline records of plan {}", rows.len(), plan_id);
        Ok(rows.len() as u64)
    }
}
