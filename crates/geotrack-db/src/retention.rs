//! Retention deletes and partition maintenance.
//!
//! Each delete removes at most `batch_size` rows via a `(tableoid, ctid)`
//! subselect so locks stay short; callers loop until fewer than `batch_size`
//! rows go. `tableoid` keeps the row address unique across partitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;

use geotrack_core::{Error, Result, RetentionRepository};

/// PostgreSQL implementation of RetentionRepository.
#[derive(Clone)]
pub struct PgRetentionRepository {
    pool: Pool<Postgres>,
}

impl PgRetentionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn delete_batch(
        &self,
        table: &'static str,
        column: &'static str,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE (tableoid, ctid) IN \
             (SELECT tableoid, ctid FROM {table} WHERE {column} < $1 LIMIT $2)"
        );
        let result = sqlx::query(&sql)
            .bind(cutoff)
            .bind(batch_size)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "retention",
            db_table = table,
            deleted = result.rows_affected(),
            "Retention batch deleted"
        );
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RetentionRepository for PgRetentionRepository {
    async fn delete_location_points_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        self.delete_batch("location_points", "ingested_at", cutoff, batch_size)
            .await
    }

    async fn delete_geo_events_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        self.delete_batch("geo_events", "ts", cutoff, batch_size).await
    }

    async fn delete_geofence_states_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        self.delete_batch("geofence_states", "updated_at", cutoff, batch_size)
            .await
    }

    async fn ensure_partitions(&self, months_ahead: i32) -> Result<()> {
        sqlx::query("SELECT create_location_points_partitions($1)")
            .bind(months_ahead)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
