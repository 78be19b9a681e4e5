//! Geofence state repository.
//!
//! State rows are keyed by (subject_id, area_id). All transitions run inside a
//! [`PgGeofenceStateTx`], which reads the row with `SELECT ... FOR UPDATE` so
//! concurrent workers on the same key serialize at the row lock while workers
//! on different keys never block each other.
//!
//! A pair that has never been evaluated has no row to lock, so `lock_state`
//! first inserts an OUTSIDE placeholder (`ON CONFLICT DO NOTHING`). A second
//! worker racing on the same fresh pair blocks on the uncommitted key until
//! the first commits or rolls back. The placeholder shares the transaction, so
//! a rolled back evaluation leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Acquire, Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use geotrack_core::{
    Error, GeoEvent, GeoEventType, GeofenceState, GeofenceStateRepository, GeofenceStateTx,
    Result,
};

const STATE_COLUMNS: &str = "subject_id, area_id, inside, last_transition, enter_ts, \
                             last_point_ts, last_lat, last_lon, updated_at";

fn row_to_state(row: &PgRow) -> GeofenceState {
    GeofenceState {
        subject_id: row.get("subject_id"),
        area_id: row.get("area_id"),
        inside: row.get("inside"),
        last_transition: row.get("last_transition"),
        enter_ts: row.get("enter_ts"),
        last_point_ts: row.get("last_point_ts"),
        last_lat: row.get("last_lat"),
        last_lon: row.get("last_lon"),
        updated_at: row.get("updated_at"),
    }
}

/// PostgreSQL implementation of GeofenceStateRepository.
#[derive(Clone)]
pub struct PgGeofenceStateRepository {
    pool: Pool<Postgres>,
}

impl PgGeofenceStateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeofenceStateRepository for PgGeofenceStateRepository {
    async fn begin(&self) -> Result<Box<dyn GeofenceStateTx>> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Box::new(PgGeofenceStateTx { tx }))
    }

    async fn get(&self, subject_id: &str, area_id: Uuid) -> Result<Option<GeofenceState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM geofence_states WHERE subject_id = $1 AND area_id = $2"
        ))
        .bind(subject_id)
        .bind(area_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_state))
    }

    async fn delete_by_area(&self, area_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM geofence_states WHERE area_id = $1")
            .bind(area_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM geofence_states WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

/// An open geofence transaction. Dropping it without `commit` rolls back.
pub struct PgGeofenceStateTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GeofenceStateTx for PgGeofenceStateTx {
    async fn lock_state(
        &mut self,
        subject_id: &str,
        area_id: Uuid,
    ) -> Result<Option<GeofenceState>> {
        sqlx::query(
            "INSERT INTO geofence_states (subject_id, area_id) VALUES ($1, $2) \
             ON CONFLICT (subject_id, area_id) DO NOTHING",
        )
        .bind(subject_id)
        .bind(area_id)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM geofence_states \
             WHERE subject_id = $1 AND area_id = $2 FOR UPDATE"
        ))
        .bind(subject_id)
        .bind(area_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_state))
    }

    async fn dwell_exists_since(
        &mut self,
        subject_id: &str,
        area_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM geo_events
                WHERE subject_id = $1 AND area_id = $2 AND event_type = $3 AND ts >= $4
            )
            "#,
        )
        .bind(subject_id)
        .bind(area_id)
        .bind(GeoEventType::Dwell.code())
        .bind(since)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        Ok(exists)
    }

    /// Runs under a savepoint, so a failed insert leaves the transaction
    /// usable for the state write that follows.
    async fn insert_geo_event(&mut self, event: &GeoEvent) -> Result<()> {
        let mut savepoint = Acquire::begin(&mut self.tx)
            .await
            .map_err(Error::Database)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO geo_events (id, subject_id, area_id, event_type, ts, confidence, point_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.subject_id)
        .bind(event.area_id)
        .bind(event.event_type.code())
        .bind(event.ts)
        .bind(event.confidence)
        .bind(event.point_id)
        .execute(&mut *savepoint)
        .await;

        match inserted {
            Ok(_) => savepoint.commit().await.map_err(Error::Database),
            Err(e) => {
                savepoint.rollback().await.map_err(Error::Database)?;
                Err(Error::Database(e))
            }
        }
    }

    async fn upsert_state(&mut self, state: &GeofenceState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO geofence_states (
                subject_id, area_id, inside, last_transition, enter_ts,
                last_point_ts, last_lat, last_lon, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (subject_id, area_id) DO UPDATE SET
                inside = EXCLUDED.inside,
                last_transition = EXCLUDED.last_transition,
                enter_ts = EXCLUDED.enter_ts,
                last_point_ts = EXCLUDED.last_point_ts,
                last_lat = EXCLUDED.last_lat,
                last_lon = EXCLUDED.last_lon,
                updated_at = NOW()
            "#,
        )
        .bind(&state.subject_id)
        .bind(state.area_id)
        .bind(state.inside)
        .bind(state.last_transition)
        .bind(state.enter_ts)
        .bind(state.last_point_ts)
        .bind(state.last_lat)
        .bind(state.last_lon)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(Error::Database)
    }
}
