//! Route deviation state repository, keyed by (subject_id, route_id).

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use geotrack_core::{
    Error, Result, RouteDeviationState, RouteDeviationStateRepository, RouteDeviationStateTx,
};

const STATE_COLUMNS: &str = "subject_id, route_id, deviated, consecutive_off_route, \
                             last_deviation_event_at, last_point_ts, last_lat, last_lon, updated_at";

fn row_to_state(row: &PgRow) -> RouteDeviationState {
    RouteDeviationState {
        subject_id: row.get("subject_id"),
        route_id: row.get("route_id"),
        deviated: row.get("deviated"),
        consecutive_off_route: row.get("consecutive_off_route"),
        last_deviation_event_at: row.get("last_deviation_event_at"),
        last_point_ts: row.get("last_point_ts"),
        last_lat: row.get("last_lat"),
        last_lon: row.get("last_lon"),
        updated_at: row.get("updated_at"),
    }
}

/// PostgreSQL implementation of RouteDeviationStateRepository.
#[derive(Clone)]
pub struct PgRouteDeviationStateRepository {
    pool: Pool<Postgres>,
}

impl PgRouteDeviationStateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteDeviationStateRepository for PgRouteDeviationStateRepository {
    async fn begin(&self) -> Result<Box<dyn RouteDeviationStateTx>> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Box::new(PgRouteDeviationStateTx { tx }))
    }

    async fn get(
        &self,
        subject_id: &str,
        route_id: Uuid,
    ) -> Result<Option<RouteDeviationState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM route_deviation_states \
             WHERE subject_id = $1 AND route_id = $2"
        ))
        .bind(subject_id)
        .bind(route_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_state))
    }

    async fn delete_by_route(&self, route_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM route_deviation_states WHERE route_id = $1")
            .bind(route_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM route_deviation_states WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

/// An open route-deviation transaction. Dropping it without `commit` rolls back.
pub struct PgRouteDeviationStateTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RouteDeviationStateTx for PgRouteDeviationStateTx {
    async fn lock_state(
        &mut self,
        subject_id: &str,
        route_id: Uuid,
    ) -> Result<Option<RouteDeviationState>> {
        // Placeholder row so a fresh pair has something to lock
        sqlx::query(
            "INSERT INTO route_deviation_states (subject_id, route_id) VALUES ($1, $2) \
             ON CONFLICT (subject_id, route_id) DO NOTHING",
        )
        .bind(subject_id)
        .bind(route_id)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM route_deviation_states \
             WHERE subject_id = $1 AND route_id = $2 FOR UPDATE"
        ))
        .bind(subject_id)
        .bind(route_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_state))
    }

    async fn upsert_state(&mut self, state: &RouteDeviationState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO route_deviation_states (
                subject_id, route_id, deviated, consecutive_off_route,
                last_deviation_event_at, last_point_ts, last_lat, last_lon, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (subject_id, route_id) DO UPDATE SET
                deviated = EXCLUDED.deviated,
                consecutive_off_route = EXCLUDED.consecutive_off_route,
                last_deviation_event_at = EXCLUDED.last_deviation_event_at,
                last_point_ts = EXCLUDED.last_point_ts,
                last_lat = EXCLUDED.last_lat,
                last_lon = EXCLUDED.last_lon,
                updated_at = NOW()
            "#,
        )
        .bind(&state.subject_id)
        .bind(state.route_id)
        .bind(state.deviated)
        .bind(state.consecutive_off_route)
        .bind(state.last_deviation_event_at)
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
