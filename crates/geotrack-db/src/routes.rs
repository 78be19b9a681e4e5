//! Route and route-assignment repository (PostGIS).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geotrack_core::defaults::{STATE_ACTIVE, STATE_DELETED};
use geotrack_core::{
    AssignedRoute, CreateRouteRequest, Error, Result, Route, RouteAssignment, RouteRepository,
};

const ROUTE_COLUMNS: &str = "r.id, r.owner_id, r.name, r.description, r.length_m, r.state, \
                             r.deviation_threshold_m, r.deviation_consecutive_count, \
                             r.deviation_cooldown_sec, r.created_at, r.modified_at";

fn row_to_route(row: &PgRow) -> Route {
    Route {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        length_m: row.get("length_m"),
        state: row.get("state"),
        deviation_threshold_m: row.get("deviation_threshold_m"),
        deviation_consecutive_count: row.get("deviation_consecutive_count"),
        deviation_cooldown_sec: row.get("deviation_cooldown_sec"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

/// PostgreSQL implementation of RouteRepository.
#[derive(Clone)]
pub struct PgRouteRepository {
    pool: Pool<Postgres>,
}

impl PgRouteRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create an active route from a GeoJSON LineString; length is computed in
    /// the same statement.
    pub async fn create(&self, req: CreateRouteRequest) -> Result<Route> {
        let row = sqlx::query(&format!(
            r#"
            WITH g AS (
                SELECT ST_SetSRID(ST_GeomFromGeoJSON($5), 4326) AS geom
            ), r AS (
                INSERT INTO routes (
                    id, owner_id, name, description, geometry_json, geom, length_m, state,
                    deviation_threshold_m, deviation_consecutive_count, deviation_cooldown_sec
                )
                SELECT $1, $2, $3, $4, $5, g.geom, ST_Length(g.geom::geography), $6, $7, $8, $9
                FROM g
                WHERE GeometryType(g.geom) = 'LINESTRING'
                RETURNING *
            )
            SELECT {ROUTE_COLUMNS} FROM r
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&req.owner_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.geometry_geojson)
        .bind(STATE_ACTIVE)
        .bind(req.deviation_threshold_m)
        .bind(req.deviation_consecutive_count)
        .bind(req.deviation_cooldown_sec)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_route)
            .ok_or_else(|| Error::InvalidInput("route geometry must be a linestring".into()))
    }

    /// Assign a route to a subject with an optional validity window.
    pub async fn create_assignment(
        &self,
        subject_id: &str,
        route_id: Uuid,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<RouteAssignment> {
        let row = sqlx::query(
            r#"
            INSERT INTO route_assignments (id, subject_id, route_id, valid_from, valid_until, state)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, subject_id, route_id, valid_from, valid_until, state
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(subject_id)
        .bind(route_id)
        .bind(valid_from)
        .bind(valid_until)
        .bind(STATE_ACTIVE)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(RouteAssignment {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            route_id: row.get("route_id"),
            valid_from: row.get("valid_from"),
            valid_until: row.get("valid_until"),
            state: row.get("state"),
        })
    }
}

#[async_trait]
impl RouteRepository for PgRouteRepository {
    async fn active_assignments_for_subject(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<AssignedRoute>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT ra.id AS assignment_id, {ROUTE_COLUMNS}
            FROM route_assignments ra
            JOIN routes r ON r.id = ra.route_id
            WHERE ra.subject_id = $1
              AND ra.state = $3
              AND ra.deleted_at IS NULL
              AND r.state = $3
              AND r.deleted_at IS NULL
              AND r.geom IS NOT NULL
              AND r.deviation_threshold_m IS NOT NULL
              AND (ra.valid_from IS NULL OR ra.valid_from <= $2)
              AND (ra.valid_until IS NULL OR ra.valid_until >= $2)
            ORDER BY ra.id
            "#
        ))
        .bind(subject_id)
        .bind(at)
        .bind(STATE_ACTIVE)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| AssignedRoute {
                assignment_id: row.get("assignment_id"),
                route: row_to_route(row),
            })
            .collect())
    }

    async fn distance_to_route(
        &self,
        route_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<f64> {
        let distance: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT ST_Distance(geom::geography, ST_SetSRID(ST_Point($2, $3), 4326)::geography)
            FROM routes
            WHERE id = $1
            "#,
        )
        .bind(route_id)
        .bind(longitude)
        .bind(latitude)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        distance.ok_or_else(|| Error::NotFound(format!("route {}", route_id)))
    }

    async fn get(&self, route_id: Uuid) -> Result<Option<Route>> {
        let row = sqlx::query(&format!("SELECT {ROUTE_COLUMNS} FROM routes r WHERE r.id = $1"))
            .bind(route_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_route))
    }

    async fn mark_deleted(&self, route_id: Uuid) -> Result<Route> {
        let row = sqlx::query(&format!(
            r#"
            WITH r AS (
                UPDATE routes
                SET state = $2, deleted_at = NOW(), modified_at = NOW()
                WHERE id = $1 AND deleted_at IS NULL
                RETURNING *
            )
            SELECT {ROUTE_COLUMNS} FROM r
            "#
        ))
        .bind(route_id)
        .bind(STATE_DELETED)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_route)
            .ok_or_else(|| Error::NotFound(format!("route {}", route_id)))
    }

    async fn delete_assignments_by_route(&self, route_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE route_assignments
            SET state = $2, deleted_at = NOW()
            WHERE route_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(route_id)
        .bind(STATE_DELETED)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
