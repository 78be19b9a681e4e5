//! Area repository (PostGIS).
//!
//! Areas are reference data owned by an outside CRUD layer; the engine only
//! relies on the bounding-box candidate query and precise containment. `create`
//! derives geometry, bbox, area and perimeter in the same INSERT statement so a
//! row can never exist without its spatial data.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geotrack_core::defaults::{STATE_ACTIVE, STATE_DELETED};
use geotrack_core::{Area, AreaRepository, AreaType, CreateAreaRequest, Error, Result};

const AREA_COLUMNS: &str = "id, owner_id, name, description, area_type, area_m2, perimeter_m, \
                            state, created_at, modified_at";

fn row_to_area(row: &PgRow) -> Area {
    Area {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        area_type: AreaType::from_code(row.get("area_type")),
        area_m2: row.get("area_m2"),
        perimeter_m: row.get("perimeter_m"),
        state: row.get("state"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    }
}

/// PostgreSQL implementation of AreaRepository.
#[derive(Clone)]
pub struct PgAreaRepository {
    pool: Pool<Postgres>,
}

impl PgAreaRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create an active area from a GeoJSON Polygon/MultiPolygon.
    pub async fn create(&self, req: CreateAreaRequest) -> Result<Area> {
        let row = sqlx::query(&format!(
            r#"
            WITH g AS (
                SELECT ST_Multi(ST_SetSRID(ST_GeomFromGeoJSON($6), 4326)) AS geom
            )
            INSERT INTO areas (
                id, owner_id, name, description, area_type, geometry_json,
                geom, bbox, area_m2, perimeter_m, state
            )
            SELECT $1, $2, $3, $4, $5, $6,
                   g.geom, ST_Envelope(g.geom),
                   ST_Area(g.geom::geography), ST_Perimeter(g.geom::geography), $7
            FROM g
            WHERE ST_IsValid(g.geom)
              AND GeometryType(g.geom) = 'MULTIPOLYGON'
            RETURNING {AREA_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&req.owner_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.area_type.code())
        .bind(&req.geometry_geojson)
        .bind(STATE_ACTIVE)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_area)
            .ok_or_else(|| Error::InvalidInput("area geometry must be a valid polygon".into()))
    }
}

#[async_trait]
impl AreaRepository for PgAreaRepository {
    async fn candidates_for_point(
        &self,
        latitude: f64,
        longitude: f64,
        limit: usize,
    ) -> Result<Vec<Area>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {AREA_COLUMNS}
            FROM areas
            WHERE deleted_at IS NULL
              AND state = $3
              AND ST_Intersects(bbox, ST_SetSRID(ST_Point($1, $2), 4326))
            ORDER BY id
            LIMIT $4
            "#
        ))
        .bind(longitude)
        .bind(latitude)
        .bind(STATE_ACTIVE)
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_area).collect())
    }

    async fn contains_point(&self, area_id: Uuid, latitude: f64, longitude: f64) -> Result<bool> {
        let contains: Option<bool> = sqlx::query_scalar(
            "SELECT ST_Contains(geom, ST_SetSRID(ST_Point($2, $3), 4326)) FROM areas WHERE id = $1",
        )
        .bind(area_id)
        .bind(longitude)
        .bind(latitude)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        contains.ok_or_else(|| Error::NotFound(format!("area {}", area_id)))
    }

    async fn get(&self, area_id: Uuid) -> Result<Option<Area>> {
        let row = sqlx::query(&format!("SELECT {AREA_COLUMNS} FROM areas WHERE id = $1"))
            .bind(area_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_area))
    }

    async fn mark_deleted(&self, area_id: Uuid) -> Result<Area> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE areas
            SET state = $2, deleted_at = NOW(), modified_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {AREA_COLUMNS}
            "#
        ))
        .bind(area_id)
        .bind(STATE_DELETED)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(row_to_area)
            .ok_or_else(|| Error::NotFound(format!("area {}", area_id)))
    }
}
