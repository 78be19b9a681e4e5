//! Location point repository: bulk ingestion writes and the catch-up query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geotrack_core::{
    Error, LocationPoint, LocationPointRepository, LocationSource, Result, UnprocessedPoint,
};

/// PostgreSQL implementation of LocationPointRepository.
#[derive(Clone)]
pub struct PgLocationPointRepository {
    pool: Pool<Postgres>,
}

impl PgLocationPointRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Fetch a single point by id (diagnostics and tests).
    pub async fn get(&self, id: Uuid) -> Result<Option<LocationPoint>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, ts, ingested_at, latitude, longitude, accuracy,
                   altitude, speed, bearing, source, extras
            FROM location_points
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| LocationPoint {
            id: row.get("id"),
            subject_id: row.get("subject_id"),
            ts: row.get("ts"),
            ingested_at: row.get("ingested_at"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            accuracy: row.get("accuracy"),
            altitude: row.get("altitude"),
            speed: row.get("speed"),
            bearing: row.get("bearing"),
            source: LocationSource::from_code(i32::from(row.get::<i16, _>("source")))
                .unwrap_or(LocationSource::Gps),
            extras: row.get("extras"),
        }))
    }
}

#[async_trait]
impl LocationPointRepository for PgLocationPointRepository {
    async fn insert_batch(&self, points: &[LocationPoint]) -> Result<u64> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(points.len());
        let mut subjects = Vec::with_capacity(points.len());
        let mut timestamps = Vec::with_capacity(points.len());
        let mut ingested = Vec::with_capacity(points.len());
        let mut lats = Vec::with_capacity(points.len());
        let mut lons = Vec::with_capacity(points.len());
        let mut accuracies = Vec::with_capacity(points.len());
        let mut altitudes: Vec<Option<f64>> = Vec::with_capacity(points.len());
        let mut speeds: Vec<Option<f64>> = Vec::with_capacity(points.len());
        let mut bearings: Vec<Option<f64>> = Vec::with_capacity(points.len());
        let mut sources = Vec::with_capacity(points.len());
        let mut extras: Vec<JsonValue> = Vec::with_capacity(points.len());

        for p in points {
            ids.push(p.id);
            subjects.push(p.subject_id.clone());
            timestamps.push(p.ts);
            ingested.push(p.ingested_at);
            lats.push(p.latitude);
            lons.push(p.longitude);
            accuracies.push(p.accuracy);
            altitudes.push(p.altitude);
            speeds.push(p.speed);
            bearings.push(p.bearing);
            sources.push(p.source.code());
            extras.push(p.extras.clone());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO location_points (
                id, subject_id, ts, ingested_at, latitude, longitude, accuracy,
                altitude, speed, bearing, source, extras
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::varchar[], $3::timestamptz[], $4::timestamptz[],
                $5::float8[], $6::float8[], $7::float8[],
                $8::float8[], $9::float8[], $10::float8[], $11::int2[], $12::jsonb[]
            )
            "#,
        )
        .bind(&ids)
        .bind(&subjects)
        .bind(&timestamps)
        .bind(&ingested)
        .bind(&lats)
        .bind(&lons)
        .bind(&accuracies)
        .bind(&altitudes)
        .bind(&speeds)
        .bind(&bearings)
        .bind(&sources)
        .bind(&extras)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn find_unprocessed(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UnprocessedPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (lp.subject_id)
                   lp.id AS point_id, lp.subject_id, lp.latitude, lp.longitude,
                   lp.accuracy, lp.ts
            FROM location_points lp
            LEFT JOIN latest_positions lpos ON lp.subject_id = lpos.subject_id
            WHERE lp.ingested_at > $1
              AND (lpos.subject_id IS NULL OR lpos.ts < lp.ts)
            ORDER BY lp.subject_id, lp.ts DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| UnprocessedPoint {
                point_id: row.get("point_id"),
                subject_id: row.get("subject_id"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                accuracy: row.get("accuracy"),
                ts: row.get("ts"),
            })
            .collect())
    }
}
