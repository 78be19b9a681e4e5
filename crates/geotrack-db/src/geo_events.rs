//! Read access to the append-only geo event log. Writes happen inside
//! geofence state transactions.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use geotrack_core::{Error, GeoEvent, GeoEventRepository, GeoEventType, Result};

/// PostgreSQL implementation of GeoEventRepository.
#[derive(Clone)]
pub struct PgGeoEventRepository {
    pool: Pool<Postgres>,
}

impl PgGeoEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeoEventRepository for PgGeoEventRepository {
    async fn list_for_subject(&self, subject_id: &str, limit: i64) -> Result<Vec<GeoEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, area_id, event_type, ts, confidence, point_id
            FROM geo_events
            WHERE subject_id = $1
            ORDER BY ts DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(subject_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let code: i16 = row.get("event_type");
                let event_type = GeoEventType::from_code(code)
                    .ok_or_else(|| Error::Internal(format!("unknown geo event type {}", code)))?;
                Ok(GeoEvent {
                    id: row.get("id"),
                    subject_id: row.get("subject_id"),
                    area_id: row.get("area_id"),
                    event_type,
                    ts: row.get("ts"),
                    confidence: row.get("confidence"),
                    point_id: row.get("point_id"),
                })
            })
            .collect()
    }
}
