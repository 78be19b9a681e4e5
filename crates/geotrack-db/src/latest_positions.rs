//! Latest position per subject, maintained with a monotonic conditional upsert.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use geotrack_core::{Error, LatestPosition, LatestPositionRepository, Result};

/// PostgreSQL implementation of LatestPositionRepository.
#[derive(Clone)]
pub struct PgLatestPositionRepository {
    pool: Pool<Postgres>,
}

impl PgLatestPositionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LatestPositionRepository for PgLatestPositionRepository {
    async fn upsert(&self, position: &LatestPosition) -> Result<bool> {
        // An older ts leaves the stored row untouched.
        let result = sqlx::query(
            r#"
            INSERT INTO latest_positions (subject_id, latitude, longitude, accuracy, ts, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (subject_id) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                accuracy = EXCLUDED.accuracy,
                ts = EXCLUDED.ts,
                updated_at = NOW()
            WHERE EXCLUDED.ts >= latest_positions.ts
            "#,
        )
        .bind(&position.subject_id)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.accuracy)
        .bind(position.ts)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, subject_id: &str) -> Result<Option<LatestPosition>> {
        let row = sqlx::query(
            "SELECT subject_id, latitude, longitude, accuracy, ts FROM latest_positions WHERE subject_id = $1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| LatestPosition {
            subject_id: row.get("subject_id"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            accuracy: row.get("accuracy"),
            ts: row.get("ts"),
        }))
    }
}
