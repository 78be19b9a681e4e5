//! Batch ingestion: validate, normalize, bulk-persist, then announce each
//! accepted point on the bus.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use geotrack_core::events::PointIngested;
use geotrack_core::validation::{validate_batch_size, validate_point, validate_subject_id};
use geotrack_core::{
    EventPublisher, GeoBusEvent, IngestRequest, IngestResponse, IngestionConfig, LocationPoint,
    LocationPointRepository, Result,
};

use crate::metrics::metrics;

/// Ingestion pipeline for raw point batches.
pub struct IngestionPipeline {
    points: Arc<dyn LocationPointRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        points: Arc<dyn LocationPointRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            points,
            publisher,
            config,
        }
    }

    /// Ingest a batch, stamping it with the current time.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        self.ingest_at(request, Utc::now()).await
    }

    /// Ingest a batch as if received at `now`.
    ///
    /// An invalid subject id or an oversized batch rejects the whole request.
    /// Invalid points are counted as rejected. A failed emission is logged and
    /// left for catch-up.
    #[instrument(skip(self, request), fields(subject_id = %request.subject_id, batch = request.points.len()))]
    pub async fn ingest_at(
        &self,
        request: IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestResponse> {
        let start = Instant::now();
        let subject_id = validate_subject_id(&request.subject_id)?.to_string();
        if request.points.is_empty() {
            return Ok(IngestResponse::default());
        }
        validate_batch_size(request.points.len(), self.config.max_batch_size)?;

        let total = request.points.len();
        let mut accepted: Vec<LocationPoint> = Vec::with_capacity(total);
        for raw in request.points {
            let source = match validate_point(&raw, now) {
                Ok(source) => source,
                Err(e) => {
                    debug!(subsystem = "ingestion", subject_id = %subject_id, error = %e, "Point rejected");
                    continue;
                }
            };
            accepted.push(LocationPoint {
                id: Uuid::now_v7(),
                subject_id: subject_id.clone(),
                ts: raw.timestamp.unwrap_or(now),
                ingested_at: now,
                latitude: raw.latitude,
                longitude: raw.longitude,
                accuracy: raw.accuracy,
                altitude: raw.altitude,
                speed: raw.speed,
                bearing: raw.bearing,
                source,
                extras: raw.extras.unwrap_or_else(|| json!({})),
            });
        }
        let rejected = total - accepted.len();

        if !accepted.is_empty() {
            self.points.insert_batch(&accepted).await?;
        }

        for point in &accepted {
            let event = GeoBusEvent::PointIngested(PointIngested {
                point_id: point.id,
                subject_id: point.subject_id.clone(),
                latitude: point.latitude,
                longitude: point.longitude,
                accuracy: point.accuracy,
                timestamp: point.ts.timestamp_millis(),
            });
            if let Err(e) = self.publisher.publish(event) {
                warn!(
                    subsystem = "ingestion",
                    subject_id = %subject_id,
                    point_id = %point.id,
                    error = %e,
                    "Failed to emit point ingested event"
                );
            }
        }

        info!(
            subsystem = "ingestion",
            op = "ingest_batch",
            subject_id = %subject_id,
            accepted = accepted.len(),
            rejected,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch ingested"
        );
        metrics().record_ingest_batch(start.elapsed(), accepted.len(), rejected);

        Ok(IngestResponse {
            accepted: accepted.len(),
            rejected,
        })
    }
}
