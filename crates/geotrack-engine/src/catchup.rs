//! Catch-up job: re-announce points that were persisted but never reflected
//! in downstream state (a crash between the bulk write and emission, or a
//! lost event).
//!
//! One point per lagging subject is re-emitted per run; the ordering guard
//! makes the replay harmless if the point was in fact processed.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use geotrack_core::events::PointIngested;
use geotrack_core::{CatchUpConfig, EventPublisher, GeoBusEvent, LocationPointRepository, Result};

use crate::metrics::metrics;

/// Outcome of one catch-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    pub found: usize,
    pub emitted: usize,
}

pub struct CatchUpJob {
    points: Arc<dyn LocationPointRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: CatchUpConfig,
}

impl CatchUpJob {
    pub fn new(
        points: Arc<dyn LocationPointRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: CatchUpConfig,
    ) -> Self {
        Self {
            points,
            publisher,
            config,
        }
    }

    pub async fn run(&self) -> Result<CatchUpReport> {
        self.run_at(Utc::now()).await
    }

    /// Run with the lookback window ending at `now`.
    #[instrument(skip(self))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CatchUpReport> {
        let start = Instant::now();
        let since = now - self.config.lookback;
        let rows = self
            .points
            .find_unprocessed(since, self.config.batch_size)
            .await?;

        let mut report = CatchUpReport {
            found: rows.len(),
            emitted: 0,
        };
        for row in rows {
            let event = GeoBusEvent::PointIngested(PointIngested {
                point_id: row.point_id,
                subject_id: row.subject_id.clone(),
                latitude: row.latitude,
                longitude: row.longitude,
                accuracy: row.accuracy,
                timestamp: row.ts.timestamp_millis(),
            });
            match self.publisher.publish(event) {
                Ok(()) => report.emitted += 1,
                Err(e) => warn!(
                    subsystem = "catchup",
                    subject_id = %row.subject_id,
                    point_id = %row.point_id,
                    error = %e,
                    "Failed to re-emit point"
                ),
            }
        }

        info!(
            subsystem = "catchup",
            op = "run",
            found = report.found,
            emitted = report.emitted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Catch-up run complete"
        );
        metrics().record_catchup(report.emitted);
        Ok(report)
    }
}
