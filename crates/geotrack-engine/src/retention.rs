//! Retention scheduler: batched deletion of expired rows and monthly
//! partition maintenance for `location_points`.
//!
//! Runs once at start, then every `interval`, until shut down. Failures are
//! logged; the next tick tries again.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use geotrack_core::{Error, Result, RetentionConfig, RetentionRepository};

use crate::metrics::metrics;

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub location_points: u64,
    pub geo_events: u64,
    pub geofence_states: u64,
    pub partitions_ok: bool,
}

/// Event emitted by the running scheduler.
#[derive(Debug, Clone)]
pub enum RetentionEvent {
    Started,
    PassCompleted(RetentionReport),
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    LocationPoints,
    GeoEvents,
    GeofenceStates,
}

impl Target {
    fn table(self) -> &'static str {
        match self {
            Target::LocationPoints => "location_points",
            Target::GeoEvents => "geo_events",
            Target::GeofenceStates => "geofence_states",
        }
    }
}

/// Handle for controlling a running scheduler.
pub struct RetentionHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<RetentionEvent>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Retention task failed: {}", e)))
    }

    pub fn events(&self) -> broadcast::Receiver<RetentionEvent> {
        self.event_rx.resubscribe()
    }
}

pub struct RetentionScheduler {
    repo: Arc<dyn RetentionRepository>,
    config: RetentionConfig,
    event_tx: broadcast::Sender<RetentionEvent>,
}

impl RetentionScheduler {
    pub fn new(repo: Arc<dyn RetentionRepository>, config: RetentionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            repo,
            config,
            event_tx,
        }
    }

    /// Spawn the scheduling loop and return a handle for control.
    pub fn start(self) -> RetentionHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        RetentionHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "retention",
            interval_secs = self.config.interval.as_secs(),
            "Retention scheduler started"
        );
        let _ = self.event_tx.send(RetentionEvent::Started);

        // The first tick completes immediately.
        let period = self.config.interval.max(std::time::Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "retention", "Retention scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    let _ = self.event_tx.send(RetentionEvent::PassCompleted(report));
                }
            }
        }

        let _ = self.event_tx.send(RetentionEvent::Stopped);
        info!(subsystem = "retention", "Retention scheduler stopped");
    }

    /// One full pass. Never fails; errors are logged per table.
    pub async fn run_once(&self) -> RetentionReport {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RetentionReport {
        let start = Instant::now();
        let mut report = RetentionReport {
            location_points: self
                .purge(
                    Target::LocationPoints,
                    now - Duration::days(self.config.location_point_days),
                )
                .await,
            geo_events: self
                .purge(
                    Target::GeoEvents,
                    now - Duration::days(self.config.geo_event_days),
                )
                .await,
            geofence_states: self
                .purge(
                    Target::GeofenceStates,
                    now - Duration::days(self.config.geofence_state_days),
                )
                .await,
            partitions_ok: false,
        };

        match self
            .repo
            .ensure_partitions(self.config.partition_months_ahead)
            .await
        {
            Ok(()) => report.partitions_ok = true,
            Err(e) => warn!(
                subsystem = "retention",
                error = %e,
                "Partition maintenance failed"
            ),
        }

        info!(
            subsystem = "retention",
            op = "run_once",
            location_points = report.location_points,
            geo_events = report.geo_events,
            geofence_states = report.geofence_states,
            duration_ms = start.elapsed().as_millis() as u64,
            "Retention pass complete"
        );
        report
    }

    /// Delete in batches until a batch comes back short. Returns rows removed
    /// before any error.
    async fn purge(&self, target: Target, cutoff: DateTime<Utc>) -> u64 {
        let batch_size = self.config.batch_size;
        let mut total = 0;
        loop {
            let deleted = match self.delete_batch(target, cutoff, batch_size).await {
                Ok(n) => n,
                Err(e) => {
                    error!(
                        subsystem = "retention",
                        db_table = target.table(),
                        deleted = total,
                        error = %e,
                        "Retention delete failed"
                    );
                    return total;
                }
            };
            total += deleted;
            if deleted < batch_size.max(1) as u64 {
                break;
            }
        }
        debug!(
            subsystem = "retention",
            db_table = target.table(),
            deleted = total,
            "Retention purge complete"
        );
        metrics().record_retention(target.table(), total);
        total
    }

    async fn delete_batch(
        &self,
        target: Target,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        match target {
            Target::LocationPoints => {
                self.repo
                    .delete_location_points_before(cutoff, batch_size)
                    .await
            }
            Target::GeoEvents => self.repo.delete_geo_events_before(cutoff, batch_size).await,
            Target::GeofenceStates => {
                self.repo
                    .delete_geofence_states_before(cutoff, batch_size)
                    .await
            }
        }
    }
}
