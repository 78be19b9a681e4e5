//! # geotrack-engine
//!
//! Detection engines for geotrack.
//!
//! This crate provides:
//! - Batch ingestion with per-point validation
//! - The geofence enter/exit/dwell state machine
//! - The route-deviation state machine
//! - Crash-gap catch-up and the retention scheduler
//! - Event handlers and the dispatcher that feeds them from the bus
//! - The area/route deletion saga
//! - OpenTelemetry instruments for batch, evaluation and transition counts
//!
//! Engines depend only on the repository traits in `geotrack-core`; wire them
//! to PostgreSQL repositories in production or to the in-memory store in
//! tests.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use geotrack_engine::{default_handlers, EventDispatcher, Stores};
//!
//! let bus = EventBus::new(1024);
//! let stores = Stores::shared(memory_store);
//! let publisher: Arc<dyn EventPublisher> = Arc::new(bus.clone());
//!
//! let handle = default_handlers(&stores, publisher, GeofenceConfig::default(), RouteDeviationConfig::default())
//!     .into_iter()
//!     .fold(EventDispatcher::new(bus, DispatcherConfig::default()), |d, h| d.with_shared_handler(h))
//!     .start();
//!
//! handle.shutdown().await?;
//! ```

use std::sync::Arc;

pub mod catchup;
pub mod dispatcher;
pub mod geofence;
pub mod handler;
pub mod ingestion;
pub mod lifecycle;
pub mod metrics;
pub mod retention;
pub mod route_deviation;

// Re-export core types
pub use geotrack_core::*;

pub use catchup::{CatchUpJob, CatchUpReport};
pub use dispatcher::{DispatcherEvent, DispatcherHandle, EventDispatcher};
pub use geofence::{apply_hysteresis, compute_confidence, GeofenceEngine};
pub use handler::{
    default_handlers, AreaChangeHandler, EventHandler, GeoEventHandler, LocationPointHandler,
    RouteChangeHandler, RouteDeviationHandler,
};
pub use ingestion::IngestionPipeline;
pub use lifecycle::LifecycleService;
pub use metrics::{metrics, EngineMetrics};
pub use retention::{RetentionEvent, RetentionHandle, RetentionReport, RetentionScheduler};
pub use route_deviation::{decide_deviation, RouteDeviationEngine};

/// Repository handles shared by the engines.
#[derive(Clone)]
pub struct Stores {
    pub location_points: Arc<dyn LocationPointRepository>,
    pub latest_positions: Arc<dyn LatestPositionRepository>,
    pub geofence_states: Arc<dyn GeofenceStateRepository>,
    pub route_deviation_states: Arc<dyn RouteDeviationStateRepository>,
    pub areas: Arc<dyn AreaRepository>,
    pub routes: Arc<dyn RouteRepository>,
    pub retention: Arc<dyn RetentionRepository>,
}

impl Stores {
    /// Use one store for every repository.
    pub fn shared<S>(store: S) -> Self
    where
        S: LocationPointRepository
            + LatestPositionRepository
            + GeofenceStateRepository
            + RouteDeviationStateRepository
            + AreaRepository
            + RouteRepository
            + RetentionRepository
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            location_points: store.clone(),
            latest_positions: store.clone(),
            geofence_states: store.clone(),
            route_deviation_states: store.clone(),
            areas: store.clone(),
            routes: store.clone(),
            retention: store,
        }
    }
}

/// Accuracy gate shared by the geofence and route-deviation engines.
///
/// Non-positive accuracy is a fabricated fix, not a perfect one.
pub(crate) fn accuracy_usable(accuracy: f64, max_accuracy_m: f64) -> bool {
    accuracy > 0.0 && accuracy <= max_accuracy_m
}
