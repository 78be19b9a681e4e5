//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use geo::{line_string, polygon, LineString, MultiPolygon};
use uuid::Uuid;

use geotrack_core::events::{PointIngested, RouteDeviationDetected};
use geotrack_core::{
    Error, EventPublisher, GeoBusEvent, GeofenceConfig, Result, RouteDeviationConfig,
};
use geotrack_db::MemoryStore;
use geotrack_engine::{default_handlers, EventHandler, Stores};

/// Publisher that records every event and can be told to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<GeoBusEvent>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<GeoBusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn ingested(&self) -> Vec<PointIngested> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GeoBusEvent::PointIngested(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn deviations(&self) -> Vec<RouteDeviationDetected> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GeoBusEvent::RouteDeviationDetected(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: GeoBusEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Emit("no active subscribers".into()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Memory store, recording publisher and the point handler wired together.
pub struct Harness {
    pub store: MemoryStore,
    pub stores: Stores,
    pub publisher: Arc<RecordingPublisher>,
    pub point_handler: Arc<dyn EventHandler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GeofenceConfig::default())
    }

    pub fn with_config(geofence: GeofenceConfig) -> Self {
        let store = MemoryStore::new();
        let stores = Stores::shared(store.clone());
        let publisher = Arc::new(RecordingPublisher::default());
        let point_handler = default_handlers(
            &stores,
            publisher.clone(),
            geofence,
            RouteDeviationConfig::default(),
        )
        .into_iter()
        .find(|h| h.name() == geotrack_core::events::POINT_INGESTED)
        .expect("point handler registered");
        Self {
            store,
            stores,
            publisher,
            point_handler,
        }
    }

    /// Run the point handler on a fix, as the dispatcher would.
    pub async fn process(&self, point: &PointIngested) {
        let event = GeoBusEvent::PointIngested(point.clone());
        self.point_handler.validate(&event).expect("valid point");
        self.point_handler.execute(&event).await.expect("point processed");
    }
}

/// A time with millisecond precision, so it survives the event payload.
pub fn base_time() -> DateTime<Utc> {
    let now = Utc::now() - Duration::hours(1);
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap()
}

pub fn fix(
    subject: &str,
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    ts: DateTime<Utc>,
) -> PointIngested {
    PointIngested {
        point_id: Uuid::now_v7(),
        subject_id: subject.to_string(),
        latitude,
        longitude,
        accuracy,
        timestamp: ts.timestamp_millis(),
    }
}

/// Right triangle with its right angle at (13.0, 52.0). Its bounding box
/// covers the square up to (13.1, 52.1), so points in the upper-right half
/// are bbox candidates that fail containment.
pub fn triangle() -> MultiPolygon<f64> {
    polygon![
        (x: 13.0, y: 52.0),
        (x: 13.1, y: 52.0),
        (x: 13.0, y: 52.1),
        (x: 13.0, y: 52.0),
    ]
    .into()
}

pub const INSIDE: (f64, f64) = (52.02, 13.02);
pub const OUTSIDE_IN_BBOX: (f64, f64) = (52.08, 13.08);

/// East-west route along latitude 52.0.
pub fn east_west() -> LineString<f64> {
    line_string![(x: 13.0, y: 52.0), (x: 13.1, y: 52.0)]
}

pub const ON_ROUTE: (f64, f64) = (52.0001, 13.05);
/// About 111 m north of the route.
pub const OFF_ROUTE: (f64, f64) = (52.001, 13.05);
