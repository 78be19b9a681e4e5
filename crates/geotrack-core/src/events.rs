//! Event types, envelope schema, and event bus for the detection pipeline.
//!
//! Ingestion publishes `location.point.ingested`; the geofence and
//! route-deviation engines consume it and publish derived events. Area/route
//! lifecycle changes flow over the same bus. Delivery is at-least-once:
//! consumers must tolerate replays (the state machines do, via the ordering
//! guard).
//!
//! All emissions are wrapped in an [`EventEnvelope`] carrying an event ID,
//! the namespaced event type and a payload version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{DeviationEventKind, GeoEventType};
use crate::{Error, Result};

// ============================================================================
// Event names
// ============================================================================

pub const POINT_INGESTED: &str = "location.point.ingested";
pub const GEO_EVENT_EMITTED: &str = "geo.event.emitted";
pub const ROUTE_DEVIATION_DETECTED: &str = "route.deviation.detected";
pub const AREA_CHANGED: &str = "area.changed";
pub const ROUTE_CHANGED: &str = "route.changed";

// ============================================================================
// Payloads
// ============================================================================

/// A point was persisted and should be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointIngested {
    pub point_id: Uuid,
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    /// Fix time in Unix milliseconds.
    pub timestamp: i64,
}

impl PointIngested {
    pub fn ts(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// A geofence transition was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEventEmitted {
    pub event_id: Uuid,
    pub subject_id: String,
    pub area_id: Uuid,
    pub event_type: GeoEventType,
    pub timestamp: i64,
    pub confidence: f64,
}

/// A subject left, or returned to, an assigned route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDeviationDetected {
    pub subject_id: String,
    pub route_id: Uuid,
    pub event_type: DeviationEventKind,
    pub distance_meters: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

/// An area was created, updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaChanged {
    pub area_id: Uuid,
    pub owner_id: String,
    pub action: String,
}

/// A route was created, updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteChanged {
    pub route_id: Uuid,
    pub owner_id: String,
    pub action: String,
}

/// Closed set of events carried on the bus.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"PointIngested","point_id":"...","subject_id":"...",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoBusEvent {
    PointIngested(PointIngested),
    GeoEventEmitted(GeoEventEmitted),
    RouteDeviationDetected(RouteDeviationDetected),
    AreaChanged(AreaChanged),
    RouteChanged(RouteChanged),
}

impl GeoBusEvent {
    /// Returns the namespaced event type (e.g., `"geo.event.emitted"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            GeoBusEvent::PointIngested(_) => POINT_INGESTED,
            GeoBusEvent::GeoEventEmitted(_) => GEO_EVENT_EMITTED,
            GeoBusEvent::RouteDeviationDetected(_) => ROUTE_DEVIATION_DETECTED,
            GeoBusEvent::AreaChanged(_) => AREA_CHANGED,
            GeoBusEvent::RouteChanged(_) => ROUTE_CHANGED,
        }
    }

    /// Subject the event concerns, if any.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            GeoBusEvent::PointIngested(e) => Some(&e.subject_id),
            GeoBusEvent::GeoEventEmitted(e) => Some(&e.subject_id),
            GeoBusEvent::RouteDeviationDetected(e) => Some(&e.subject_id),
            GeoBusEvent::AreaChanged(_) | GeoBusEvent::RouteChanged(_) => None,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Versioned wrapper around a [`GeoBusEvent`].
///
/// - `payload_version` starts at `1` and increments on breaking payload changes.
/// - Consumers should ignore unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload_version: u32,
    pub payload: GeoBusEvent,
}

impl EventEnvelope {
    pub fn new(event: GeoBusEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Publisher seam
// ============================================================================

/// Anything that can publish bus events. Engines emit through this trait.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: GeoBusEvent) -> Result<()>;
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` with a fixed buffer. Slow receivers that fall
/// behind get a `Lagged` error and miss events; catch-up repairs the gap for
/// ingested points.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Wrap and broadcast an event, returning the number of receivers reached.
    pub fn emit(&self, event: GeoBusEvent) -> Result<usize> {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        self.tx
            .send(envelope)
            .map_err(|_| Error::Emit("no active subscribers".into()))
    }

    /// Subscribe to receive enveloped events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: GeoBusEvent) -> Result<()> {
        self.emit(event).map(|_| ())
    }
}

// ============================================================================
// Tests
// ============================================================================
