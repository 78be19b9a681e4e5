//! Event handlers for each bus event type.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use geotrack_core::events::{
    AREA_CHANGED, GEO_EVENT_EMITTED, POINT_INGESTED, ROUTE_CHANGED, ROUTE_DEVIATION_DETECTED,
};
use geotrack_core::{
    Error, EventPublisher, GeoBusEvent, GeofenceConfig, GeofenceStateRepository,
    LatestPosition, LatestPositionRepository, Result, RouteDeviationConfig,
    RouteDeviationStateRepository, RouteRepository,
};

use crate::geofence::GeofenceEngine;
use crate::route_deviation::RouteDeviationEngine;
use crate::Stores;

/// Action value carried by area/route change events on deletion.
pub const ACTION_DELETED: &str = "deleted";

/// Trait for bus event consumers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The namespaced event type this handler consumes.
    fn name(&self) -> &'static str;

    /// Check the payload before execution.
    fn validate(&self, event: &GeoBusEvent) -> Result<()>;

    /// Handle the event.
    async fn execute(&self, event: &GeoBusEvent) -> Result<()>;

    /// Check if this handler consumes the given event type.
    fn can_handle(&self, event_type: &str) -> bool {
        self.name() == event_type
    }
}

fn unexpected(handler: &str, event: &GeoBusEvent) -> Error {
    Error::InvalidInput(format!(
        "{} handler cannot process {}",
        handler,
        event.namespaced_event_type()
    ))
}

fn require(field: &str, present: bool) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(Error::Validation(format!("{} is required", field)))
    }
}

// =============================================================================
// location.point.ingested
// =============================================================================

/// Updates the latest position, then runs geofence and route-deviation
/// evaluation for the point.
pub struct LocationPointHandler {
    latest: Arc<dyn LatestPositionRepository>,
    geofence: Arc<GeofenceEngine>,
    route_deviation: Arc<RouteDeviationEngine>,
}

impl LocationPointHandler {
    pub fn new(
        latest: Arc<dyn LatestPositionRepository>,
        geofence: Arc<GeofenceEngine>,
        route_deviation: Arc<RouteDeviationEngine>,
    ) -> Self {
        Self {
            latest,
            geofence,
            route_deviation,
        }
    }
}

#[async_trait]
impl EventHandler for LocationPointHandler {
    fn name(&self) -> &'static str {
        POINT_INGESTED
    }

    fn validate(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::PointIngested(point) = event else {
            return Err(unexpected("location point", event));
        };
        require("point_id", !point.point_id.is_nil())?;
        require("subject_id", !point.subject_id.trim().is_empty())?;
        require("timestamp", point.timestamp > 0 && point.ts().is_some())?;
        require(
            "coordinates",
            point.latitude.is_finite() && point.longitude.is_finite(),
        )?;
        Ok(())
    }

    async fn execute(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::PointIngested(point) = event else {
            return Err(unexpected("location point", event));
        };
        let ts = point
            .ts()
            .ok_or_else(|| Error::Validation("timestamp is required".into()))?;

        let advanced = self
            .latest
            .upsert(&LatestPosition {
                subject_id: point.subject_id.clone(),
                latitude: point.latitude,
                longitude: point.longitude,
                accuracy: point.accuracy,
                ts,
            })
            .await?;
        if !advanced {
            debug!(
                subsystem = "dispatch",
                subject_id = %point.subject_id,
                "Latest position already newer"
            );
        }

        self.geofence.evaluate(point).await?;

        if let Err(e) = self.route_deviation.evaluate(point).await {
            warn!(
                subsystem = "dispatch",
                subject_id = %point.subject_id,
                point_id = %point.point_id,
                error = %e,
                "Route deviation evaluation failed"
            );
        }
        Ok(())
    }
}

// =============================================================================
// geo.event.emitted / route.deviation.detected
// =============================================================================

/// Structured log of committed geofence events.
pub struct GeoEventHandler;

#[async_trait]
impl EventHandler for GeoEventHandler {
    fn name(&self) -> &'static str {
        GEO_EVENT_EMITTED
    }

    fn validate(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::GeoEventEmitted(e) = event else {
            return Err(unexpected("geo event", event));
        };
        require("subject_id", !e.subject_id.is_empty())?;
        require("area_id", !e.area_id.is_nil())
    }

    async fn execute(&self, event: &GeoBusEvent) -> Result<()> {
        if let GeoBusEvent::GeoEventEmitted(e) = event {
            info!(
                subsystem = "dispatch",
                subject_id = %e.subject_id,
                area_id = %e.area_id,
                event_type = e.event_type.as_str(),
                confidence = e.confidence,
                "Geo event"
            );
        }
        Ok(())
    }
}

/// Structured log of route deviation changes.
pub struct RouteDeviationHandler;

#[async_trait]
impl EventHandler for RouteDeviationHandler {
    fn name(&self) -> &'static str {
        ROUTE_DEVIATION_DETECTED
    }

    fn validate(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::RouteDeviationDetected(e) = event else {
            return Err(unexpected("route deviation", event));
        };
        require("subject_id", !e.subject_id.is_empty())?;
        require("route_id", !e.route_id.is_nil())
    }

    async fn execute(&self, event: &GeoBusEvent) -> Result<()> {
        if let GeoBusEvent::RouteDeviationDetected(e) = event {
            info!(
                subsystem = "dispatch",
                subject_id = %e.subject_id,
                route_id = %e.route_id,
                event_type = e.event_type.as_str(),
                distance_m = e.distance_meters,
                "Route deviation"
            );
        }
        Ok(())
    }
}

// =============================================================================
// area.changed / route.changed
// =============================================================================

/// Removes geofence state for deleted areas.
pub struct AreaChangeHandler {
    states: Arc<dyn GeofenceStateRepository>,
}

impl AreaChangeHandler {
    pub fn new(states: Arc<dyn GeofenceStateRepository>) -> Self {
        Self { states }
    }
}

#[async_trait]
impl EventHandler for AreaChangeHandler {
    fn name(&self) -> &'static str {
        AREA_CHANGED
    }

    fn validate(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::AreaChanged(e) = event else {
            return Err(unexpected("area change", event));
        };
        require("area_id", !e.area_id.is_nil())?;
        require("action", !e.action.is_empty())
    }

    async fn execute(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::AreaChanged(e) = event else {
            return Err(unexpected("area change", event));
        };
        if e.action != ACTION_DELETED {
            return Ok(());
        }
        let deleted = self.states.delete_by_area(e.area_id).await?;
        info!(
            subsystem = "dispatch",
            area_id = %e.area_id,
            deleted,
            "Geofence states removed for deleted area"
        );
        Ok(())
    }
}

/// Removes deviation state and assignments for deleted routes.
pub struct RouteChangeHandler {
    states: Arc<dyn RouteDeviationStateRepository>,
    routes: Arc<dyn RouteRepository>,
}

impl RouteChangeHandler {
    pub fn new(
        states: Arc<dyn RouteDeviationStateRepository>,
        routes: Arc<dyn RouteRepository>,
    ) -> Self {
        Self { states, routes }
    }
}

#[async_trait]
impl EventHandler for RouteChangeHandler {
    fn name(&self) -> &'static str {
        ROUTE_CHANGED
    }

    fn validate(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::RouteChanged(e) = event else {
            return Err(unexpected("route change", event));
        };
        require("route_id", !e.route_id.is_nil())?;
        require("action", !e.action.is_empty())
    }

    async fn execute(&self, event: &GeoBusEvent) -> Result<()> {
        let GeoBusEvent::RouteChanged(e) = event else {
            return Err(unexpected("route change", event));
        };
        if e.action != ACTION_DELETED {
            return Ok(());
        }
        let states = self.states.delete_by_route(e.route_id).await?;
        let assignments = self.routes.delete_assignments_by_route(e.route_id).await?;
        info!(
            subsystem = "dispatch",
            route_id = %e.route_id,
            states,
            assignments,
            "Route dependents removed for deleted route"
        );
        Ok(())
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// The standard consumer set: point evaluation, derived-event logging and
/// deletion cleanup.
pub fn default_handlers(
    stores: &Stores,
    publisher: Arc<dyn EventPublisher>,
    geofence: GeofenceConfig,
    route_deviation: RouteDeviationConfig,
) -> Vec<Arc<dyn EventHandler>> {
    let geofence = Arc::new(GeofenceEngine::new(
        stores.areas.clone(),
        stores.geofence_states.clone(),
        publisher.clone(),
        geofence,
    ));
    let route_deviation = Arc::new(RouteDeviationEngine::new(
        stores.routes.clone(),
        stores.route_deviation_states.clone(),
        publisher,
        route_deviation,
    ));
    vec![
        Arc::new(LocationPointHandler::new(
            stores.latest_positions.clone(),
            geofence,
            route_deviation,
        )),
        Arc::new(GeoEventHandler),
        Arc::new(RouteDeviationHandler),
        Arc::new(AreaChangeHandler::new(stores.geofence_states.clone())),
        Arc::new(RouteChangeHandler::new(
            stores.route_deviation_states.clone(),
            stores.routes.clone(),
        )),
    ]
}

/// Handler that accepts everything, for dispatcher tests.
#[cfg(test)]
pub(crate) struct NoOpHandler {
    name: &'static str,
}

#[cfg(test)]
impl NoOpHandler {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[cfg(test)]
#[async_trait]
impl EventHandler for NoOpHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn validate(&self, _event: &GeoBusEvent) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _event: &GeoBusEvent) -> Result<()> {
        Ok(())
    }
}
