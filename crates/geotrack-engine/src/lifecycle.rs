//! Area and route deletion saga.
//!
//! Deletion is two explicit steps: mark the parent deleted, then remove its
//! dependent state rows. The second step is best-effort and logged; the
//! change event published afterwards lets the change handlers retry the
//! cleanup.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use geotrack_core::events::{AreaChanged, RouteChanged};
use geotrack_core::{
    Area, AreaRepository, EventPublisher, GeoBusEvent, GeofenceStateRepository, Result, Route,
    RouteDeviationStateRepository, RouteRepository,
};

use crate::handler::ACTION_DELETED;
use crate::Stores;

pub struct LifecycleService {
    areas: Arc<dyn AreaRepository>,
    routes: Arc<dyn RouteRepository>,
    geofence_states: Arc<dyn GeofenceStateRepository>,
    route_deviation_states: Arc<dyn RouteDeviationStateRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl LifecycleService {
    pub fn new(stores: &Stores, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            areas: stores.areas.clone(),
            routes: stores.routes.clone(),
            geofence_states: stores.geofence_states.clone(),
            route_deviation_states: stores.route_deviation_states.clone(),
            publisher,
        }
    }

    /// Soft-delete an area and drop its geofence states.
    ///
    /// Returns `NotFound` when the area does not exist or is already deleted.
    #[instrument(skip(self))]
    pub async fn delete_area(&self, area_id: Uuid) -> Result<Area> {
        let area = self.areas.mark_deleted(area_id).await?;

        match self.geofence_states.delete_by_area(area_id).await {
            Ok(deleted) => info!(
                subsystem = "lifecycle",
                area_id = %area_id,
                deleted,
                "Area deleted"
            ),
            Err(e) => warn!(
                subsystem = "lifecycle",
                area_id = %area_id,
                error = %e,
                "Failed to clean up geofence states"
            ),
        }

        self.publish(GeoBusEvent::AreaChanged(AreaChanged {
            area_id,
            owner_id: area.owner_id.clone(),
            action: ACTION_DELETED.to_string(),
        }));
        Ok(area)
    }

    /// Soft-delete a route and drop its assignments and deviation states.
    #[instrument(skip(self))]
    pub async fn delete_route(&self, route_id: Uuid) -> Result<Route> {
        let route = self.routes.mark_deleted(route_id).await?;

        if let Err(e) = self.routes.delete_assignments_by_route(route_id).await {
            warn!(
                subsystem = "lifecycle",
                route_id = %route_id,
                error = %e,
                "Failed to clean up route assignments"
            );
        }
        match self.route_deviation_states.delete_by_route(route_id).await {
            Ok(deleted) => info!(
                subsystem = "lifecycle",
                route_id = %route_id,
                deleted,
                "Route deleted"
            ),
            Err(e) => warn!(
                subsystem = "lifecycle",
                route_id = %route_id,
                error = %e,
                "Failed to clean up route deviation states"
            ),
        }

        self.publish(GeoBusEvent::RouteChanged(RouteChanged {
            route_id,
            owner_id: route.owner_id.clone(),
            action: ACTION_DELETED.to_string(),
        }));
        Ok(route)
    }

    fn publish(&self, event: GeoBusEvent) {
        let event_type = event.namespaced_event_type();
        if let Err(e) = self.publisher.publish(event) {
            warn!(
                subsystem = "lifecycle",
                event_type,
                error = %e,
                "Failed to emit change event"
            );
        }
    }
}
