//! Route-deviation engine.
//!
//! States per (subject, route): ON_ROUTE, OFF_ROUTE_PENDING (off route but
//! below the consecutive count) and DEVIATED. Each route carries its own
//! threshold, consecutive count and cooldown.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use geotrack_core::events::{PointIngested, RouteDeviationDetected};
use geotrack_core::{
    AssignedRoute, DeviationEventKind, DeviationParams, Error, EventPublisher, GeoBusEvent,
    Result, RouteDeviationConfig, RouteDeviationState, RouteDeviationStateRepository,
    RouteRepository,
};

use crate::accuracy_usable;
use crate::metrics::metrics;

/// Advance the deviation state machine for one fix at `distance_m` from the
/// route. Returns the event to emit, if any.
///
/// DEVIATED fires once the consecutive off-route count is reached, and fires
/// again for a subject that stays off route only after the cooldown since the
/// previous DEVIATED has elapsed. Any fix within the threshold resets the
/// counter and, if deviated, yields BACK_ON_ROUTE.
pub fn decide_deviation(
    state: &mut RouteDeviationState,
    distance_m: f64,
    params: &DeviationParams,
    ts: DateTime<Utc>,
) -> Option<DeviationEventKind> {
    if distance_m > params.threshold_m {
        state.consecutive_off_route = state.consecutive_off_route.saturating_add(1);
        let cooled_down = state
            .last_deviation_event_at
            .map_or(true, |last| ts - last >= params.cooldown);
        if state.consecutive_off_route >= params.consecutive_count
            && (!state.deviated || cooled_down)
        {
            state.deviated = true;
            state.last_deviation_event_at = Some(ts);
            return Some(DeviationEventKind::Deviated);
        }
        None
    } else {
        state.consecutive_off_route = 0;
        if state.deviated {
            state.deviated = false;
            return Some(DeviationEventKind::BackOnRoute);
        }
        None
    }
}

/// Route-deviation evaluation for ingested points.
pub struct RouteDeviationEngine {
    routes: Arc<dyn RouteRepository>,
    states: Arc<dyn RouteDeviationStateRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: RouteDeviationConfig,
}

impl RouteDeviationEngine {
    pub fn new(
        routes: Arc<dyn RouteRepository>,
        states: Arc<dyn RouteDeviationStateRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: RouteDeviationConfig,
    ) -> Self {
        Self {
            routes,
            states,
            publisher,
            config,
        }
    }

    /// Evaluate one ingested point against every route assigned to the
    /// subject at the point's time. Per-route failures are logged.
    #[instrument(skip(self, point), fields(subject_id = %point.subject_id, point_id = %point.point_id))]
    pub async fn evaluate(&self, point: &PointIngested) -> Result<Vec<RouteDeviationDetected>> {
        let start = Instant::now();
        let ts = point
            .ts()
            .ok_or_else(|| Error::InvalidInput(format!("invalid timestamp {}", point.timestamp)))?;

        if !accuracy_usable(point.accuracy, self.config.max_accuracy_m) {
            debug!(
                subsystem = "route_deviation",
                accuracy_m = point.accuracy,
                "Skipping point outside accuracy bounds"
            );
            return Ok(Vec::new());
        }

        let assignments = self
            .routes
            .active_assignments_for_subject(&point.subject_id, ts)
            .await?;

        let mut detected = Vec::new();
        for assigned in &assignments {
            let Some(params) = assigned.route.deviation_params() else {
                continue;
            };
            match self.evaluate_route(point, ts, assigned, &params).await {
                Ok(Some(event)) => {
                    self.emit(&event);
                    detected.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    subsystem = "route_deviation",
                    subject_id = %point.subject_id,
                    route_id = %assigned.route.id,
                    error = %e,
                    "Route evaluation failed"
                ),
            }
        }

        debug!(
            subsystem = "route_deviation",
            op = "evaluate",
            routes = assignments.len(),
            events = detected.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Route deviation evaluation complete"
        );
        metrics().record_route_eval(start.elapsed());
        Ok(detected)
    }

    async fn evaluate_route(
        &self,
        point: &PointIngested,
        ts: DateTime<Utc>,
        assigned: &AssignedRoute,
        params: &DeviationParams,
    ) -> Result<Option<RouteDeviationDetected>> {
        let route_id = assigned.route.id;
        let distance_m = self
            .routes
            .distance_to_route(route_id, point.latitude, point.longitude)
            .await?;

        let mut tx = self.states.begin().await?;
        let mut state = tx
            .lock_state(&point.subject_id, route_id)
            .await?
            .unwrap_or_else(|| RouteDeviationState::on_route(point.subject_id.clone(), route_id));

        if state.has_applied(ts) {
            debug!(
                subsystem = "route_deviation",
                route_id = %route_id,
                "Skipping replayed or out-of-order point"
            );
            return Ok(None);
        }

        state.last_point_ts = Some(ts);
        state.last_lat = point.latitude;
        state.last_lon = point.longitude;
        let kind = decide_deviation(&mut state, distance_m, params, ts);

        tx.upsert_state(&state).await?;
        tx.commit().await?;

        let Some(kind) = kind else {
            return Ok(None);
        };
        info!(
            subsystem = "route_deviation",
            subject_id = %point.subject_id,
            route_id = %route_id,
            event_type = kind.as_str(),
            distance_m,
            "Route deviation state changed"
        );
        metrics().record_route_transition(kind);
        Ok(Some(RouteDeviationDetected {
            subject_id: point.subject_id.clone(),
            route_id,
            event_type: kind,
            distance_meters: distance_m,
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: point.timestamp,
        }))
    }

    fn emit(&self, event: &RouteDeviationDetected) {
        if let Err(e) = self
            .publisher
            .publish(GeoBusEvent::RouteDeviationDetected(event.clone()))
        {
            warn!(
                subsystem = "route_deviation",
                subject_id = %event.subject_id,
                route_id = %event.route_id,
                error = %e,
                "Failed to emit route deviation event"
            );
        }
    }
}
