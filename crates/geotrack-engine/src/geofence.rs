//! Geofence engine: the enter/exit/dwell state machine.
//!
//! States per (subject, area):
//! - OUTSIDE: no state row, or `inside = false`
//! - INSIDE: `inside = true` with `enter_ts` set
//!
//! Every transition runs in its own state transaction with the (subject, area)
//! row locked. A point older than the row's `last_point_ts` is a no-op, so
//! replays and out-of-order deliveries never move the state backwards.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use geotrack_core::defaults::{CONFIDENCE_DECAY_M, CONFIDENCE_FLOOR};
use geotrack_core::events::{GeoEventEmitted, PointIngested};
use geotrack_core::{
    Area, AreaRepository, Error, EventPublisher, GeoBusEvent, GeoEvent, GeoEventType,
    GeofenceConfig, GeofenceState, GeofenceStateRepository, GeofenceStateTx, Result,
};

use crate::accuracy_usable;
use crate::metrics::metrics;

/// Confidence score for a fix of the given accuracy.
///
/// `exp(-accuracy / 100)` floored at 0.01; an accuracy of exactly zero (or
/// below) yields 1.0.
pub fn compute_confidence(accuracy: f64) -> f64 {
    if accuracy <= 0.0 {
        return 1.0;
    }
    (-accuracy / CONFIDENCE_DECAY_M).exp().max(CONFIDENCE_FLOOR)
}

/// Effective containment after hysteresis.
///
/// A flip away from the current state is only honored when the fix is at
/// least as precise as the buffer.
pub fn apply_hysteresis(
    raw_inside: bool,
    current_inside: bool,
    accuracy: f64,
    buffer_m: f64,
) -> bool {
    if raw_inside == current_inside || accuracy <= buffer_m {
        raw_inside
    } else {
        current_inside
    }
}

/// Geofence evaluation for ingested points.
pub struct GeofenceEngine {
    areas: Arc<dyn AreaRepository>,
    states: Arc<dyn GeofenceStateRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: GeofenceConfig,
}

impl GeofenceEngine {
    pub fn new(
        areas: Arc<dyn AreaRepository>,
        states: Arc<dyn GeofenceStateRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: GeofenceConfig,
    ) -> Self {
        Self {
            areas,
            states,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &GeofenceConfig {
        &self.config
    }

    /// Evaluate one ingested point against every candidate area.
    ///
    /// Returns the geo events committed for this point. A failure on one area
    /// is logged and the remaining areas are still evaluated; only the
    /// candidate lookup itself can fail the call.
    #[instrument(skip(self, point), fields(subject_id = %point.subject_id, point_id = %point.point_id))]
    pub async fn evaluate(&self, point: &PointIngested) -> Result<Vec<GeoEvent>> {
        let start = Instant::now();
        let ts = point
            .ts()
            .ok_or_else(|| Error::InvalidInput(format!("invalid timestamp {}", point.timestamp)))?;

        if !accuracy_usable(point.accuracy, self.config.max_accuracy_m) {
            debug!(
                subsystem = "geofence",
                accuracy_m = point.accuracy,
                "Skipping point outside accuracy bounds"
            );
            return Ok(Vec::new());
        }

        let max = self.config.max_candidate_areas;
        let mut candidates = self
            .areas
            .candidates_for_point(point.latitude, point.longitude, max)
            .await?;
        if candidates.len() > max {
            warn!(
                subsystem = "geofence",
                subject_id = %point.subject_id,
                max,
                "Candidate areas exceed cap, truncating"
            );
            candidates.truncate(max);
        }

        let mut events = Vec::new();
        for area in &candidates {
            match self.evaluate_area(point, ts, area).await {
                Ok(Some(event)) => {
                    self.emit(&event);
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    subsystem = "geofence",
                    subject_id = %point.subject_id,
                    area_id = %area.id,
                    error = %e,
                    "Area evaluation failed"
                ),
            }
        }

        debug!(
            subsystem = "geofence",
            op = "evaluate",
            candidates = candidates.len(),
            events = events.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Geofence evaluation complete"
        );
        metrics().record_geofence_eval(start.elapsed());
        Ok(events)
    }

    async fn evaluate_area(
        &self,
        point: &PointIngested,
        ts: DateTime<Utc>,
        area: &Area,
    ) -> Result<Option<GeoEvent>> {
        let raw_inside = self
            .areas
            .contains_point(area.id, point.latitude, point.longitude)
            .await?;

        let mut tx = self.states.begin().await?;
        let mut state = tx
            .lock_state(&point.subject_id, area.id)
            .await?
            .unwrap_or_else(|| GeofenceState::outside(point.subject_id.clone(), area.id));

        if state.is_newer_than(ts) {
            debug!(
                subsystem = "geofence",
                area_id = %area.id,
                "Skipping out-of-order point"
            );
            return Ok(None);
        }

        let confidence = compute_confidence(point.accuracy);
        let inside = apply_hysteresis(
            raw_inside,
            state.inside,
            point.accuracy,
            self.config.hysteresis_buffer_m,
        );

        let event = match (state.inside, inside) {
            (false, true) => {
                state.inside = true;
                state.last_transition = Some(ts);
                state.enter_ts = Some(ts);
                let event = new_event(point, area.id, GeoEventType::Enter, ts, confidence);
                tx.insert_geo_event(&event).await?;
                Some(event)
            }
            (true, false) => {
                state.inside = false;
                state.last_transition = Some(ts);
                state.enter_ts = None;
                let event = new_event(point, area.id, GeoEventType::Exit, ts, confidence);
                tx.insert_geo_event(&event).await?;
                Some(event)
            }
            (true, true) => match self
                .check_dwell(&mut tx, point, &state, ts, confidence)
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        subsystem = "geofence",
                        area_id = %area.id,
                        error = %e,
                        "Dwell check failed"
                    );
                    None
                }
            },
            (false, false) => None,
        };

        state.last_point_ts = Some(ts);
        state.last_lat = point.latitude;
        state.last_lon = point.longitude;
        tx.upsert_state(&state).await?;
        tx.commit().await?;

        if let Some(event) = &event {
            info!(
                subsystem = "geofence",
                subject_id = %event.subject_id,
                area_id = %event.area_id,
                event_type = event.event_type.as_str(),
                confidence = event.confidence,
                "Geofence event recorded"
            );
            metrics().record_geofence_transition(event.event_type);
        }
        Ok(event)
    }

    /// At most one DWELL per entry session: the existence check is scoped to
    /// `enter_ts` and runs under the same row lock.
    async fn check_dwell(
        &self,
        tx: &mut Box<dyn GeofenceStateTx>,
        point: &PointIngested,
        state: &GeofenceState,
        ts: DateTime<Utc>,
        confidence: f64,
    ) -> Result<Option<GeoEvent>> {
        let Some(enter_ts) = state.enter_ts else {
            return Ok(None);
        };
        if ts - enter_ts < self.config.dwell_threshold {
            return Ok(None);
        }
        if tx
            .dwell_exists_since(&state.subject_id, state.area_id, enter_ts)
            .await?
        {
            return Ok(None);
        }
        let event = new_event(point, state.area_id, GeoEventType::Dwell, ts, confidence);
        tx.insert_geo_event(&event).await?;
        Ok(Some(event))
    }

    fn emit(&self, event: &GeoEvent) {
        let payload = GeoBusEvent::GeoEventEmitted(GeoEventEmitted {
            event_id: event.id,
            subject_id: event.subject_id.clone(),
            area_id: event.area_id,
            event_type: event.event_type,
            timestamp: event.ts.timestamp_millis(),
            confidence: event.confidence,
        });
        if let Err(e) = self.publisher.publish(payload) {
            warn!(
                subsystem = "geofence",
                subject_id = %event.subject_id,
                area_id = %event.area_id,
                error = %e,
                "Failed to emit geo event"
            );
        }
    }
}

fn new_event(
    point: &PointIngested,
    area_id: Uuid,
    event_type: GeoEventType,
    ts: DateTime<Utc>,
    confidence: f64,
) -> GeoEvent {
    GeoEvent {
        id: Uuid::now_v7(),
        subject_id: point.subject_id.clone(),
        area_id,
        event_type,
        ts,
        confidence,
        point_id: Some(point.point_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_perfect_fix() {
        assert_eq!(compute_confidence(0.0), 1.0);
        assert_eq!(compute_confidence(-5.0), 1.0);
    }

    #[test]
    fn test_confidence_decays() {
        let c10 = compute_confidence(10.0);
        let c50 = compute_confidence(50.0);
        assert!((c10 - (-0.1f64).exp()).abs() < 1e-12);
        assert!(c10 > c50);
    }

    #[test]
    fn test_confidence_floor() {
        assert_eq!(compute_confidence(1_000.0), 0.01);
        assert_eq!(compute_confidence(f64::MAX), 0.01);
    }

    #[test]
    fn test_confidence_monotonic() {
        let mut prev = compute_confidence(0.0);
        for accuracy in (1..600).step_by(7) {
            let next = compute_confidence(accuracy as f64);
            assert!(next <= prev);
            assert!(next >= 0.01);
            prev = next;
        }
    }

    #[test]
    fn test_hysteresis_holds_state_for_imprecise_fix() {
        assert!(!apply_hysteresis(true, false, 31.0, 30.0));
        assert!(apply_hysteresis(false, true, 31.0, 30.0));
    }

    #[test]
    fn test_hysteresis_flips_for_precise_fix() {
        assert!(apply_hysteresis(true, false, 30.0, 30.0));
        assert!(!apply_hysteresis(false, true, 5.0, 30.0));
    }

    #[test]
    fn test_hysteresis_agreement_passes_through() {
        assert!(apply_hysteresis(true, true, 400.0, 30.0));
        assert!(!apply_hysteresis(false, false, 400.0, 30.0));
    }

    #[test]
    fn test_new_event_carries_point_id() {
        let point = PointIngested {
            point_id: Uuid::now_v7(),
            subject_id: "device-1".into(),
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 5.0,
            timestamp: 1_700_000_000_000,
        };
        let ts = point.ts().unwrap();
        let area_id = Uuid::now_v7();
        let event = new_event(&point, area_id, GeoEventType::Enter, ts, 0.9);
        assert_eq!(event.point_id, Some(point.point_id));
        assert_eq!(event.area_id, area_id);
        assert_eq!(event.ts, ts);
    }
}
