//! In-memory store implementing every repository trait.
//!
//! Spatial predicates use the `geo` crate: bounding-box candidates,
//! point-in-polygon containment, and haversine distance to the planar closest
//! point on a route. Transactions take the store-wide lock and stage their
//! writes; `commit` applies them, dropping the handle discards them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geo::polygon;
//! use geotrack_db::memory::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let area = store
//!     .insert_area("owner-1", "depot", polygon![
//!         (x: 13.0, y: 52.0), (x: 13.1, y: 52.0), (x: 13.1, y: 52.1), (x: 13.0, y: 52.1),
//!     ].into())
//!     .await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::{BoundingRect, Closest, ClosestPoint, Contains, HaversineDistance};
use geo::{LineString, MultiPolygon, Point};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use geotrack_core::defaults::{STATE_ACTIVE, STATE_DELETED};
use geotrack_core::*;

struct StoredArea {
    area: Area,
    geom: MultiPolygon<f64>,
}

struct StoredRoute {
    route: Route,
    geom: LineString<f64>,
}

#[derive(Default)]
struct MemoryData {
    points: Vec<LocationPoint>,
    latest: HashMap<String, LatestPosition>,
    geofence: HashMap<(String, Uuid), GeofenceState>,
    deviation: HashMap<(String, Uuid), RouteDeviationState>,
    events: Vec<GeoEvent>,
    areas: HashMap<Uuid, StoredArea>,
    routes: HashMap<Uuid, StoredRoute>,
    assignments: Vec<RouteAssignment>,
    partition_runs: Vec<i32>,
    failing_areas: HashSet<Uuid>,
    failing_routes: HashSet<Uuid>,
    fail_inserts: bool,
    fail_dwell_events: bool,
    fail_partitions: bool,
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==========================================================================
    // Fixtures
    // ==========================================================================

    /// Add an active area with the given geometry (x = longitude, y = latitude).
    pub async fn insert_area(
        &self,
        owner_id: &str,
        name: &str,
        geom: MultiPolygon<f64>,
    ) -> Area {
        let now = Utc::now();
        let area = Area {
            id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: None,
            area_type: AreaType::Zone,
            area_m2: None,
            perimeter_m: None,
            state: STATE_ACTIVE,
            created_at: now,
            modified_at: now,
        };
        self.data.lock().await.areas.insert(
            area.id,
            StoredArea {
                area: area.clone(),
                geom,
            },
        );
        area
    }

    /// Add an active route with optional deviation parameters.
    pub async fn insert_route(
        &self,
        owner_id: &str,
        name: &str,
        geom: LineString<f64>,
        threshold_m: Option<f64>,
        consecutive_count: Option<i32>,
        cooldown_sec: Option<i32>,
    ) -> Route {
        let now = Utc::now();
        let route = Route {
            id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: None,
            length_m: None,
            state: STATE_ACTIVE,
            deviation_threshold_m: threshold_m,
            deviation_consecutive_count: consecutive_count,
            deviation_cooldown_sec: cooldown_sec,
            created_at: now,
            modified_at: now,
        };
        self.data.lock().await.routes.insert(
            route.id,
            StoredRoute {
                route: route.clone(),
                geom,
            },
        );
        route
    }

    pub async fn assign_route(
        &self,
        subject_id: &str,
        route_id: Uuid,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> RouteAssignment {
        let assignment = RouteAssignment {
            id: Uuid::now_v7(),
            subject_id: subject_id.to_string(),
            route_id,
            valid_from,
            valid_until,
            state: STATE_ACTIVE,
        };
        self.data.lock().await.assignments.push(assignment.clone());
        assignment
    }

    /// Store a geofence state verbatim, keeping its `updated_at`.
    pub async fn put_geofence_state(&self, state: GeofenceState) {
        self.data
            .lock()
            .await
            .geofence
            .insert((state.subject_id.clone(), state.area_id), state);
    }

    /// Store a geo event verbatim.
    pub async fn put_geo_event(&self, event: GeoEvent) {
        self.data.lock().await.events.push(event);
    }

    // ==========================================================================
    // Fault injection
    // ==========================================================================

    /// Make containment checks for this area fail.
    pub async fn fail_area(&self, area_id: Uuid) {
        self.data.lock().await.failing_areas.insert(area_id);
    }

    /// Make distance queries for this route fail.
    pub async fn fail_route(&self, route_id: Uuid) {
        self.data.lock().await.failing_routes.insert(route_id);
    }

    /// Make point batch inserts fail.
    pub async fn fail_inserts(&self, fail: bool) {
        self.data.lock().await.fail_inserts = fail;
    }

    /// Make DWELL event inserts fail. ENTER and EXIT still succeed.
    pub async fn fail_dwell_events(&self, fail: bool) {
        self.data.lock().await.fail_dwell_events = fail;
    }

    /// Make partition maintenance fail.
    pub async fn fail_partitions(&self, fail: bool) {
        self.data.lock().await.fail_partitions = fail;
    }

    // ==========================================================================
    // Inspection
    // ==========================================================================

    pub async fn points(&self) -> Vec<LocationPoint> {
        self.data.lock().await.points.clone()
    }

    /// All geo events in insertion order.
    pub async fn geo_events(&self) -> Vec<GeoEvent> {
        self.data.lock().await.events.clone()
    }

    pub async fn geofence_state_count(&self) -> usize {
        self.data.lock().await.geofence.len()
    }

    pub async fn deviation_state_count(&self) -> usize {
        self.data.lock().await.deviation.len()
    }

    pub async fn active_assignment_count(&self, route_id: Uuid) -> usize {
        self.data
            .lock()
            .await
            .assignments
            .iter()
            .filter(|a| a.route_id == route_id && a.state == STATE_ACTIVE)
            .count()
    }

    /// `months_ahead` values passed to `ensure_partitions`, in call order.
    pub async fn partition_runs(&self) -> Vec<i32> {
        self.data.lock().await.partition_runs.clone()
    }
}

// =============================================================================
// Location points / latest positions
// =============================================================================

#[async_trait]
impl LocationPointRepository for MemoryStore {
    async fn insert_batch(&self, points: &[LocationPoint]) -> Result<u64> {
        let mut data = self.data.lock().await;
        if data.fail_inserts {
            return Err(Error::Internal("injected insert failure".into()));
        }
        data.points.extend_from_slice(points);
        Ok(points.len() as u64)
    }

    async fn find_unprocessed(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UnprocessedPoint>> {
        let data = self.data.lock().await;
        let mut newest: HashMap<&str, &LocationPoint> = HashMap::new();
        for point in data.points.iter().filter(|p| p.ingested_at > since) {
            let behind = data
                .latest
                .get(&point.subject_id)
                .map_or(true, |latest| latest.ts < point.ts);
            if !behind {
                continue;
            }
            let entry = newest.entry(point.subject_id.as_str()).or_insert(point);
            if point.ts > entry.ts {
                *entry = point;
            }
        }

        let mut rows: Vec<UnprocessedPoint> = newest
            .into_values()
            .map(|p| UnprocessedPoint {
                point_id: p.id,
                subject_id: p.subject_id.clone(),
                latitude: p.latitude,
                longitude: p.longitude,
                accuracy: p.accuracy,
                ts: p.ts,
            })
            .collect();
        rows.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl LatestPositionRepository for MemoryStore {
    async fn upsert(&self, position: &LatestPosition) -> Result<bool> {
        let mut data = self.data.lock().await;
        match data.latest.get(&position.subject_id) {
            Some(existing) if position.ts < existing.ts => Ok(false),
            _ => {
                data.latest
                    .insert(position.subject_id.clone(), position.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, subject_id: &str) -> Result<Option<LatestPosition>> {
        Ok(self.data.lock().await.latest.get(subject_id).cloned())
    }
}

// =============================================================================
// Geofence state
// =============================================================================

pub struct MemoryGeofenceTx {
    guard: OwnedMutexGuard<MemoryData>,
    states: Vec<GeofenceState>,
    events: Vec<GeoEvent>,
}

#[async_trait]
impl GeofenceStateTx for MemoryGeofenceTx {
    async fn lock_state(
        &mut self,
        subject_id: &str,
        area_id: Uuid,
    ) -> Result<Option<GeofenceState>> {
        let staged = self
            .states
            .iter()
            .rev()
            .find(|s| s.subject_id == subject_id && s.area_id == area_id);
        Ok(staged.cloned().or_else(|| {
            self.guard
                .geofence
                .get(&(subject_id.to_string(), area_id))
                .cloned()
        }))
    }

    async fn dwell_exists_since(
        &mut self,
        subject_id: &str,
        area_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.guard.events.iter().chain(self.events.iter()).any(|e| {
            e.subject_id == subject_id
                && e.area_id == area_id
                && e.event_type == GeoEventType::Dwell
                && e.ts >= since
        }))
    }

    async fn insert_geo_event(&mut self, event: &GeoEvent) -> Result<()> {
        if self.guard.fail_dwell_events && event.event_type == GeoEventType::Dwell {
            return Err(Error::Internal("injected dwell insert failure".into()));
        }
        self.events.push(event.clone());
        Ok(())
    }

    async fn upsert_state(&mut self, state: &GeofenceState) -> Result<()> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        self.states.push(state);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryGeofenceTx {
            mut guard,
            states,
            events,
        } = *self;
        for state in states {
            guard
                .geofence
                .insert((state.subject_id.clone(), state.area_id), state);
        }
        guard.events.extend(events);
        Ok(())
    }
}

#[async_trait]
impl GeofenceStateRepository for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn GeofenceStateTx>> {
        let guard = self.data.clone().lock_owned().await;
        Ok(Box::new(MemoryGeofenceTx {
            guard,
            states: Vec::new(),
            events: Vec::new(),
        }))
    }

    async fn get(&self, subject_id: &str, area_id: Uuid) -> Result<Option<GeofenceState>> {
        Ok(self
            .data
            .lock()
            .await
            .geofence
            .get(&(subject_id.to_string(), area_id))
            .cloned())
    }

    async fn delete_by_area(&self, area_id: Uuid) -> Result<u64> {
        let mut data = self.data.lock().await;
        let before = data.geofence.len();
        data.geofence.retain(|(_, a), _| *a != area_id);
        Ok((before - data.geofence.len()) as u64)
    }

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64> {
        let mut data = self.data.lock().await;
        let before = data.geofence.len();
        data.geofence.retain(|(s, _), _| s != subject_id);
        Ok((before - data.geofence.len()) as u64)
    }
}

// =============================================================================
// Route deviation state
// =============================================================================

pub struct MemoryRouteDeviationTx {
    guard: OwnedMutexGuard<MemoryData>,
    states: Vec<RouteDeviationState>,
}

#[async_trait]
impl RouteDeviationStateTx for MemoryRouteDeviationTx {
    async fn lock_state(
        &mut self,
        subject_id: &str,
        route_id: Uuid,
    ) -> Result<Option<RouteDeviationState>> {
        let staged = self
            .states
            .iter()
            .rev()
            .find(|s| s.subject_id == subject_id && s.route_id == route_id);
        Ok(staged.cloned().or_else(|| {
            self.guard
                .deviation
                .get(&(subject_id.to_string(), route_id))
                .cloned()
        }))
    }

    async fn upsert_state(&mut self, state: &RouteDeviationState) -> Result<()> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        self.states.push(state);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryRouteDeviationTx { mut guard, states } = *self;
        for state in states {
            guard
                .deviation
                .insert((state.subject_id.clone(), state.route_id), state);
        }
        Ok(())
    }
}

#[async_trait]
impl RouteDeviationStateRepository for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn RouteDeviationStateTx>> {
        let guard = self.data.clone().lock_owned().await;
        Ok(Box::new(MemoryRouteDeviationTx {
            guard,
            states: Vec::new(),
        }))
    }

    async fn get(
        &self,
        subject_id: &str,
        route_id: Uuid,
    ) -> Result<Option<RouteDeviationState>> {
        Ok(self
            .data
            .lock()
            .await
            .deviation
            .get(&(subject_id.to_string(), route_id))
            .cloned())
    }

    async fn delete_by_route(&self, route_id: Uuid) -> Result<u64> {
        let mut data = self.data.lock().await;
        let before = data.deviation.len();
        data.deviation.retain(|(_, r), _| *r != route_id);
        Ok((before - data.deviation.len()) as u64)
    }

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64> {
        let mut data = self.data.lock().await;
        let before = data.deviation.len();
        data.deviation.retain(|(s, _), _| s != subject_id);
        Ok((before - data.deviation.len()) as u64)
    }
}

// =============================================================================
// Geo events
// =============================================================================

#[async_trait]
impl GeoEventRepository for MemoryStore {
    async fn list_for_subject(&self, subject_id: &str, limit: i64) -> Result<Vec<GeoEvent>> {
        let data = self.data.lock().await;
        let mut events: Vec<GeoEvent> = data
            .events
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.ts.cmp(&a.ts).then(b.id.cmp(&a.id)));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }
}

// =============================================================================
// Areas / routes
// =============================================================================

#[async_trait]
impl AreaRepository for MemoryStore {
    async fn candidates_for_point(
        &self,
        latitude: f64,
        longitude: f64,
        limit: usize,
    ) -> Result<Vec<Area>> {
        let data = self.data.lock().await;
        let mut areas: Vec<Area> = data
            .areas
            .values()
            .filter(|stored| stored.area.is_active())
            .filter(|stored| {
                stored.geom.bounding_rect().is_some_and(|rect| {
                    (rect.min().x..=rect.max().x).contains(&longitude)
                        && (rect.min().y..=rect.max().y).contains(&latitude)
                })
            })
            .map(|stored| stored.area.clone())
            .collect();
        areas.sort_by_key(|a| a.id);
        areas.truncate(limit + 1);
        Ok(areas)
    }

    async fn contains_point(&self, area_id: Uuid, latitude: f64, longitude: f64) -> Result<bool> {
        let data = self.data.lock().await;
        if data.failing_areas.contains(&area_id) {
            return Err(Error::Internal(format!(
                "injected containment failure for area {}",
                area_id
            )));
        }
        let stored = data
            .areas
            .get(&area_id)
            .ok_or_else(|| Error::NotFound(format!("area {}", area_id)))?;
        Ok(stored.geom.contains(&Point::new(longitude, latitude)))
    }

    async fn get(&self, area_id: Uuid) -> Result<Option<Area>> {
        Ok(self
            .data
            .lock()
            .await
            .areas
            .get(&area_id)
            .map(|s| s.area.clone()))
    }

    async fn mark_deleted(&self, area_id: Uuid) -> Result<Area> {
        let mut data = self.data.lock().await;
        let stored = data
            .areas
            .get_mut(&area_id)
            .filter(|s| s.area.state != STATE_DELETED)
            .ok_or_else(|| Error::NotFound(format!("area {}", area_id)))?;
        stored.area.state = STATE_DELETED;
        stored.area.modified_at = Utc::now();
        Ok(stored.area.clone())
    }
}

#[async_trait]
impl RouteRepository for MemoryStore {
    async fn active_assignments_for_subject(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<AssignedRoute>> {
        let data = self.data.lock().await;
        Ok(data
            .assignments
            .iter()
            .filter(|a| a.subject_id == subject_id && a.state == STATE_ACTIVE && a.is_valid_at(at))
            .filter_map(|a| {
                let stored = data.routes.get(&a.route_id)?;
                (stored.route.state == STATE_ACTIVE && stored.route.has_deviation_config()).then(
                    || AssignedRoute {
                        assignment_id: a.id,
                        route: stored.route.clone(),
                    },
                )
            })
            .collect())
    }

    async fn distance_to_route(
        &self,
        route_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<f64> {
        let data = self.data.lock().await;
        if data.failing_routes.contains(&route_id) {
            return Err(Error::Internal(format!(
                "injected distance failure for route {}",
                route_id
            )));
        }
        let stored = data
            .routes
            .get(&route_id)
            .ok_or_else(|| Error::NotFound(format!("route {}", route_id)))?;
        let point = Point::new(longitude, latitude);
        match stored.geom.closest_point(&point) {
            Closest::Intersection(nearest) | Closest::SinglePoint(nearest) => {
                Ok(point.haversine_distance(&nearest))
            }
            Closest::Indeterminate => Err(Error::Internal(format!(
                "route {} has no geometry",
                route_id
            ))),
        }
    }

    async fn get(&self, route_id: Uuid) -> Result<Option<Route>> {
        Ok(self
            .data
            .lock()
            .await
            .routes
            .get(&route_id)
            .map(|s| s.route.clone()))
    }

    async fn mark_deleted(&self, route_id: Uuid) -> Result<Route> {
        let mut data = self.data.lock().await;
        let stored = data
            .routes
            .get_mut(&route_id)
            .filter(|s| s.route.state != STATE_DELETED)
            .ok_or_else(|| Error::NotFound(format!("route {}", route_id)))?;
        stored.route.state = STATE_DELETED;
        stored.route.modified_at = Utc::now();
        Ok(stored.route.clone())
    }

    async fn delete_assignments_by_route(&self, route_id: Uuid) -> Result<u64> {
        let mut data = self.data.lock().await;
        let mut removed = 0;
        for assignment in data
            .assignments
            .iter_mut()
            .filter(|a| a.route_id == route_id && a.state == STATE_ACTIVE)
        {
            assignment.state = STATE_DELETED;
            removed += 1;
        }
        Ok(removed)
    }
}

// =============================================================================
// Retention
// =============================================================================

fn delete_up_to<T>(rows: &mut Vec<T>, batch_size: i64, expired: impl Fn(&T) -> bool) -> u64 {
    let mut budget = batch_size.max(0) as u64;
    let mut removed = 0;
    rows.retain(|row| {
        if budget > 0 && expired(row) {
            budget -= 1;
            removed += 1;
            false
        } else {
            true
        }
    });
    removed
}

#[async_trait]
impl RetentionRepository for MemoryStore {
    async fn delete_location_points_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let mut data = self.data.lock().await;
        Ok(delete_up_to(&mut data.points, batch_size, |p| {
            p.ingested_at < cutoff
        }))
    }

    async fn delete_geo_events_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let mut data = self.data.lock().await;
        Ok(delete_up_to(&mut data.events, batch_size, |e| e.ts < cutoff))
    }

    async fn delete_geofence_states_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64> {
        let mut data = self.data.lock().await;
        let mut budget = batch_size.max(0) as u64;
        let mut removed = 0;
        data.geofence.retain(|_, state| {
            if budget > 0 && state.updated_at < cutoff {
                budget -= 1;
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn ensure_partitions(&self, months_ahead: i32) -> Result<()> {
        let mut data = self.data.lock().await;
        if data.fail_partitions {
            return Err(Error::Internal(
                "function create_location_points_partitions does not exist".into(),
            ));
        }
        data.partition_runs.push(months_ahead);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use geo::{line_string, polygon};

    fn square() -> MultiPolygon<f64> {
        polygon![
            (x: 13.0, y: 52.0),
            (x: 13.1, y: 52.0),
            (x: 13.1, y: 52.1),
            (x: 13.0, y: 52.1),
            (x: 13.0, y: 52.0),
        ]
        .into()
    }

    fn point(subject: &str, ts: DateTime<Utc>, ingested_at: DateTime<Utc>) -> LocationPoint {
        LocationPoint {
            id: Uuid::now_v7(),
            subject_id: subject.to_string(),
            ts,
            ingested_at,
            latitude: 52.05,
            longitude: 13.05,
            accuracy: 5.0,
            altitude: None,
            speed: None,
            bearing: None,
            source: LocationSource::Gps,
            extras: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_candidates_and_containment() {
        let store = MemoryStore::new();
        let area = store.insert_area("owner-1", "depot", square()).await;

        let candidates = store.candidates_for_point(52.05, 13.05, 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(store.contains_point(area.id, 52.05, 13.05).await.unwrap());

        assert!(store.candidates_for_point(40.0, 13.05, 10).await.unwrap().is_empty());
        assert!(!store.contains_point(area.id, 40.0, 13.05).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_area_not_a_candidate() {
        let store = MemoryStore::new();
        let area = store.insert_area("owner-1", "depot", square()).await;
        AreaRepository::mark_deleted(&store, area.id).await.unwrap();
        assert!(store.candidates_for_point(52.05, 13.05, 10).await.unwrap().is_empty());
        assert!(matches!(
            AreaRepository::mark_deleted(&store, area.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_candidates_return_one_past_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert_area("owner-1", &format!("a{i}"), square()).await;
        }
        let candidates = store.candidates_for_point(52.05, 13.05, 2).await.unwrap();
        assert_eq!(candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_distance_to_route() {
        let store = MemoryStore::new();
        let route = store
            .insert_route(
                "owner-1",
                "east-west",
                line_string![(x: 13.0, y: 52.0), (x: 13.1, y: 52.0)],
                Some(50.0),
                None,
                None,
            )
            .await;

        let on_route = store.distance_to_route(route.id, 52.0, 13.05).await.unwrap();
        assert!(on_route < 1.0);

        // ~0.001 deg of latitude is ~111 m
        let off_route = store.distance_to_route(route.id, 52.001, 13.05).await.unwrap();
        assert!((off_route - 111.2).abs() < 2.0, "distance was {off_route}");
    }

    #[tokio::test]
    async fn test_latest_position_never_regresses() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let newer = LatestPosition {
            subject_id: "device-1".into(),
            latitude: 1.0,
            longitude: 1.0,
            accuracy: 5.0,
            ts: now,
        };
        let older = LatestPosition {
            ts: now - Duration::minutes(1),
            latitude: 2.0,
            ..newer.clone()
        };
        assert!(store.upsert(&newer).await.unwrap());
        assert!(!store.upsert(&older).await.unwrap());
        assert_eq!(
            LatestPositionRepository::get(&store, "device-1").await.unwrap().unwrap().latitude,
            1.0
        );
    }

    #[tokio::test]
    async fn test_geofence_tx_rollback_on_drop() {
        let store = MemoryStore::new();
        let area_id = Uuid::now_v7();
        {
            let mut tx = GeofenceStateRepository::begin(&store).await.unwrap();
            let mut state = GeofenceState::outside("device-1", area_id);
            state.inside = true;
            tx.upsert_state(&state).await.unwrap();
        }
        assert!(GeofenceStateRepository::get(&store, "device-1", area_id)
            .await
            .unwrap()
            .is_none());

        let mut tx = GeofenceStateRepository::begin(&store).await.unwrap();
        tx.upsert_state(&GeofenceState::outside("device-1", area_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.geofence_state_count().await, 1);
    }

    #[tokio::test]
    async fn test_find_unprocessed_newest_per_subject() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = point("device-1", now - Duration::minutes(5), now);
        let new = point("device-1", now - Duration::minutes(1), now);
        let other = point("device-2", now - Duration::minutes(2), now);
        store
            .insert_batch(&[old.clone(), new.clone(), other.clone()])
            .await
            .unwrap();

        let rows = store
            .find_unprocessed(now - Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].point_id, new.id);
        assert_eq!(rows[1].point_id, other.id);

        store
            .upsert(&LatestPosition {
                subject_id: "device-1".into(),
                latitude: 0.0,
                longitude: 0.0,
                accuracy: 0.0,
                ts: new.ts,
            })
            .await
            .unwrap();
        let rows = store
            .find_unprocessed(now - Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "device-2");
    }

    #[tokio::test]
    async fn test_retention_batches_bounded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let points: Vec<_> = (0..5)
            .map(|_| point("device-1", now, now - Duration::days(100)))
            .collect();
        store.insert_batch(&points).await.unwrap();

        let cutoff = now - Duration::days(90);
        assert_eq!(store.delete_location_points_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(store.delete_location_points_before(cutoff, 2).await.unwrap(), 2);
        assert_eq!(store.delete_location_points_before(cutoff, 2).await.unwrap(), 1);
        assert_eq!(store.delete_location_points_before(cutoff, 2).await.unwrap(), 0);
    }
}
