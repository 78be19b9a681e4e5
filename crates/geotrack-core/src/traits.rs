//! Repository traits for the state stores and the collaborator data the
//! engines read.
//!
//! State mutations go through transaction handles (`*StateTx`) obtained from
//! `begin()`. `lock_state` takes an exclusive lock on exactly one
//! (subject, area) or (subject, route) key, including a key that has no row
//! yet; the lock is held until `commit` or until the handle is dropped, which
//! rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::*;
use crate::Result;

// =============================================================================
// LOCATION POINTS
// =============================================================================

#[async_trait]
pub trait LocationPointRepository: Send + Sync {
    /// Persist a batch of validated points in one write. Returns rows inserted.
    async fn insert_batch(&self, points: &[LocationPoint]) -> Result<u64>;

    /// Per subject, the newest point ingested after `since` whose timestamp is
    /// ahead of the subject's latest position (or that has none). At most
    /// `limit` rows.
    async fn find_unprocessed(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UnprocessedPoint>>;
}

// =============================================================================
// LATEST POSITIONS
// =============================================================================

#[async_trait]
pub trait LatestPositionRepository: Send + Sync {
    /// Conditional upsert: writes only when `position.ts` is not older than the
    /// stored row. Returns whether a row was written.
    async fn upsert(&self, position: &LatestPosition) -> Result<bool>;

    async fn get(&self, subject_id: &str) -> Result<Option<LatestPosition>>;
}

// =============================================================================
// GEOFENCE STATE
// =============================================================================

/// One geofence-state transaction.
#[async_trait]
pub trait GeofenceStateTx: Send {
    /// Read the state row with an exclusive lock. `None`, or a row without
    /// `last_point_ts`, means never evaluated.
    async fn lock_state(&mut self, subject_id: &str, area_id: Uuid)
        -> Result<Option<GeofenceState>>;

    /// Whether a DWELL event exists for the pair at or after `since`.
    async fn dwell_exists_since(
        &mut self,
        subject_id: &str,
        area_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_geo_event(&mut self, event: &GeoEvent) -> Result<()>;

    async fn upsert_state(&mut self, state: &GeofenceState) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait GeofenceStateRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn GeofenceStateTx>>;

    async fn get(&self, subject_id: &str, area_id: Uuid) -> Result<Option<GeofenceState>>;

    async fn delete_by_area(&self, area_id: Uuid) -> Result<u64>;

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64>;
}

// =============================================================================
// ROUTE DEVIATION STATE
// =============================================================================

/// One route-deviation-state transaction.
#[async_trait]
pub trait RouteDeviationStateTx: Send {
    async fn lock_state(
        &mut self,
        subject_id: &str,
        route_id: Uuid,
    ) -> Result<Option<RouteDeviationState>>;

    async fn upsert_state(&mut self, state: &RouteDeviationState) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait RouteDeviationStateRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RouteDeviationStateTx>>;

    async fn get(&self, subject_id: &str, route_id: Uuid)
        -> Result<Option<RouteDeviationState>>;

    async fn delete_by_route(&self, route_id: Uuid) -> Result<u64>;

    async fn delete_by_subject(&self, subject_id: &str) -> Result<u64>;
}

// =============================================================================
// GEO EVENTS
// =============================================================================

#[async_trait]
pub trait GeoEventRepository: Send + Sync {
    /// Most recent events for a subject, newest first.
    async fn list_for_subject(&self, subject_id: &str, limit: i64) -> Result<Vec<GeoEvent>>;
}

// =============================================================================
// AREAS / ROUTES (collaborator boundary)
// =============================================================================

#[async_trait]
pub trait AreaRepository: Send + Sync {
    /// Active areas whose bounding box intersects the point, at most `limit + 1`
    /// rows so callers can detect truncation.
    async fn candidates_for_point(
        &self,
        latitude: f64,
        longitude: f64,
        limit: usize,
    ) -> Result<Vec<Area>>;

    /// Precise containment against the area's actual geometry.
    async fn contains_point(&self, area_id: Uuid, latitude: f64, longitude: f64) -> Result<bool>;

    async fn get(&self, area_id: Uuid) -> Result<Option<Area>>;

    /// Soft delete. Errors with `NotFound` when the area does not exist.
    async fn mark_deleted(&self, area_id: Uuid) -> Result<Area>;
}

#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Active assignments for the subject valid at `at`, joined with routes that
    /// are active and have a deviation threshold configured.
    async fn active_assignments_for_subject(
        &self,
        subject_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<AssignedRoute>>;

    /// Geodesic distance in metres from the point to the route geometry.
    async fn distance_to_route(&self, route_id: Uuid, latitude: f64, longitude: f64)
        -> Result<f64>;

    async fn get(&self, route_id: Uuid) -> Result<Option<Route>>;

    async fn mark_deleted(&self, route_id: Uuid) -> Result<Route>;

    async fn delete_assignments_by_route(&self, route_id: Uuid) -> Result<u64>;
}

// =============================================================================
// RETENTION
// =============================================================================

/// Bounded-batch deletes; each call removes at most `batch_size` rows.
#[async_trait]
pub trait RetentionRepository: Send + Sync {
    async fn delete_location_points_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64>;

    async fn delete_geo_events_before(&self, cutoff: DateTime<Utc>, batch_size: i64)
        -> Result<u64>;

    async fn delete_geofence_states_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64>;

    /// Create any missing monthly partitions up to `months_ahead`.
    async fn ensure_partitions(&self, months_ahead: i32) -> Result<()>;
}
