//! Core data models for geotrack.
//!
//! These types are shared across all geotrack crates and represent the
//! persisted entities (points, areas, routes, state rows, geo events) plus the
//! ingestion request/response shapes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// ENUMS
// =============================================================================

/// How a location fix was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationSource {
    Gps,
    Network,
    Ip,
    Manual,
}

impl LocationSource {
    /// Map the wire/database discriminant to a source. Unknown values yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Gps),
            1 => Some(Self::Network),
            2 => Some(Self::Ip),
            3 => Some(Self::Manual),
            _ => None,
        }
    }

    /// Discriminant stored in the `source smallint` column.
    pub fn code(self) -> i16 {
        match self {
            Self::Gps => 0,
            Self::Network => 1,
            Self::Ip => 2,
            Self::Manual => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gps => "GPS",
            Self::Network => "NETWORK",
            Self::Ip => "IP",
            Self::Manual => "MANUAL",
        }
    }
}

/// Classification of an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AreaType {
    #[default]
    Land,
    Building,
    Zone,
    Fence,
    Custom,
}

impl AreaType {
    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Self::Building,
            2 => Self::Zone,
            3 => Self::Fence,
            4 => Self::Custom,
            _ => Self::Land,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::Land => 0,
            Self::Building => 1,
            Self::Zone => 2,
            Self::Fence => 3,
            Self::Custom => 4,
        }
    }
}

/// Kind of geofence transition recorded in `geo_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeoEventType {
    Enter,
    Exit,
    Dwell,
}

impl GeoEventType {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Enter),
            1 => Some(Self::Exit),
            2 => Some(Self::Dwell),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::Enter => 0,
            Self::Exit => 1,
            Self::Dwell => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "ENTER",
            Self::Exit => "EXIT",
            Self::Dwell => "DWELL",
        }
    }
}

/// Outcome reported by the route-deviation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationEventKind {
    Deviated,
    BackOnRoute,
}

impl DeviationEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deviated => "deviated",
            Self::BackOnRoute => "back_on_route",
        }
    }
}

// =============================================================================
// INGESTION TYPES
// =============================================================================

/// A single point as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPoint {
    /// Fix time; ingestion time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    /// Raw source discriminant, see [`LocationSource::from_code`].
    #[serde(default)]
    pub source: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<JsonValue>,
}

/// Batch submitted for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub subject_id: String,
    pub points: Vec<RawPoint>,
}

/// Aggregate outcome of an ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// A validated, persisted location fix. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub id: Uuid,
    pub subject_id: String,
    pub ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub source: LocationSource,
    pub extras: JsonValue,
}

/// A point persisted but not yet reflected in the subject's latest position.
#[derive(Debug, Clone, PartialEq)]
pub struct UnprocessedPoint {
    pub point_id: Uuid,
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub ts: DateTime<Utc>,
}

// =============================================================================
// AREA / ROUTE TYPES (collaborator-owned reference data)
// =============================================================================

/// A polygon/multipolygon geofence. Geometry lives in PostGIS columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub area_type: AreaType,
    pub area_m2: Option<f64>,
    pub perimeter_m: Option<f64>,
    pub state: i16,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Area {
    pub fn is_active(&self) -> bool {
        self.state == defaults::STATE_ACTIVE
    }
}

/// Request to create an area. `geometry_geojson` must be a Polygon or MultiPolygon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAreaRequest {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub area_type: AreaType,
    pub geometry_geojson: String,
}

/// A line geometry subjects can be monitored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub length_m: Option<f64>,
    pub state: i16,
    pub deviation_threshold_m: Option<f64>,
    pub deviation_consecutive_count: Option<i32>,
    pub deviation_cooldown_sec: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Resolved per-route deviation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationParams {
    pub threshold_m: f64,
    pub consecutive_count: i32,
    pub cooldown: Duration,
}

impl Route {
    /// A route participates in deviation evaluation only when a threshold is set.
    pub fn has_deviation_config(&self) -> bool {
        self.deviation_threshold_m.is_some()
    }

    /// Threshold plus consecutive-count/cooldown, the latter two falling back to
    /// the engine defaults when unset or non-positive.
    pub fn deviation_params(&self) -> Option<DeviationParams> {
        let threshold_m = self.deviation_threshold_m?;
        let consecutive_count = self
            .deviation_consecutive_count
            .filter(|c| *c > 0)
            .unwrap_or(defaults::ROUTE_DEVIATION_CONSECUTIVE_COUNT);
        let cooldown_secs = self
            .deviation_cooldown_sec
            .filter(|c| *c > 0)
            .map(i64::from)
            .unwrap_or(defaults::ROUTE_DEVIATION_COOLDOWN_SECS);
        Some(DeviationParams {
            threshold_m,
            consecutive_count,
            cooldown: Duration::seconds(cooldown_secs),
        })
    }
}

/// Request to create a route. `geometry_geojson` must be a LineString.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRouteRequest {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub geometry_geojson: String,
    #[serde(default)]
    pub deviation_threshold_m: Option<f64>,
    #[serde(default)]
    pub deviation_consecutive_count: Option<i32>,
    #[serde(default)]
    pub deviation_cooldown_sec: Option<i32>,
}

/// Subject-to-route mapping with an optional validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAssignment {
    pub id: Uuid,
    pub subject_id: String,
    pub route_id: Uuid,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub state: i16,
}

impl RouteAssignment {
    /// Whether the validity window (open-ended on either side) covers `at`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= at)
            && self.valid_until.map_or(true, |until| at <= until)
    }
}

/// An active assignment joined with its route.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedRoute {
    pub assignment_id: Uuid,
    pub route: Route,
}

// =============================================================================
// STATE ROWS
// =============================================================================

/// Memory of the enter/exit/dwell machine for one (subject, area).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceState {
    pub subject_id: String,
    pub area_id: Uuid,
    pub inside: bool,
    pub last_transition: Option<DateTime<Utc>>,
    /// Set only while inside.
    pub enter_ts: Option<DateTime<Utc>>,
    pub last_point_ts: Option<DateTime<Utc>>,
    pub last_lat: f64,
    pub last_lon: f64,
    pub updated_at: DateTime<Utc>,
}

impl GeofenceState {
    /// The implicit state of a pair that has never been evaluated.
    pub fn outside(subject_id: impl Into<String>, area_id: Uuid) -> Self {
        Self {
            subject_id: subject_id.into(),
            area_id,
            inside: false,
            last_transition: None,
            enter_ts: None,
            last_point_ts: None,
            last_lat: 0.0,
            last_lon: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Ordering guard: true when this row already reflects a later point.
    pub fn is_newer_than(&self, ts: DateTime<Utc>) -> bool {
        self.last_point_ts.is_some_and(|last| ts < last)
    }
}

/// Append-only record of an ENTER/EXIT/DWELL transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEvent {
    pub id: Uuid,
    pub subject_id: String,
    pub area_id: Uuid,
    pub event_type: GeoEventType,
    pub ts: DateTime<Utc>,
    /// In [0.01, 1.0].
    pub confidence: f64,
    pub point_id: Option<Uuid>,
}

/// Memory of the deviation machine for one (subject, route).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDeviationState {
    pub subject_id: String,
    pub route_id: Uuid,
    pub deviated: bool,
    pub consecutive_off_route: i32,
    pub last_deviation_event_at: Option<DateTime<Utc>>,
    pub last_point_ts: Option<DateTime<Utc>>,
    pub last_lat: f64,
    pub last_lon: f64,
    pub updated_at: DateTime<Utc>,
}

impl RouteDeviationState {
    pub fn on_route(subject_id: impl Into<String>, route_id: Uuid) -> Self {
        Self {
            subject_id: subject_id.into(),
            route_id,
            deviated: false,
            consecutive_off_route: 0,
            last_deviation_event_at: None,
            last_point_ts: None,
            last_lat: 0.0,
            last_lon: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Ordering guard for the off-route counter. Unlike the geofence guard,
    /// an equal timestamp counts as already applied: redelivering the latest
    /// point must not increment the counter twice.
    pub fn has_applied(&self, ts: DateTime<Utc>) -> bool {
        self.last_point_ts.is_some_and(|last| ts <= last)
    }
}

/// Most recent known position per subject, never regressed by older writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPosition {
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub ts: DateTime<Utc>,
}
