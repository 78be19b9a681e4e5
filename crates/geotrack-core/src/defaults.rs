//! Centralized default constants for the geotrack detection engine.
//!
//! **This module is the single source of truth** for all shared default values.
//! Engine configuration structs fall back to these when an environment value
//! is missing, unparseable, or non-positive.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// INGESTION
// =============================================================================

/// Maximum number of points accepted in a single ingestion batch.
pub const INGESTION_MAX_BATCH_SIZE: usize = 1000;

// =============================================================================
// VALIDATION
// =============================================================================

/// Minimum subject id length (after trimming).
pub const SUBJECT_ID_MIN_LEN: usize = 3;

/// Maximum subject id length; matches the `varchar(40)` key columns.
pub const SUBJECT_ID_MAX_LEN: usize = 40;

/// Largest accuracy radius (metres) accepted at ingestion.
pub const MAX_ACCURACY_M: f64 = 10_000.0;

/// How far into the future a point timestamp may be before it is rejected.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

// =============================================================================
// GEOFENCE
// =============================================================================

/// Accuracy (metres) at or below which a boundary-crossing flip is trusted.
pub const GEOFENCE_HYSTERESIS_BUFFER_M: f64 = 30.0;

/// Continuous presence (seconds) inside an area before a DWELL event fires.
pub const GEOFENCE_DWELL_THRESHOLD_SECS: i64 = 120;

/// Points less precise than this (metres) are not evaluated against areas.
pub const GEOFENCE_MAX_ACCURACY_M: f64 = 500.0;

/// Cap on bounding-box candidate areas evaluated per point.
pub const GEOFENCE_MAX_CANDIDATE_AREAS: usize = 100;

/// Accuracy decay scale (metres) for confidence scoring.
pub const CONFIDENCE_DECAY_M: f64 = 100.0;

/// Lowest confidence ever assigned to a geo event.
pub const CONFIDENCE_FLOOR: f64 = 0.01;

// =============================================================================
// ROUTE DEVIATION
// =============================================================================

/// Points less precise than this (metres) are not evaluated against routes.
pub const ROUTE_DEVIATION_MAX_ACCURACY_M: f64 = 500.0;

/// Consecutive off-route pings required when a route leaves it unset.
pub const ROUTE_DEVIATION_CONSECUTIVE_COUNT: i32 = 3;

/// Seconds before a repeat DEVIATED event when a route leaves it unset.
pub const ROUTE_DEVIATION_COOLDOWN_SECS: i64 = 300;

// =============================================================================
// CATCH-UP
// =============================================================================

/// Window (seconds) of recently ingested points scanned by catch-up.
pub const CATCHUP_LOOKBACK_SECS: i64 = 3600;

/// Maximum number of subjects re-emitted per catch-up run.
pub const CATCHUP_BATCH_SIZE: i64 = 500;

// =============================================================================
// RETENTION
// =============================================================================

/// Days raw location points are kept (by ingestion time).
pub const RETENTION_LOCATION_POINT_DAYS: i64 = 90;

/// Days geo events are kept.
pub const RETENTION_GEO_EVENT_DAYS: i64 = 365;

/// Days a geofence state row may go without updates before removal.
pub const RETENTION_GEOFENCE_STATE_DAYS: i64 = 30;

/// Months of future partitions kept ahead for `location_points`.
pub const RETENTION_PARTITION_MONTHS: i32 = 3;

/// Rows deleted per retention batch.
pub const RETENTION_BATCH_SIZE: i64 = 10_000;

/// Seconds between retention runs (24h).
pub const RETENTION_INTERVAL_SECS: u64 = 86_400;

// =============================================================================
// EVENT BUS & DISPATCH
// =============================================================================

/// Broadcast buffer for the in-process event bus.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Maximum handler executions in flight in the dispatcher.
pub const DISPATCH_MAX_CONCURRENT: usize = 8;

/// Per-handler execution timeout in seconds.
pub const DISPATCH_HANDLER_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Row state value for live areas, routes and assignments.
pub const STATE_ACTIVE: i16 = 2;

/// Row state value for soft-deleted areas, routes and assignments.
pub const STATE_DELETED: i16 = 4;
