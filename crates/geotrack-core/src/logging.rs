//! Structured logging schema and field name constants for geotrack.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), transitions, run summaries |
//! | DEBUG | Decision points, skipped points, config choices |
//! | TRACE | Per-item iteration (candidate areas, batch rows) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "ingestion", "geofence", "route_deviation", "catchup", "retention", "database", "dispatch"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "state_machine", "scheduler", "handler"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest_batch", "evaluate", "run", "delete_batch"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tracked subject id.
pub const SUBJECT_ID: &str = "subject_id";

/// Area UUID being evaluated.
pub const AREA_ID: &str = "area_id";

/// Route UUID being evaluated.
pub const ROUTE_ID: &str = "route_id";

/// Location point UUID that triggered an evaluation.
pub const POINT_ID: &str = "point_id";

/// Namespaced event type (e.g. "geo.event.emitted") or transition kind.
pub const EVENT_TYPE: &str = "event_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of points accepted by ingestion.
pub const ACCEPTED: &str = "accepted";

/// Number of points rejected by ingestion.
pub const REJECTED: &str = "rejected";

/// Rows removed by a retention pass.
pub const DELETED: &str = "deleted";

/// Point accuracy radius in metres.
pub const ACCURACY_M: &str = "accuracy_m";

/// Distance from a point to a route in metres.
pub const DISTANCE_M: &str = "distance_m";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
