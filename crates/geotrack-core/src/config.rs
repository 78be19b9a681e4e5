//! Per-engine configuration.
//!
//! Each struct has a `Default` built from [`crate::defaults`], a `from_env()`
//! reader, and `with_*` builders. Missing, unparseable or non-positive
//! environment values fall back to the default.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `INGESTION_MAX_BATCH_SIZE` | `1000` |
//! | `GEOFENCE_HYSTERESIS_BUFFER_M` | `30` |
//! | `GEOFENCE_DWELL_THRESHOLD_SEC` | `120` |
//! | `GEOFENCE_MAX_ACCURACY_M` | `500` |
//! | `GEOFENCE_MAX_CANDIDATE_AREAS` | `100` |
//! | `ROUTE_DEVIATION_MAX_ACCURACY_M` | `500` |
//! | `CATCHUP_LOOKBACK_SEC` | `3600` |
//! | `CATCHUP_BATCH_SIZE` | `500` |
//! | `RETENTION_LOCATION_POINT_DAYS` | `90` |
//! | `RETENTION_GEO_EVENT_DAYS` | `365` |
//! | `RETENTION_GEOFENCE_STATE_DAYS` | `30` |
//! | `RETENTION_PARTITION_MONTHS` | `3` |
//! | `RETENTION_BATCH_SIZE` | `10000` |
//! | `RETENTION_INTERVAL_SEC` | `86400` |
//! | `DISPATCH_MAX_CONCURRENT` | `8` |
//! | `DISPATCH_HANDLER_TIMEOUT_SEC` | `30` |

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::defaults;

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse `key` via `lookup`, keeping only strictly positive values.
fn positive<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

// =============================================================================
// INGESTION
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    pub max_batch_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: defaults::INGESTION_MAX_BATCH_SIZE,
        }
    }
}

impl IngestionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            max_batch_size: positive(
                &lookup,
                "INGESTION_MAX_BATCH_SIZE",
                defaults::INGESTION_MAX_BATCH_SIZE,
            ),
        }
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }
}

// =============================================================================
// GEOFENCE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceConfig {
    /// Accuracy (m) at or below which a boundary flip is honored.
    pub hysteresis_buffer_m: f64,
    pub dwell_threshold: Duration,
    pub max_accuracy_m: f64,
    pub max_candidate_areas: usize,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            hysteresis_buffer_m: defaults::GEOFENCE_HYSTERESIS_BUFFER_M,
            dwell_threshold: Duration::seconds(defaults::GEOFENCE_DWELL_THRESHOLD_SECS),
            max_accuracy_m: defaults::GEOFENCE_MAX_ACCURACY_M,
            max_candidate_areas: defaults::GEOFENCE_MAX_CANDIDATE_AREAS,
        }
    }
}

impl GeofenceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            hysteresis_buffer_m: positive(
                &lookup,
                "GEOFENCE_HYSTERESIS_BUFFER_M",
                defaults::GEOFENCE_HYSTERESIS_BUFFER_M,
            ),
            dwell_threshold: Duration::seconds(positive(
                &lookup,
                "GEOFENCE_DWELL_THRESHOLD_SEC",
                defaults::GEOFENCE_DWELL_THRESHOLD_SECS,
            )),
            max_accuracy_m: positive(
                &lookup,
                "GEOFENCE_MAX_ACCURACY_M",
                defaults::GEOFENCE_MAX_ACCURACY_M,
            ),
            max_candidate_areas: positive(
                &lookup,
                "GEOFENCE_MAX_CANDIDATE_AREAS",
                defaults::GEOFENCE_MAX_CANDIDATE_AREAS,
            ),
        }
    }

    pub fn with_hysteresis_buffer(mut self, meters: f64) -> Self {
        self.hysteresis_buffer_m = meters;
        self
    }

    pub fn with_dwell_threshold(mut self, threshold: Duration) -> Self {
        self.dwell_threshold = threshold;
        self
    }

    pub fn with_max_accuracy(mut self, meters: f64) -> Self {
        self.max_accuracy_m = meters;
        self
    }

    pub fn with_max_candidate_areas(mut self, max: usize) -> Self {
        self.max_candidate_areas = max;
        self
    }
}

// =============================================================================
// ROUTE DEVIATION
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDeviationConfig {
    pub max_accuracy_m: f64,
}

impl Default for RouteDeviationConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: defaults::ROUTE_DEVIATION_MAX_ACCURACY_M,
        }
    }
}

impl RouteDeviationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            max_accuracy_m: positive(
                &lookup,
                "ROUTE_DEVIATION_MAX_ACCURACY_M",
                defaults::ROUTE_DEVIATION_MAX_ACCURACY_M,
            ),
        }
    }

    pub fn with_max_accuracy(mut self, meters: f64) -> Self {
        self.max_accuracy_m = meters;
        self
    }
}

// =============================================================================
// CATCH-UP
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CatchUpConfig {
    pub lookback: Duration,
    pub batch_size: i64,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::seconds(defaults::CATCHUP_LOOKBACK_SECS),
            batch_size: defaults::CATCHUP_BATCH_SIZE,
        }
    }
}

impl CatchUpConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            lookback: Duration::seconds(positive(
                &lookup,
                "CATCHUP_LOOKBACK_SEC",
                defaults::CATCHUP_LOOKBACK_SECS,
            )),
            batch_size: positive(&lookup, "CATCHUP_BATCH_SIZE", defaults::CATCHUP_BATCH_SIZE),
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }
}

// =============================================================================
// RETENTION
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    pub location_point_days: i64,
    pub geo_event_days: i64,
    pub geofence_state_days: i64,
    pub partition_months_ahead: i32,
    pub batch_size: i64,
    pub interval: StdDuration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            location_point_days: defaults::RETENTION_LOCATION_POINT_DAYS,
            geo_event_days: defaults::RETENTION_GEO_EVENT_DAYS,
            geofence_state_days: defaults::RETENTION_GEOFENCE_STATE_DAYS,
            partition_months_ahead: defaults::RETENTION_PARTITION_MONTHS,
            batch_size: defaults::RETENTION_BATCH_SIZE,
            interval: StdDuration::from_secs(defaults::RETENTION_INTERVAL_SECS),
        }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            location_point_days: positive(
                &lookup,
                "RETENTION_LOCATION_POINT_DAYS",
                defaults::RETENTION_LOCATION_POINT_DAYS,
            ),
            geo_event_days: positive(
                &lookup,
                "RETENTION_GEO_EVENT_DAYS",
                defaults::RETENTION_GEO_EVENT_DAYS,
            ),
            geofence_state_days: positive(
                &lookup,
                "RETENTION_GEOFENCE_STATE_DAYS",
                defaults::RETENTION_GEOFENCE_STATE_DAYS,
            ),
            partition_months_ahead: positive(
                &lookup,
                "RETENTION_PARTITION_MONTHS",
                defaults::RETENTION_PARTITION_MONTHS,
            ),
            batch_size: positive(&lookup, "RETENTION_BATCH_SIZE", defaults::RETENTION_BATCH_SIZE),
            interval: StdDuration::from_secs(positive(
                &lookup,
                "RETENTION_INTERVAL_SEC",
                defaults::RETENTION_INTERVAL_SECS,
            )),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_interval(mut self, interval: StdDuration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_windows(mut self, points_days: i64, events_days: i64, states_days: i64) -> Self {
        self.location_point_days = points_days;
        self.geo_event_days = events_days;
        self.geofence_state_days = states_days;
        self
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub handler_timeout: StdDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::DISPATCH_MAX_CONCURRENT,
            handler_timeout: StdDuration::from_secs(defaults::DISPATCH_HANDLER_TIMEOUT_SECS),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            max_concurrent: positive(
                &lookup,
                "DISPATCH_MAX_CONCURRENT",
                defaults::DISPATCH_MAX_CONCURRENT,
            ),
            handler_timeout: StdDuration::from_secs(positive(
                &lookup,
                "DISPATCH_HANDLER_TIMEOUT_SEC",
                defaults::DISPATCH_HANDLER_TIMEOUT_SECS,
            )),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: StdDuration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}
