//! OpenTelemetry instruments for the engines.
//!
//! Instruments hang off the global meter [`METER_NAME`] and are created on
//! first use, so a meter provider installed at startup is picked up. With no
//! provider installed every recording is a no-op.

use std::sync::LazyLock;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use geotrack_core::{DeviationEventKind, GeoEventType};

pub const METER_NAME: &str = "geotrack";

static METRICS: LazyLock<EngineMetrics> =
    LazyLock::new(|| EngineMetrics::new(&global::meter(METER_NAME)));

/// Engine instruments on the global meter.
pub fn metrics() -> &'static EngineMetrics {
    &METRICS
}

pub struct EngineMetrics {
    ingest_batch_latency: Histogram<f64>,
    ingest_accepted: Counter<u64>,
    ingest_rejected: Counter<u64>,
    geofence_eval_latency: Histogram<f64>,
    geofence_transitions: Counter<u64>,
    route_eval_latency: Histogram<f64>,
    route_transitions: Counter<u64>,
    catchup_reemitted: Counter<u64>,
    retention_deleted: Counter<u64>,
}

impl EngineMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            ingest_batch_latency: meter
                .f64_histogram("geotrack.ingestion.batch_latency")
                .with_description("Time to validate, persist and announce one batch")
                .with_unit("ms")
                .build(),
            ingest_accepted: meter
                .u64_counter("geotrack.ingestion.accepted")
                .with_description("Points accepted by ingestion")
                .build(),
            ingest_rejected: meter
                .u64_counter("geotrack.ingestion.rejected")
                .with_description("Points rejected by validation")
                .build(),
            geofence_eval_latency: meter
                .f64_histogram("geotrack.geofence.eval_latency")
                .with_description("Time to evaluate one point against its candidate areas")
                .with_unit("ms")
                .build(),
            geofence_transitions: meter
                .u64_counter("geotrack.geofence.transitions")
                .with_description("Committed geofence events by type")
                .build(),
            route_eval_latency: meter
                .f64_histogram("geotrack.route_deviation.eval_latency")
                .with_description("Time to evaluate one point against its assigned routes")
                .with_unit("ms")
                .build(),
            route_transitions: meter
                .u64_counter("geotrack.route_deviation.transitions")
                .with_description("Route deviation state changes by type")
                .build(),
            catchup_reemitted: meter
                .u64_counter("geotrack.catchup.reemitted")
                .with_description("Points re-announced by catch-up")
                .build(),
            retention_deleted: meter
                .u64_counter("geotrack.retention.deleted")
                .with_description("Rows removed by retention")
                .build(),
        }
    }

    pub fn record_ingest_batch(&self, elapsed: Duration, accepted: usize, rejected: usize) {
        self.ingest_batch_latency.record(millis(elapsed), &[]);
        self.ingest_accepted.add(accepted as u64, &[]);
        self.ingest_rejected.add(rejected as u64, &[]);
    }

    pub fn record_geofence_eval(&self, elapsed: Duration) {
        self.geofence_eval_latency.record(millis(elapsed), &[]);
    }

    pub fn record_geofence_transition(&self, event_type: GeoEventType) {
        self.geofence_transitions
            .add(1, &[event_type_attr(event_type.as_str())]);
    }

    pub fn record_route_eval(&self, elapsed: Duration) {
        self.route_eval_latency.record(millis(elapsed), &[]);
    }

    pub fn record_route_transition(&self, kind: DeviationEventKind) {
        self.route_transitions
            .add(1, &[event_type_attr(kind.as_str())]);
    }

    pub fn record_catchup(&self, emitted: usize) {
        self.catchup_reemitted.add(emitted as u64, &[]);
    }

    pub fn record_retention(&self, table: &'static str, deleted: u64) {
        self.retention_deleted
            .add(deleted, &[KeyValue::new("table", table)]);
    }
}

fn event_type_attr(event_type: &'static str) -> KeyValue {
    KeyValue::new("event_type", event_type)
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
