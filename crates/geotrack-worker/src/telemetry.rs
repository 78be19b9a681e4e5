//! OTLP metrics export.
//!
//! Enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. `OTEL_SERVICE_NAME`
//! overrides the default service name.

use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use tracing::{info, warn};

const DEFAULT_SERVICE_NAME: &str = "geotrack-worker";

/// Holds the installed meter provider and flushes it on shutdown.
pub struct MetricsGuard {
    provider: Option<SdkMeterProvider>,
}

impl MetricsGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                warn!(subsystem = "worker", error = ?e, "Meter provider shutdown failed");
            }
        }
    }
}

/// Install the global meter provider. Must run before the engines record
/// anything, since instruments bind to the provider on first use.
pub fn init_metrics() -> MetricsGuard {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty());
    let Some(endpoint) = endpoint else {
        info!(subsystem = "worker", "OTLP endpoint not set, metrics disabled");
        return MetricsGuard { provider: None };
    };

    let exporter = match MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            warn!(subsystem = "worker", error = ?e, "Failed to create OTLP metric exporter");
            return MetricsGuard { provider: None };
        }
    };

    let service_name = std::env::var("OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());
    let provider = SdkMeterProvider::builder()
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .with_periodic_exporter(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());

    info!(subsystem = "worker", endpoint = %endpoint, "OTLP metrics export enabled");
    MetricsGuard {
        provider: Some(provider),
    }
}
