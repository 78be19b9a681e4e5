//! geotrack-worker - event dispatcher, catch-up and retention for the
//! geolocation detection engine

mod telemetry;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geotrack_core::{
    CatchUpConfig, DispatcherConfig, Error, EventBus, EventPublisher, GeofenceConfig,
    RetentionConfig, RouteDeviationConfig,
};
use geotrack_db::{log_pool_metrics, Database, PoolConfig};
use geotrack_engine::{default_handlers, CatchUpJob, EventDispatcher, RetentionScheduler, Stores};

fn stores(db: &Database) -> Stores {
    Stores {
        location_points: Arc::new(db.location_points.clone()),
        latest_positions: Arc::new(db.latest_positions.clone()),
        geofence_states: Arc::new(db.geofence_states.clone()),
        route_deviation_states: Arc::new(db.route_deviation_states.clone()),
        areas: Arc::new(db.areas.clone()),
        routes: Arc::new(db.routes.clone()),
        retention: Arc::new(db.retention.clone()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "geotrack=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "geotrack_worker=info,geotrack_engine=info,geotrack_db=info,geotrack_core=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("geotrack-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let metrics = telemetry::init_metrics();

    // Only missing startup configuration is fatal
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| Error::Config("DATABASE_URL must be set".into()))?;
    let bus_capacity = std::env::var("EVENT_BUS_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(geotrack_core::defaults::EVENT_BUS_CAPACITY);

    info!(subsystem = "worker", "Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    log_pool_metrics(db.pool());

    info!(subsystem = "worker", "Running database migrations...");
    db.migrate().await?;
    info!(subsystem = "worker", "Database migrations complete");

    let stores = stores(&db);
    let bus = EventBus::new(bus_capacity);
    let publisher: Arc<dyn EventPublisher> = Arc::new(bus.clone());

    let dispatcher = default_handlers(
        &stores,
        publisher.clone(),
        GeofenceConfig::from_env(),
        RouteDeviationConfig::from_env(),
    )
    .into_iter()
    .fold(
        EventDispatcher::new(bus.clone(), DispatcherConfig::from_env()),
        |dispatcher, handler| dispatcher.with_shared_handler(handler),
    );
    let dispatcher = dispatcher.start();

    // Catch-up needs the dispatcher subscribed before it re-emits
    let catch_up = CatchUpJob::new(
        stores.location_points.clone(),
        publisher.clone(),
        CatchUpConfig::from_env(),
    );
    match catch_up.run().await {
        Ok(report) => info!(
            subsystem = "worker",
            found = report.found,
            emitted = report.emitted,
            "Startup catch-up complete"
        ),
        Err(e) => warn!(subsystem = "worker", error = %e, "Startup catch-up failed"),
    }

    let retention =
        RetentionScheduler::new(stores.retention.clone(), RetentionConfig::from_env()).start();

    info!(subsystem = "worker", "geotrack worker running");
    tokio::signal::ctrl_c().await?;
    info!(subsystem = "worker", "Shutdown signal received");

    if let Err(e) = retention.shutdown().await {
        error!(subsystem = "worker", error = %e, "Retention scheduler shutdown failed");
    }
    if let Err(e) = dispatcher.shutdown().await {
        error!(subsystem = "worker", error = %e, "Dispatcher shutdown failed");
    }
    db.pool().close().await;
    metrics.shutdown();
    info!(subsystem = "worker", "geotrack worker stopped");
    Ok(())
}
