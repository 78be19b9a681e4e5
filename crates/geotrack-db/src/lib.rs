//! # geotrack-db
//!
//! PostgreSQL + PostGIS persistence for the geotrack detection engine.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for every trait in `geotrack_core::traits`
//! - Row-locked transaction handles for geofence and route-deviation state
//! - Retention deletes and monthly partition maintenance
//! - An in-memory store behind the `memory` feature
//!
//! ## Example
//!
//! ```rust,ignore
//! use geotrack_db::{Database, LatestPositionRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/geotrack").await?;
//!     db.migrate().await?;
//!
//!     if let Some(position) = db.latest_positions.get("device-42").await? {
//!         println!("{} at {},{}", position.subject_id, position.latitude, position.longitude);
//!     }
//!     Ok(())
//! }
//! ```
pub mod areas;
pub mod geo_events;
pub mod geofence_state;
pub mod latest_positions;
pub mod location_points;
#[cfg(feature = "memory")]
pub mod memory;
pub mod pool;
pub mod retention;
pub mod route_deviation_state;
pub mod routes;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use geotrack_core::*;

pub use areas::PgAreaRepository;
pub use geo_events::PgGeoEventRepository;
pub use geofence_state::{PgGeofenceStateRepository, PgGeofenceStateTx};
pub use latest_positions::PgLatestPositionRepository;
pub use location_points::PgLocationPointRepository;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use pool::{create_pool_with_config, log_pool_metrics, PoolConfig};
pub use retention::PgRetentionRepository;
pub use route_deviation_state::{PgRouteDeviationStateRepository, PgRouteDeviationStateTx};
pub use routes::PgRouteRepository;

/// Database handle aggregating every repository over one pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Monitored areas (reference data).
    pub areas: PgAreaRepository,
    /// Routes and their subject assignments.
    pub routes: PgRouteRepository,
    /// Raw point history.
    pub location_points: PgLocationPointRepository,
    /// Newest known position per subject.
    pub latest_positions: PgLatestPositionRepository,
    pub geofence_states: PgGeofenceStateRepository,
    pub route_deviation_states: PgRouteDeviationStateRepository,
    /// Read side of the geo event log.
    pub geo_events: PgGeoEventRepository,
    pub retention: PgRetentionRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            areas: PgAreaRepository::new(pool.clone()),
            routes: PgRouteRepository::new(pool.clone()),
            location_points: PgLocationPointRepository::new(pool.clone()),
            latest_positions: PgLatestPositionRepository::new(pool.clone()),
            geofence_states: PgGeofenceStateRepository::new(pool.clone()),
            route_deviation_states: PgRouteDeviationStateRepository::new(pool.clone()),
            geo_events: PgGeoEventRepository::new(pool.clone()),
            retention: PgRetentionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the default pool sizing.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool_with_config(url, PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
