//! Connection pool sizing for the detection engines.
//!
//! Every geofence or route evaluation holds one connection for the length of
//! its per-area transaction, and the dispatcher runs up to
//! `DISPATCH_MAX_CONCURRENT` handlers at once. The default pool covers that
//! plus headroom for ingestion writes and the retention pass. Acquiring is
//! bounded by a short timeout: an evaluation that cannot get a connection
//! fails that one area and is retried by catch-up, instead of stalling the
//! handler until the dispatcher timeout.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_MAX_CONNECTIONS` | `DISPATCH_MAX_CONCURRENT + 4` |
//! | `DATABASE_MIN_CONNECTIONS` | `1` |
//! | `DATABASE_ACQUIRE_TIMEOUT_SEC` | `5` |

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use geotrack_core::defaults::DISPATCH_MAX_CONCURRENT;
use geotrack_core::{Error, Result};

/// Connections kept beyond the dispatcher bound for ingestion and retention.
pub const POOL_HEADROOM: u32 = 4;

/// Default acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a state transaction waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DISPATCH_MAX_CONCURRENT as u32 + POOL_HEADROOM,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable or non-positive values
    /// fall back to the default, and `min_connections` is capped at
    /// `max_connections`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = Self::default();
        let read = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|n| *n > 0)
        };

        let max_connections = read("DATABASE_MAX_CONNECTIONS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.max_connections);
        let min_connections = read("DATABASE_MIN_CONNECTIONS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.min_connections)
            .min(max_connections);
        let acquire_timeout = read("DATABASE_ACQUIRE_TIMEOUT_SEC")
            .map(Duration::from_secs)
            .unwrap_or(defaults.acquire_timeout);

        Self {
            max_connections,
            min_connections,
            acquire_timeout,
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self.min_connections = self.min_connections.min(n);
        self
    }
}

/// Open a pool sized by `config`.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "database",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool occupancy; warns when every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "database",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "database",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections, state transactions may queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_covers_dispatcher_concurrency() {
        let config = PoolConfig::default();
        assert!(config.max_connections as usize > DISPATCH_MAX_CONCURRENT);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "32"),
            ("DATABASE_MIN_CONNECTIONS", "4"),
            ("DATABASE_ACQUIRE_TIMEOUT_SEC", "2"),
        ]));
        assert_eq!(config.max_connections, 32);
        assert_eq!(config.min_connections, 4);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_lookup_invalid_values_fall_back() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("DATABASE_MIN_CONNECTIONS", "many"),
            ("DATABASE_ACQUIRE_TIMEOUT_SEC", "-3"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_min_connections_capped_at_max() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "2"),
            ("DATABASE_MIN_CONNECTIONS", "6"),
        ]));
        assert_eq!(config.min_connections, 2);

        let config = PoolConfig::from_lookup(lookup(&[("DATABASE_MIN_CONNECTIONS", "3")]))
            .with_max_connections(2);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.min_connections, 2);
    }
}
