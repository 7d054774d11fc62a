use std::sync::Once;

use sqlx::pool::PoolOptions;
use sqlx::AnyPool;
use sqlx::Any;
use tracing::info;

use crate::config::PoolConfig;
use crate::error::Error;

static INSTALL_DRIVERS: Once = Once::new();

/// Build the bounded connection pool for a backend.
///
/// Connections are validated before reuse (`test_before_acquire`) and
/// recycled past their idle timeout or max lifetime. Acquire waits at most
/// `acquire_timeout` and then fails with [`Error::PoolExhausted`] rather
/// than blocking indefinitely; the same timeout bounds the initial connect,
/// so an unreachable backend fails fast.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<AnyPool, Error> {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

    info!("Connecting to database...");

    let pool = PoolOptions::<Any>::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!(
        "Database connection established (max {} connections)",
        config.max_connections
    );

    Ok(pool)
}

/// Point-in-time pool occupancy, for operational diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Connections currently open (in use + idle).
    pub size: u32,
    /// Connections sitting idle in the pool.
    pub idle: usize,
}

pub fn pool_status(pool: &AnyPool) -> PoolStatus {
    PoolStatus {
        size: pool.size(),
        idle: pool.num_idle(),
    }
}
