pub mod dialect;
pub mod migrate;
pub mod models;
pub mod pool;
pub mod queries;

use sqlx::AnyPool;

use crate::config::PoolConfig;
use crate::error::Error;

pub use dialect::Dialect;
pub use pool::PoolStatus;

/// One configured backend: a bounded connection pool plus the SQL dialect
/// its engine speaks. Backend selection is purely the connection URL; no
/// code path above this module diverges per engine.
#[derive(Debug, Clone)]
pub struct Datasource {
    pub pool: AnyPool,
    pub dialect: Dialect,
}

impl Datasource {
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, Error> {
        let dialect = Dialect::from_url(database_url)?;
        let pool = pool::create_pool(database_url, config).await?;
        Ok(Self { pool, dialect })
    }

    pub fn status(&self) -> PoolStatus {
        pool::pool_status(&self.pool)
    }

    /// Drain and close the pool. In-flight operations finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
