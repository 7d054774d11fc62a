use std::env;
use std::time::Duration;

use crate::error::Error;

const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 1_800;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Connection pool sizing and timeouts for one backend.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Bound on waiting for a free connection; elapsing surfaces
    /// `PoolExhausted` instead of blocking the caller indefinitely.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_lifetime: Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS)),
        }
    }
}

/// Active-set cache sizing. The TTL is the explicit bound on how stale a
/// lookup may be after an out-of-band database mutation; `max_entries = 0`
/// disables caching.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Everything the engine needs at construction time. The backend kind is
/// carried by the URL scheme (`sqlite:`, `postgres:`, `mysql:`); nothing
/// else changes per backend.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub sweep_interval: Duration,
}

impl EngineConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Read configuration from the environment. `DATABASE_URL` is
    /// required; tuning variables fall back to defaults.
    pub fn from_env() -> Result<Self, Error> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| Error::InvalidConfig("DATABASE_URL environment variable not set".into()))?;

        let mut config = Self::new(database_url);

        if let Some(min) = parse_env("POOL_MIN_CONNECTIONS") {
            config.pool.min_connections = min;
        }
        if let Some(max) = parse_env("POOL_MAX_CONNECTIONS") {
            config.pool.max_connections = max;
        }
        if let Some(ms) = parse_env("POOL_ACQUIRE_TIMEOUT_MS") {
            config.pool.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env("POOL_IDLE_TIMEOUT_SECS") {
            config.pool.idle_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env("POOL_MAX_LIFETIME_SECS") {
            config.pool.max_lifetime = Some(Duration::from_secs(secs));
        }
        if let Some(entries) = parse_env("CACHE_MAX_ENTRIES") {
            config.cache.max_entries = entries;
        }
        if let Some(secs) = parse_env("CACHE_TTL_SECS") {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}
