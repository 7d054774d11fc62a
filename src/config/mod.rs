mod settings;

pub use settings::{CacheConfig, EngineConfig, PoolConfig};
