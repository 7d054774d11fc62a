//! Punishment store and cache engine for multiplayer game server networks.
//!
//! banwarden records and enforces punishments (bans, mutes, kicks,
//! warnings) against players, persists them across interchangeable SQL
//! backends (SQLite, PostgreSQL, MySQL/MariaDB) and serves fast,
//! consistent "is this player currently restricted" lookups to any number
//! of front-end server processes sharing one backend.
//!
//! Platform adapters (the per-host command parsers and event hooks) talk
//! to a single façade:
//!
//! ```no_run
//! use banwarden::{EngineConfig, IssueRequest, PlayerIdentity, PunishmentEngine};
//! use banwarden::{PunishmentKind, PunishmentScope};
//! use chrono::Duration;
//! use uuid::Uuid;
//!
//! # async fn run() -> Result<(), banwarden::Error> {
//! let engine = PunishmentEngine::connect(EngineConfig::from_env()?).await?;
//!
//! let subject = PlayerIdentity::new(Uuid::new_v4(), "steve");
//! engine
//!     .issue(IssueRequest {
//!         subject: subject.clone(),
//!         kind: PunishmentKind::Mute,
//!         scope: PunishmentScope::Global,
//!         issuer: "console".to_string(),
//!         reason: Some("spam".to_string()),
//!         duration: Some(Duration::minutes(10)),
//!     })
//!     .await?;
//!
//! assert!(
//!     engine
//!         .is_restricted(subject.uuid, PunishmentKind::Mute, &PunishmentScope::Global)
//!         .await?
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Consistency model: the database is the single source of truth and all
//! mutation goes through conditional updates, so racing processes never
//! both win. Within one process, reads after a write observe it (the write
//! path refreshes the cache before returning); across processes, staleness
//! is bounded by the cache TTL and the sweep interval.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

pub use config::{CacheConfig, EngineConfig, PoolConfig};
pub use db::models::{
    IssueRequest, PlayerIdentity, PunishmentKind, PunishmentRecord, PunishmentScope,
    PunishmentStatus,
};
pub use db::{Datasource, Dialect, PoolStatus};
pub use error::Error;
pub use services::PunishmentEngine;

pub type Result<T> = std::result::Result<T, Error>;
