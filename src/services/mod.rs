pub mod engine;
pub mod sweeper;

pub use engine::PunishmentEngine;
