pub mod player;
pub mod punishment;
