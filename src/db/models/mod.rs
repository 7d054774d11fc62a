mod player;
mod punishment;

pub use player::PlayerIdentity;
pub(crate) use punishment::utc_now_millis;
pub use punishment::{
    IssueRequest, PunishmentKind, PunishmentRecord, PunishmentScope, PunishmentStatus,
};
