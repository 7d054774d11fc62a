use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A player as seen by the punishment engine: a stable unique id plus the
/// last display name we saw for it. The name is refreshed opportunistically
/// whenever the player is the subject of a new punishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub uuid: Uuid,
    pub username: String,
}

impl PlayerIdentity {
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
        }
    }
}
