use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};
use uuid::Uuid;

use crate::db::models::PlayerIdentity;
use crate::db::{Datasource, Dialect};
use crate::error::Error;

/// Insert or refresh a player identity. Runs inside the caller's
/// transaction so the identity lands atomically with the punishment that
/// referenced it.
pub async fn upsert(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    player: &PlayerIdentity,
    seen_at: DateTime<Utc>,
) -> Result<(), Error> {
    let sql = dialect.upsert_player_sql();
    sqlx::query(&sql)
        .bind(player.uuid.to_string())
        .bind(player.username.as_str())
        .bind(seen_at.timestamp_millis())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Look up a player's last-known identity.
pub async fn find(ds: &Datasource, uuid: Uuid) -> Result<Option<PlayerIdentity>, Error> {
    let sql = ds
        .dialect
        .sql("SELECT uuid, username, last_seen_at FROM bw_players WHERE uuid = ?");
    let row: Option<AnyRow> = sqlx::query(&sql)
        .bind(uuid.to_string())
        .fetch_optional(&ds.pool)
        .await?;

    match row {
        Some(row) => {
            let username: String = row.try_get("username")?;
            Ok(Some(PlayerIdentity::new(uuid, username)))
        }
        None => Ok(None),
    }
}
