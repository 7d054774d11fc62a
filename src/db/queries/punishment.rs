use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{Any, Row, Transaction};
use uuid::Uuid;

use crate::db::models::{PunishmentKind, PunishmentRecord, PunishmentScope};
use crate::db::{Datasource, Dialect};
use crate::error::Error;

const COLUMNS: &str = "id, subject_uuid, subject_name, kind, scope, issuer, reason, \
                       issued_at, expires_at, revoked_at, revoked_by, status";

/// Insert a freshly issued record. Runs inside the caller's transaction.
///
/// An id collision surfaces as [`Error::ConstraintViolation`]; with v4 ids
/// that indicates a logic bug, not a condition to retry.
pub async fn insert(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    record: &PunishmentRecord,
) -> Result<(), Error> {
    let sql = dialect.sql(
        "INSERT INTO bw_punishments (id, subject_uuid, subject_name, kind, scope, issuer, reason, \
         issued_at, expires_at, revoked_at, revoked_by, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    );
    sqlx::query(&sql)
        .bind(record.id.to_string())
        .bind(record.subject.uuid.to_string())
        .bind(record.subject.username.as_str())
        .bind(record.kind.as_str())
        .bind(record.scope.as_db())
        .bind(record.issuer.as_str())
        .bind(record.reason.clone())
        .bind(record.issued_at.timestamp_millis())
        .bind(record.expires_at.map(|t| t.timestamp_millis()))
        .bind(record.revoked_at.map(|t| t.timestamp_millis()))
        .bind(record.revoked_by.clone())
        .bind(record.status.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Conditionally revoke a record: only applies while `revoked_at` is still
/// unset and the record is active, so two racing revokes produce exactly
/// one winner regardless of which process they run in.
///
/// Returns false when the record does not exist or was already revoked or
/// expired. A record past its `expires_at` counts as expired here even if
/// no sweep has marked it yet, so the answer does not depend on sweep
/// timing.
pub async fn revoke(
    ds: &Datasource,
    id: Uuid,
    revoked_by: &str,
    at: DateTime<Utc>,
) -> Result<bool, Error> {
    let sql = ds.dialect.sql(
        "UPDATE bw_punishments SET status = 'ended', revoked_at = ?, revoked_by = ? \
         WHERE id = ? AND revoked_at IS NULL AND status = 'active' \
           AND (expires_at IS NULL OR expires_at > ?)",
    );
    let result = sqlx::query(&sql)
        .bind(at.timestamp_millis())
        .bind(revoked_by)
        .bind(id.to_string())
        .bind(at.timestamp_millis())
        .execute(&ds.pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(ds: &Datasource, id: Uuid) -> Result<Option<PunishmentRecord>, Error> {
    let sql = ds
        .dialect
        .sql(&format!("SELECT {} FROM bw_punishments WHERE id = ?", COLUMNS));
    let record = sqlx::query_as::<Any, PunishmentRecord>(&sql)
        .bind(id.to_string())
        .fetch_optional(&ds.pool)
        .await?;
    Ok(record)
}

/// All records currently restricting a subject in the given scope, most
/// recent first. The active predicate (unrevoked, unexpired as of `now`,
/// non-kick) is evaluated server-side so correctness never depends on
/// client-side filtering. A server-scope query also returns global records;
/// a global query returns only global ones.
pub async fn find_active_for(
    ds: &Datasource,
    subject: Uuid,
    scope: &PunishmentScope,
    now: DateTime<Utc>,
) -> Result<Vec<PunishmentRecord>, Error> {
    let sql = ds.dialect.sql(&format!(
        "SELECT {} FROM bw_punishments \
         WHERE subject_uuid = ? AND (scope = ? OR scope = ?) AND kind <> 'kick' \
           AND status = 'active' AND revoked_at IS NULL \
           AND (expires_at IS NULL OR expires_at > ?) \
         ORDER BY issued_at DESC",
        COLUMNS
    ));
    let records = sqlx::query_as::<Any, PunishmentRecord>(&sql)
        .bind(subject.to_string())
        .bind(scope.as_db())
        .bind(PunishmentScope::Global.as_db())
        .bind(now.timestamp_millis())
        .fetch_all(&ds.pool)
        .await?;
    Ok(records)
}

/// Paginated full history for a subject, all scopes and states, most recent
/// first.
pub async fn find_history(
    ds: &Datasource,
    subject: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<PunishmentRecord>, Error> {
    let sql = ds.dialect.sql(&format!(
        "SELECT {} FROM bw_punishments WHERE subject_uuid = ? \
         ORDER BY issued_at DESC, id DESC LIMIT ? OFFSET ?",
        COLUMNS
    ));
    let records = sqlx::query_as::<Any, PunishmentRecord>(&sql)
        .bind(subject.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&ds.pool)
        .await?;
    Ok(records)
}

/// Lifetime count of records of one kind held against a subject.
pub async fn count_for(
    ds: &Datasource,
    subject: Uuid,
    kind: PunishmentKind,
) -> Result<i64, Error> {
    let sql = ds
        .dialect
        .sql("SELECT COUNT(*) FROM bw_punishments WHERE subject_uuid = ? AND kind = ?");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(subject.to_string())
        .bind(kind.as_str())
        .fetch_one(&ds.pool)
        .await?;
    Ok(count)
}

/// Mark every record whose expiry has passed as expired, returning the
/// transition count and the distinct subjects touched (for cache
/// invalidation).
///
/// The update is conditional on `status = 'active'`, so concurrent sweeps
/// from independent processes each transition a row at most once and never
/// duplicate side effects.
pub async fn expire_older_than(
    ds: &Datasource,
    now: DateTime<Utc>,
) -> Result<(u64, Vec<Uuid>), Error> {
    let cutoff = now.timestamp_millis();

    let select = ds.dialect.sql(
        "SELECT subject_uuid FROM bw_punishments \
         WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?",
    );
    let rows = sqlx::query(&select)
        .bind(cutoff)
        .fetch_all(&ds.pool)
        .await?;

    let mut subjects = HashSet::new();
    for row in &rows {
        let uuid: String = row.try_get("subject_uuid")?;
        if let Ok(uuid) = Uuid::parse_str(&uuid) {
            subjects.insert(uuid);
        }
    }

    let update = ds.dialect.sql(
        "UPDATE bw_punishments SET status = 'expired' \
         WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?",
    );
    let result = sqlx::query(&update).bind(cutoff).execute(&ds.pool).await?;

    Ok((result.rows_affected(), subjects.into_iter().collect()))
}

/// Retention hook: hard-delete settled records issued before the cutoff.
/// Active punishments are never purged, however old.
pub async fn purge_older_than(ds: &Datasource, cutoff: DateTime<Utc>) -> Result<u64, Error> {
    let sql = ds
        .dialect
        .sql("DELETE FROM bw_punishments WHERE issued_at < ? AND status <> 'active'");
    let result = sqlx::query(&sql)
        .bind(cutoff.timestamp_millis())
        .execute(&ds.pool)
        .await?;
    Ok(result.rows_affected())
}
