use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use crate::db::models::PlayerIdentity;
use crate::error::Error;

/// Kind of punishment held against a player.
///
/// `Kick` is a point-in-time event with no active duration; the other kinds
/// restrict the player until revoked or expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentKind {
    Ban,
    Mute,
    Kick,
    Warning,
}

impl PunishmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentKind::Ban => "ban",
            PunishmentKind::Mute => "mute",
            PunishmentKind::Kick => "kick",
            PunishmentKind::Warning => "warning",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ban" => Some(PunishmentKind::Ban),
            "mute" => Some(PunishmentKind::Mute),
            "kick" => Some(PunishmentKind::Kick),
            "warning" => Some(PunishmentKind::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary a punishment applies over: the whole network, or one named
/// server instance. Querying a server scope also honors global records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentScope {
    Global,
    Server(String),
}

impl PunishmentScope {
    pub fn as_db(&self) -> String {
        match self {
            PunishmentScope::Global => "global".to_string(),
            PunishmentScope::Server(name) => format!("server:{}", name),
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        if s == "global" {
            Some(PunishmentScope::Global)
        } else {
            s.strip_prefix("server:")
                .map(|name| PunishmentScope::Server(name.to_string()))
        }
    }
}

impl std::fmt::Display for PunishmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_db())
    }
}

/// Stored lifecycle state of a punishment.
///
/// `Expired` is written back by the sweeper as an optimization; the active
/// predicate always re-checks `expires_at` as well, so a record past its
/// expiry behaves identically whether or not a sweep has marked it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentStatus {
    Active,
    Expired,
    Ended,
}

impl PunishmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentStatus::Active => "active",
            PunishmentStatus::Expired => "expired",
            PunishmentStatus::Ended => "ended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PunishmentStatus::Active),
            "expired" => Some(PunishmentStatus::Expired),
            "ended" => Some(PunishmentStatus::Ended),
            _ => None,
        }
    }
}

/// A single punishment issued against a player.
///
/// `id`, `subject`, `kind` and `issued_at` are immutable once created; the
/// only mutations are revocation (sets `revoked_at`/`revoked_by`) and the
/// sweeper marking natural expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    pub id: Uuid,
    pub subject: PlayerIdentity,
    pub kind: PunishmentKind,
    pub scope: PunishmentScope,
    /// Actor that issued the punishment: a player uuid string, or
    /// `"console"` for system-issued records.
    pub issuer: String,
    pub reason: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// Absent means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub status: PunishmentStatus,
}

impl PunishmentRecord {
    /// The active predicate: unrevoked and unexpired as of `at`.
    ///
    /// Kicks are never active; they are terminal at creation. Once this
    /// returns false for a fixed record at some time, it stays false for
    /// every later time (monotonic; no un-expiry).
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        if self.kind == PunishmentKind::Kick {
            return false;
        }
        if self.revoked_at.is_some() || self.status == PunishmentStatus::Ended {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > at,
            None => true,
        }
    }
}

impl<'r> sqlx::FromRow<'r, AnyRow> for PunishmentRecord {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let subject_uuid: String = row.try_get("subject_uuid")?;
        let subject_name: String = row.try_get("subject_name")?;
        let kind: String = row.try_get("kind")?;
        let scope: String = row.try_get("scope")?;
        let status: String = row.try_get("status")?;

        Ok(PunishmentRecord {
            id: parse_uuid("id", &id)?,
            subject: PlayerIdentity::new(parse_uuid("subject_uuid", &subject_uuid)?, subject_name),
            kind: PunishmentKind::from_str(&kind)
                .ok_or_else(|| decode_err("kind", "unknown punishment kind"))?,
            scope: PunishmentScope::from_db(&scope)
                .ok_or_else(|| decode_err("scope", "unknown punishment scope"))?,
            issuer: row.try_get("issuer")?,
            reason: row.try_get("reason")?,
            issued_at: millis_to_utc(row.try_get("issued_at")?),
            expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(millis_to_utc),
            revoked_at: row.try_get::<Option<i64>, _>("revoked_at")?.map(millis_to_utc),
            revoked_by: row.try_get("revoked_by")?,
            status: PunishmentStatus::from_str(&status)
                .ok_or_else(|| decode_err("status", "unknown punishment status"))?,
        })
    }
}

/// Timestamps are stored as unix milliseconds so every backend agrees on
/// precision regardless of its native timestamp type.
pub(crate) fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current time truncated to stored precision, so a freshly built record
/// compares equal to its own read-back.
pub(crate) fn utc_now_millis() -> DateTime<Utc> {
    millis_to_utc(Utc::now().timestamp_millis())
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_err(column: &str, message: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

/// Parameters for issuing a new punishment through the engine.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub subject: PlayerIdentity,
    pub kind: PunishmentKind,
    pub scope: PunishmentScope,
    pub issuer: String,
    pub reason: Option<String>,
    /// Active window; `None` means permanent. Must be positive, and must be
    /// absent for kicks.
    pub duration: Option<Duration>,
}

impl IssueRequest {
    /// Validate and materialize the request into a fresh record.
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> Result<PunishmentRecord, Error> {
        let (expires_at, status) = match self.kind {
            PunishmentKind::Kick => {
                if self.duration.is_some() {
                    return Err(Error::InvalidDuration(
                        "kick punishments cannot carry a duration".to_string(),
                    ));
                }
                // Kicks are terminal at creation.
                (None, PunishmentStatus::Ended)
            }
            _ => match self.duration {
                Some(duration) if duration <= Duration::zero() => {
                    return Err(Error::InvalidDuration(format!(
                        "duration must be positive, got {}",
                        duration
                    )));
                }
                Some(duration) => (Some(now + duration), PunishmentStatus::Active),
                None => (None, PunishmentStatus::Active),
            },
        };

        Ok(PunishmentRecord {
            id: Uuid::new_v4(),
            subject: self.subject,
            kind: self.kind,
            scope: self.scope,
            issuer: self.issuer,
            reason: self.reason,
            issued_at: now,
            expires_at,
            revoked_at: None,
            revoked_by: None,
            status,
        })
    }
}
