use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::db::Datasource;
use crate::error::Error;

/// One ordered schema step. Versions are applied in strictly increasing
/// order and recorded in the tracking table; a recorded step is never run
/// again.
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// The DDL below sticks to the syntax all three engines accept; anything
/// engine-specific belongs in `Dialect`. Timestamps are BIGINT unix millis
/// everywhere so precision never differs per backend.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "punishment table",
        statements: &["CREATE TABLE bw_punishments (
                id VARCHAR(36) PRIMARY KEY,
                subject_uuid VARCHAR(36) NOT NULL,
                subject_name VARCHAR(48) NOT NULL,
                kind VARCHAR(16) NOT NULL,
                scope VARCHAR(80) NOT NULL,
                issuer VARCHAR(48) NOT NULL,
                reason VARCHAR(512),
                issued_at BIGINT NOT NULL,
                expires_at BIGINT,
                revoked_at BIGINT,
                revoked_by VARCHAR(48),
                status VARCHAR(16) NOT NULL
            )"],
    },
    Migration {
        version: 2,
        description: "active lookup index",
        statements: &[
            "CREATE INDEX idx_bw_punishments_active ON bw_punishments (subject_uuid, scope, expires_at)",
        ],
    },
    Migration {
        version: 3,
        description: "player identity table",
        statements: &["CREATE TABLE bw_players (
                uuid VARCHAR(36) PRIMARY KEY,
                username VARCHAR(48) NOT NULL,
                last_seen_at BIGINT NOT NULL
            )"],
    },
];

/// Schema version this build of the crate expects.
pub const CURRENT_VERSION: i64 = 3;

const CREATE_TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS bw_schema_migrations (
        version BIGINT PRIMARY KEY,
        description VARCHAR(128) NOT NULL,
        applied_at BIGINT NOT NULL
    )";

/// How long a process waits for another process to finish applying a step
/// it lost the claim race for.
const CLAIM_WAIT_INTERVAL: Duration = Duration::from_millis(100);
const CLAIM_WAIT_ATTEMPTS: u32 = 300;

/// Bring the backend schema up to [`CURRENT_VERSION`] and return the
/// installed version.
///
/// Idempotent, and safe to run concurrently from independent processes
/// sharing one backend: each step runs in its own transaction that first
/// inserts a claim row into the tracking table, so the primary-key
/// constraint serializes claimants. A process that loses the claim waits
/// for the version row to become visible and re-checks instead of
/// re-running the step. A step that fails partway rolls back, claim row
/// included, and surfaces [`Error::MigrationFailed`].
pub async fn migrate(ds: &Datasource) -> Result<i64, Error> {
    info!("Running database migrations...");

    ensure_tracking_table(ds).await?;

    for migration in MIGRATIONS {
        if is_applied(ds, migration.version).await? {
            debug!("Migration {} already applied", migration.version);
            continue;
        }
        apply(ds, migration).await?;
    }

    let version = installed_version(ds).await?;
    info!("Migrations completed, schema at version {}", version);
    Ok(version)
}

async fn ensure_tracking_table(ds: &Datasource) -> Result<(), Error> {
    if let Err(e) = sqlx::query(CREATE_TRACKING_TABLE).execute(&ds.pool).await {
        // Two processes can race the IF NOT EXISTS on engines that still
        // report a duplicate; treat that as already-created.
        let detail = e.to_string();
        if !detail.contains("already exists") && !detail.contains("Duplicate") {
            return Err(Error::MigrationFailed { version: 0, detail });
        }
    }
    Ok(())
}

async fn apply(ds: &Datasource, migration: &Migration) -> Result<(), Error> {
    let mut tx = ds.pool.begin().await?;

    let claim = ds
        .dialect
        .sql("INSERT INTO bw_schema_migrations (version, description, applied_at) VALUES (?, ?, ?)");
    let claimed = sqlx::query(&claim)
        .bind(migration.version)
        .bind(migration.description)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await;

    match claimed {
        Ok(_) => {}
        Err(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
            // Another process holds this step; let its transaction win.
            let _ = tx.rollback().await;
            wait_for_applied(ds, migration.version).await?;
            return Ok(());
        }
        Err(e) => {
            let _ = tx.rollback().await;
            return Err(Error::MigrationFailed {
                version: migration.version,
                detail: e.to_string(),
            });
        }
    }

    for statement in migration.statements {
        if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
            let _ = tx.rollback().await;
            return Err(Error::MigrationFailed {
                version: migration.version,
                detail: e.to_string(),
            });
        }
    }

    tx.commit().await.map_err(|e| Error::MigrationFailed {
        version: migration.version,
        detail: e.to_string(),
    })?;

    info!(
        "Applied migration {} ({})",
        migration.version, migration.description
    );
    Ok(())
}

async fn is_applied(ds: &Datasource, version: i64) -> Result<bool, Error> {
    let sql = ds
        .dialect
        .sql("SELECT COUNT(*) FROM bw_schema_migrations WHERE version = ?");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(version)
        .fetch_one(&ds.pool)
        .await?;
    Ok(count > 0)
}

async fn wait_for_applied(ds: &Datasource, version: i64) -> Result<(), Error> {
    for _ in 0..CLAIM_WAIT_ATTEMPTS {
        if is_applied(ds, version).await? {
            return Ok(());
        }
        tokio::time::sleep(CLAIM_WAIT_INTERVAL).await;
    }
    Err(Error::MigrationFailed {
        version,
        detail: "timed out waiting for a concurrent migration to finish".to_string(),
    })
}

async fn installed_version(ds: &Datasource) -> Result<i64, Error> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM bw_schema_migrations")
        .fetch_one(&ds.pool)
        .await?;
    Ok(version.unwrap_or(0))
}
