use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ActiveSetCache;
use crate::config::EngineConfig;
use crate::db::models::{
    utc_now_millis, IssueRequest, PlayerIdentity, PunishmentKind, PunishmentRecord,
    PunishmentScope,
};
use crate::db::{migrate, queries, Datasource, PoolStatus};
use crate::error::Error;
use crate::services::sweeper::{self, ExpirySweeper};

/// Backoff before the single internal retry on transient read failures.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// The single entry point platform adapters call.
///
/// Coordinates repository writes, cache maintenance and sweeper scheduling.
/// All operations may be invoked concurrently; operations on the same
/// record are serialized by conditional updates at the database layer, not
/// by in-process locking, so the guarantees hold across independent server
/// processes sharing one backend.
///
/// Within a process, a read that follows a write to the same subject
/// observes it (writes invalidate and repopulate the cache before
/// returning). Across processes, coherence is eventual, bounded by the
/// cache TTL and the sweep interval.
pub struct PunishmentEngine {
    ds: Arc<Datasource>,
    cache: Arc<ActiveSetCache>,
    sweeper: ExpirySweeper,
}

impl PunishmentEngine {
    /// Connect to the configured backend, bring its schema up to date and
    /// start the expiry sweeper. Fails, rather than serving traffic, if
    /// the schema cannot be fully migrated.
    pub async fn connect(config: EngineConfig) -> Result<Self, Error> {
        let ds = Arc::new(Datasource::connect(&config.database_url, &config.pool).await?);

        let version = migrate::migrate(&ds).await?;
        info!("Punishment store ready at schema version {}", version);

        let cache = Arc::new(ActiveSetCache::new(
            config.cache.max_entries,
            config.cache.ttl,
        ));
        let sweeper = ExpirySweeper::spawn(ds.clone(), cache.clone(), config.sweep_interval);

        Ok(Self { ds, cache, sweeper })
    }

    /// Issue a punishment. The player identity upsert and record insert
    /// commit atomically; the subject's cache entries are refreshed before
    /// this returns, so an immediate lookup in this process sees the new
    /// record.
    pub async fn issue(&self, request: IssueRequest) -> Result<PunishmentRecord, Error> {
        // Stored precision, so the returned record equals its read-back.
        let now = utc_now_millis();
        let record = request.into_record(now)?;

        let mut tx = self.ds.pool.begin().await?;
        queries::player::upsert(&mut tx, self.ds.dialect, &record.subject, now).await?;
        queries::punishment::insert(&mut tx, self.ds.dialect, &record).await?;
        tx.commit().await?;

        info!(
            "Issued {} {} for {} ({}) by {}",
            record.scope, record.kind, record.subject.username, record.subject.uuid, record.issuer
        );

        // Invalidate-then-repopulate: a global record changes the answer
        // for every server scope, so drop them all first.
        self.cache.invalidate_subject(record.subject.uuid);
        match queries::punishment::find_active_for(&self.ds, record.subject.uuid, &record.scope, now)
            .await
        {
            Ok(active) => self.cache.put(record.subject.uuid, &record.scope, active),
            // Leave the entry invalidated; the next read repopulates.
            Err(e) => warn!("Cache repopulation after issue failed: {}", e),
        }

        Ok(record)
    }

    /// Lift a punishment before its natural expiry. Returns false when the
    /// record does not exist or is no longer active; under racing revokes
    /// exactly one caller gets true.
    pub async fn revoke(&self, id: Uuid, actor: &str) -> Result<bool, Error> {
        let Some(record) = queries::punishment::find_by_id(&self.ds, id).await? else {
            return Ok(false);
        };

        let revoked = queries::punishment::revoke(&self.ds, id, actor, utc_now_millis()).await?;
        if revoked {
            self.cache.invalidate_subject(record.subject.uuid);
            info!(
                "Revoked {} {} for {} by {}",
                record.scope, record.kind, record.subject.uuid, actor
            );
        }
        Ok(revoked)
    }

    /// Whether the subject currently holds an active punishment of `kind`
    /// within `scope`. Cache-first; a miss falls through to the repository
    /// and repopulates the cache.
    pub async fn is_restricted(
        &self,
        subject: Uuid,
        kind: PunishmentKind,
        scope: &PunishmentScope,
    ) -> Result<bool, Error> {
        let active = self.active_for(subject, scope).await?;
        Ok(active.iter().any(|r| r.kind == kind))
    }

    /// The subject's active punishment set for a scope, most recent first.
    ///
    /// Cached entries are re-filtered through the active predicate at
    /// evaluation time, so a record whose expiry passed after it was
    /// cached is already excluded before any sweep runs.
    pub async fn active_for(
        &self,
        subject: Uuid,
        scope: &PunishmentScope,
    ) -> Result<Vec<PunishmentRecord>, Error> {
        let now = Utc::now();

        if let Some(cached) = self.cache.get(subject, scope) {
            return Ok(cached
                .into_iter()
                .filter(|r| r.is_active_at(now))
                .collect());
        }

        let active = match queries::punishment::find_active_for(&self.ds, subject, scope, now).await
        {
            Ok(records) => records,
            Err(e) if e.is_transient() => {
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                queries::punishment::find_active_for(&self.ds, subject, scope, now).await?
            }
            Err(e) => return Err(e),
        };

        self.cache.put(subject, scope, active.clone());
        Ok(active)
    }

    /// Paginated punishment history for a subject, all scopes and states.
    pub async fn history(
        &self,
        subject: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PunishmentRecord>, Error> {
        match queries::punishment::find_history(&self.ds, subject, limit, offset).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_transient() => {
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                queries::punishment::find_history(&self.ds, subject, limit, offset).await
            }
            Err(e) => Err(e),
        }
    }

    /// [`Self::history`] with a caller-supplied deadline. On expiry the
    /// query future is dropped, which returns its connection to the pool.
    pub async fn history_with_deadline(
        &self,
        subject: Uuid,
        limit: i64,
        offset: i64,
        deadline: Duration,
    ) -> Result<Vec<PunishmentRecord>, Error> {
        match tokio::time::timeout(deadline, self.history(subject, limit, offset)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Lifetime count of a subject's records of one kind (revoked and
    /// expired included).
    pub async fn count_for(&self, subject: Uuid, kind: PunishmentKind) -> Result<i64, Error> {
        queries::punishment::count_for(&self.ds, subject, kind).await
    }

    /// Last identity stored for a player, if any punishment ever named it.
    pub async fn find_player(&self, uuid: Uuid) -> Result<Option<PlayerIdentity>, Error> {
        queries::player::find(&self.ds, uuid).await
    }

    /// Run one expiry sweep immediately instead of waiting for the next
    /// scheduled pass. Returns the number of records transitioned.
    pub async fn sweep_now(&self) -> Result<u64, Error> {
        sweeper::sweep_once(&self.ds, &self.cache).await
    }

    /// Operator retention hook: hard-delete settled records issued before
    /// the cutoff. Active punishments are never purged.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let purged = queries::punishment::purge_older_than(&self.ds, cutoff).await?;
        if purged > 0 {
            self.cache.clear();
            info!("Purged {} settled record(s) older than {}", purged, cutoff);
        }
        Ok(purged)
    }

    /// Pool occupancy snapshot for diagnostics.
    pub fn pool_status(&self) -> PoolStatus {
        self.ds.status()
    }

    /// Stop the sweeper, flush the cache and drain the pool.
    pub async fn shutdown(&self) {
        self.sweeper.stop().await;
        self.cache.clear();
        self.ds.close().await;
        info!("Punishment engine shut down");
    }
}
