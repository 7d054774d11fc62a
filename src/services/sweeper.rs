use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::ActiveSetCache;
use crate::db::{queries, Datasource};
use crate::error::Error;

/// Background task that periodically reconciles expired-but-unmarked
/// records and pushes cache invalidations for the subjects it touched.
///
/// Purely an optimization: the active predicate is always re-derivable
/// from `expires_at`, so a missed pass only means lookups keep computing
/// expiry until the next one. The underlying update is conditional, so
/// overlapping sweeps from several server processes never double-apply.
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirySweeper {
    pub fn spawn(ds: Arc<Datasource>, cache: Arc<ActiveSetCache>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sweep_once(&ds, &cache).await {
                            Ok(0) => debug!("Expiry sweep: nothing to do"),
                            Ok(n) => info!("Expiry sweep transitioned {} record(s)", n),
                            Err(e) => warn!("Expiry sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Expiry sweeper stopped");
        });

        Self {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the task to stop and wait for the in-flight pass to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// One sweep pass: expire overdue records, then invalidate every affected
/// subject's cache entries. Returns the number of records transitioned.
pub(crate) async fn sweep_once(ds: &Datasource, cache: &ActiveSetCache) -> Result<u64, Error> {
    let (count, subjects) = queries::punishment::expire_older_than(ds, Utc::now()).await?;
    for subject in subjects {
        cache.invalidate_subject(subject);
    }
    Ok(count)
}
