use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::db::models::{PunishmentRecord, PunishmentScope};

/// In-process cache of each subject's currently-active punishment set,
/// keyed by (subject, queried scope).
///
/// Bounded two ways: an entry count cap with least-recently-used eviction,
/// and a per-entry TTL that treats older entries as misses even under no
/// eviction pressure. The TTL is the documented bound on cross-process
/// staleness — another process's write becomes visible here at worst one
/// TTL later. Within this process, every write path invalidates before
/// returning, so callers always read their own writes.
///
/// Entries live in sharded map cells; readers and writers only contend on
/// the entry they touch. A `max_entries` of zero disables caching entirely
/// and every lookup goes to the repository.
pub struct ActiveSetCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    subject: Uuid,
    scope: PunishmentScope,
}

struct CacheEntry {
    records: Vec<PunishmentRecord>,
    stored_at: Instant,
    last_access: Instant,
}

impl ActiveSetCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            ttl,
        }
    }

    /// Cached active set, or `None` on miss. An entry past its TTL counts
    /// as a miss and is dropped on the way out.
    pub fn get(&self, subject: Uuid, scope: &PunishmentScope) -> Option<Vec<PunishmentRecord>> {
        if self.max_entries == 0 {
            return None;
        }
        let key = CacheKey {
            subject,
            scope: scope.clone(),
        };
        {
            let mut entry = self.entries.get_mut(&key)?;
            if entry.stored_at.elapsed() < self.ttl {
                entry.last_access = Instant::now();
                return Some(entry.records.clone());
            }
        }
        // Stale; the guard is dropped before removal.
        self.entries.remove(&key);
        None
    }

    pub fn put(&self, subject: Uuid, scope: &PunishmentScope, records: Vec<PunishmentRecord>) {
        if self.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        self.entries.insert(
            CacheKey {
                subject,
                scope: scope.clone(),
            },
            CacheEntry {
                records,
                stored_at: now,
                last_access: now,
            },
        );
        if self.entries.len() > self.max_entries {
            self.evict_lru();
        }
    }

    pub fn invalidate(&self, subject: Uuid, scope: &PunishmentScope) {
        self.entries.remove(&CacheKey {
            subject,
            scope: scope.clone(),
        });
    }

    /// Drop every scope entry held for a subject. Used on writes, since a
    /// global punishment changes the answer for every server scope too.
    pub fn invalidate_subject(&self, subject: Uuid) {
        self.entries.retain(|key, _| key.subject != subject);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&self) {
        let overflow = self.entries.len().saturating_sub(self.max_entries);
        if overflow == 0 {
            return;
        }
        let mut by_access: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_access))
            .collect();
        by_access.sort_by_key(|(_, last_access)| *last_access);
        for (key, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }
}
