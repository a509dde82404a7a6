//! Process-local window store.
//!
//! Mirrors the Redis sorted-set semantics the limiter relies on, including
//! key expiry. Limits enforced through this store hold for one process only.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{StoreResult, WindowEntry, WindowStore};

/// Sorted set of arrivals for one key.
#[derive(Debug, Default)]
struct WindowSet {
    /// member -> score
    scores: HashMap<String, i64>,
    /// (score, member), ordered for range queries
    ordered: BTreeSet<(i64, String)>,
    expires_at: Option<Instant>,
}

impl WindowSet {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn insert(&mut self, entry: &WindowEntry) {
        if let Some(previous) = self.scores.insert(entry.member.clone(), entry.score) {
            self.ordered.remove(&(previous, entry.member.clone()));
        }
        self.ordered.insert((entry.score, entry.member.clone()));
    }

    fn count(&self, lo: i64, hi: i64) -> u64 {
        if lo > hi {
            return 0;
        }
        self.ordered
            .range((lo, String::new())..)
            .take_while(|(score, _)| *score <= hi)
            .count() as u64
    }

    fn prune(&mut self, cutoff: i64) {
        let kept = self.ordered.split_off(&(cutoff, String::new()));
        for (_, member) in std::mem::replace(&mut self.ordered, kept) {
            self.scores.remove(&member);
        }
    }

    fn oldest(&self, n: usize) -> Vec<WindowEntry> {
        self.ordered
            .iter()
            .take(n)
            .map(|(score, member)| WindowEntry::new(*score, member.clone()))
            .collect()
    }
}

/// In-memory [`WindowStore`] backed by a concurrent map of sorted sets.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, WindowSet>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every key whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, set| !set.is_expired(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired windows");
        }
        removed
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.windows
            .iter()
            .filter(|set| !set.value().is_expired(now))
            .count()
    }

    /// Run `f` on the live set for `key`, creating it if needed.
    fn with_set<T>(&self, key: &str, f: impl FnOnce(&mut WindowSet) -> T) -> T {
        let now = Instant::now();
        let mut set = self.windows.entry(key.to_string()).or_default();
        if set.is_expired(now) {
            *set = WindowSet::default();
        }
        f(&mut set)
    }

    /// Run `f` on the live set for `key` without creating it.
    fn read_set<T>(&self, key: &str, f: impl FnOnce(&WindowSet) -> T) -> Option<T> {
        let now = Instant::now();
        self.windows
            .get(key)
            .filter(|set| !set.is_expired(now))
            .map(|set| f(&set))
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn add_entry(&self, key: &str, entry: &WindowEntry) -> StoreResult<()> {
        self.with_set(key, |set| set.insert(entry));
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        if let Some(mut set) = self.windows.get_mut(key) {
            if !set.is_expired(now) {
                set.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn count_in_range(&self, key: &str, lo: i64, hi: i64) -> StoreResult<u64> {
        Ok(self.read_set(key, |set| set.count(lo, hi)).unwrap_or(0))
    }

    async fn oldest_entries(&self, key: &str, n: usize) -> StoreResult<Vec<WindowEntry>> {
        Ok(self.read_set(key, |set| set.oldest(n)).unwrap_or_default())
    }

    async fn prune_before(&self, key: &str, cutoff: i64) -> StoreResult<()> {
        let now = Instant::now();
        if let Some(mut set) = self.windows.get_mut(key) {
            if !set.is_expired(now) {
                set.prune(cutoff);
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        cutoff: i64,
    ) -> StoreResult<()> {
        self.with_set(key, |set| {
            set.prune(cutoff);
            set.insert(entry);
            set.expires_at = Some(Instant::now() + ttl);
        });
        Ok(())
    }

    async fn record_and_count(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        lo: i64,
        hi: i64,
    ) -> StoreResult<u64> {
        Ok(self.with_set(key, |set| {
            set.prune(lo);
            set.insert(entry);
            set.expires_at = Some(Instant::now() + ttl);
            set.count(lo, hi)
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
