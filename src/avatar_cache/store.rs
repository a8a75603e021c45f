//! The concurrent avatar store
//!
//! Entries live in a map keyed by [`CacheKey`]. Every lookup may kick off a
//! background fetch through the [`FetchPool`] and advances an eviction sweep by
//! one entry, so cleaning up unused avatars is spread over normal traffic
//! instead of needing a dedicated task.
//!
//! Lock order: `submit_lock` before any entry lock. The map lock is never held
//! while waiting on an entry lock.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use super::entry::{CacheEntry, EntrySnapshot};
use super::fetch::{PendingFetch, fetch_avatar};
use super::key::CacheKey;
use super::pool::FetchPool;
use super::source::FetchSource;
use crate::config::AvatarConfig;
use crate::config::defaults::{DEFAULT_CONCURRENCY, DEFAULT_STALE_AFTER, DEFAULT_UNUSED_AFTER};

/// Timing and pool settings of a store
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub concurrency: usize,
    pub stale_after: Duration,
    pub unused_after: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            stale_after: DEFAULT_STALE_AFTER,
            unused_after: DEFAULT_UNUSED_AFTER,
        }
    }
}

impl From<&AvatarConfig> for StoreSettings {
    fn from(config: &AvatarConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            stale_after: config.stale_after,
            unused_after: config.unused_after,
        }
    }
}

/// Counters exposed on the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub with_image: usize,
    pub pending: usize,
    pub fetches_submitted: u64,
    pub evictions: u64,
    pub concurrency: usize,
    pub idle_workers: usize,
}

type SharedEntry = Arc<Mutex<CacheEntry>>;

pub struct AvatarStore {
    entries: RwLock<HashMap<CacheKey, SharedEntry>>,
    /// Serialises fetch submission so a key never has two fetches queued
    submit_lock: Mutex<()>,
    /// Keys in sweep order; the front is inspected next
    sweep: Mutex<VecDeque<CacheKey>>,
    pool: FetchPool,
    settings: StoreSettings,
    evictions: AtomicU64,
}

impl AvatarStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            submit_lock: Mutex::new(()),
            sweep: Mutex::new(VecDeque::new()),
            pool: FetchPool::new(settings.concurrency),
            settings,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AvatarConfig) -> Self {
        Self::new(StoreSettings::from(config))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn pool(&self) -> &FetchPool {
        &self.pool
    }

    /// Look up `key`, creating the entry from `source` when it is missing.
    ///
    /// Without a source this is a read-only probe: a missing key yields `None`
    /// and nothing else happens. Otherwise the entry is marked as accessed, a
    /// refresh is submitted when it has gone stale, and one sweep step runs.
    ///
    /// With a source the key is still mapped when this returns, even if a
    /// concurrent sweep evicted the entry between finding and touching it.
    pub async fn lookup(
        &self,
        key: &CacheKey,
        source: Option<Arc<dyn FetchSource>>,
    ) -> Option<EntrySnapshot> {
        let mut snapshot = self.lookup_once(key, source.clone()).await?;
        if let Some(source) = source {
            if !self.contains(key).await {
                debug!("Avatar {} was evicted during lookup, registering it again", key);
                snapshot = self.lookup_once(key, Some(source)).await?;
            }
        }

        self.sweep_step().await;
        Some(snapshot)
    }

    async fn lookup_once(
        &self,
        key: &CacheKey,
        source: Option<Arc<dyn FetchSource>>,
    ) -> Option<EntrySnapshot> {
        let existing = self.entries.read().await.get(key).cloned();
        let entry = match existing {
            Some(entry) => {
                self.refresh_if_stale(&entry).await;
                entry
            }
            None => {
                let source = source?;
                self.create_entry(key, source).await
            }
        };

        let mut entry = entry.lock().await;
        entry.drain_pending();
        entry.touch();
        Some(entry.snapshot())
    }

    /// Current state of `key` without touching it or triggering any work
    pub async fn inspect(&self, key: &CacheKey) -> Option<EntrySnapshot> {
        let entry = self.entries.read().await.get(key).cloned()?;
        let mut entry = entry.lock().await;
        entry.drain_pending();
        Some(entry.snapshot())
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> StoreStats {
        let entries: Vec<SharedEntry> = self.entries.read().await.values().cloned().collect();
        let mut with_image = 0;
        let mut pending = 0;
        for entry in &entries {
            let mut entry = entry.lock().await;
            if entry.drain_pending() {
                pending += 1;
            }
            if entry.has_image() {
                with_image += 1;
            }
        }

        StoreStats {
            entries: entries.len(),
            with_image,
            pending,
            fetches_submitted: self.pool.submitted(),
            evictions: self.evictions.load(Ordering::Relaxed),
            concurrency: self.pool.concurrency(),
            idle_workers: self.pool.available(),
        }
    }

    fn submit_fetch(&self, source: Arc<dyn FetchSource>) -> PendingFetch {
        PendingFetch::new(self.pool.submit(fetch_avatar(source)))
    }

    async fn create_entry(&self, key: &CacheKey, source: Arc<dyn FetchSource>) -> SharedEntry {
        let _submit = self.submit_lock.lock().await;

        // another caller may have won the race for this key
        let existing = self.entries.read().await.get(key).cloned();
        if let Some(entry) = existing {
            return entry;
        }

        let mut entry = CacheEntry::new(Arc::clone(&source));
        if source.can_fetch() {
            entry.set_pending(self.submit_fetch(source));
        } else {
            debug!("Avatar source for {} cannot be fetched, serving placeholders", key);
        }

        let entry = Arc::new(Mutex::new(entry));
        self.entries
            .write()
            .await
            .insert(key.clone(), Arc::clone(&entry));
        self.sweep.lock().await.push_back(key.clone());
        trace!("Created avatar cache entry {}", key);
        entry
    }

    async fn refresh_if_stale(&self, entry: &SharedEntry) {
        let stale_after = self.settings.stale_after;
        let needs_refresh = {
            let mut entry = entry.lock().await;
            !entry.drain_pending() && entry.can_fetch() && entry.is_stale(stale_after)
        };
        if !needs_refresh {
            return;
        }

        let _submit = self.submit_lock.lock().await;
        let mut entry = entry.lock().await;
        // re-check: a concurrent lookup may have submitted or completed one
        if entry.drain_pending() || !entry.is_stale(stale_after) {
            return;
        }
        let pending = self.submit_fetch(Arc::clone(entry.source()));
        entry.set_pending(pending);
        trace!("Submitted refresh for stale avatar {}", entry.source().identity());
    }

    /// Inspect the entry at the front of the sweep ring, evicting it when
    /// unused and rotating it to the back otherwise.
    async fn sweep_step(&self) {
        let Some(key) = self.sweep.lock().await.pop_front() else {
            return;
        };
        let unused_after = self.settings.unused_after;

        let entry = self.entries.read().await.get(&key).cloned();
        let Some(entry) = entry else {
            return;
        };

        if entry.lock().await.is_unused(unused_after) {
            let mut entries = self.entries.write().await;
            // a reader holding the entry lock right now is about to touch it
            let still_unused = entry
                .try_lock()
                .map(|entry| entry.is_unused(unused_after))
                .unwrap_or(false);
            if still_unused {
                entries.remove(&key);
                drop(entries);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted unused avatar {}", key);
                return;
            }
        }

        self.sweep.lock().await.push_back(key);
    }
}

impl std::fmt::Debug for AvatarStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarStore")
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar_cache::entry::EntryState;
    use crate::avatar_cache::fetch::test_sources::{Behaviour, StubSource, png_bytes};
    use futures::future::join_all;

    const STALE: Duration = Duration::from_secs(3600);
    const UNUSED: Duration = Duration::from_secs(7200);

    fn store(concurrency: usize) -> AvatarStore {
        AvatarStore::new(StoreSettings {
            concurrency,
            stale_after: STALE,
            unused_after: UNUSED,
        })
    }

    /// Let spawned fetch tasks run to completion
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn wait_until_fetched(store: &AvatarStore, key: &CacheKey) -> EntrySnapshot {
        loop {
            let snapshot = store.inspect(key).await.unwrap();
            if !snapshot.pending {
                return snapshot;
            }
            settle().await;
        }
    }

    #[tokio::test]
    async fn test_probe_without_source_does_not_create() {
        let store = store(1);
        let key = CacheKey::for_identity("missing");
        assert!(store.lookup(&key, None).await.is_none());
        assert!(store.is_empty().await);
        assert_eq!(store.pool().submitted(), 0);
    }

    #[tokio::test]
    async fn test_first_lookup_submits_one_fetch() {
        let store = store(1);
        let source = Arc::new(StubSource::image("https://example.com/a.png", 64, 64));
        let key = source.cache_key();

        let first = store.lookup(&key, Some(source.clone())).await.unwrap();
        assert!(first.last_accessed.is_some());
        assert_eq!(store.pool().submitted(), 1);

        let ready = wait_until_fetched(&store, &key).await;
        assert_eq!(ready.state(), EntryState::Ready);
        assert_eq!(ready.image.unwrap().dimensions(), (64, 64));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let store = Arc::new(store(2));
        let source = Arc::new(StubSource::image("https://example.com/shared.png", 32, 32).gated());
        let key = source.cache_key();

        let lookups = (0..16).map(|_| {
            let store = Arc::clone(&store);
            let source: Arc<dyn FetchSource> = source.clone();
            let key = key.clone();
            tokio::spawn(async move { store.lookup(&key, Some(source)).await })
        });
        let results = join_all(lookups).await;
        assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));

        assert_eq!(store.pool().submitted(), 1);
        assert_eq!(store.len().await, 1);

        source.release();
        wait_until_fetched(&store, &key).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_pending_lookup_does_not_resubmit() {
        let store = store(1);
        let source = Arc::new(StubSource::image("https://example.com/slow.png", 16, 16).gated());
        let key = source.cache_key();

        for _ in 0..5 {
            let snapshot = store.lookup(&key, Some(source.clone())).await.unwrap();
            assert_eq!(snapshot.state(), EntryState::Pending);
        }
        assert_eq!(store.pool().submitted(), 1);
        source.release();
    }

    #[tokio::test]
    async fn test_unfetchable_source_never_submits() {
        let store = store(1);
        let source = Arc::new(StubSource::unfetchable("about:blank"));
        let key = source.cache_key();

        let snapshot = store.lookup(&key, Some(source.clone())).await.unwrap();
        assert_eq!(snapshot.state(), EntryState::Unfetchable);
        assert!(!snapshot.pending);
        assert_eq!(store.pool().submitted(), 0);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_not_retried_until_stale() {
        let store = store(1);
        let source = Arc::new(StubSource::new("https://example.com/404.png", Behaviour::Fail));
        let key = source.cache_key();

        store.lookup(&key, Some(source.clone())).await;
        let failed = wait_until_fetched(&store, &key).await;
        assert_eq!(failed.state(), EntryState::Failed);

        store.lookup(&key, None).await;
        assert_eq!(store.pool().submitted(), 1);

        source.set_behaviour(Behaviour::Image(png_bytes(20, 20)));
        tokio::time::advance(STALE + Duration::from_secs(1)).await;

        let refreshing = store.lookup(&key, None).await.unwrap();
        assert!(refreshing.pending);
        assert_eq!(store.pool().submitted(), 2);

        let ready = wait_until_fetched(&store, &key).await;
        assert_eq!(ready.state(), EntryState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_serves_old_image_while_refreshing() {
        let store = store(1);
        let source = Arc::new(StubSource::image("https://example.com/r.png", 24, 24));
        let key = source.cache_key();

        store.lookup(&key, Some(source.clone())).await;
        let first = wait_until_fetched(&store, &key).await;
        let first_image = first.image.clone().unwrap();

        tokio::time::advance(STALE + Duration::from_secs(1)).await;
        source.set_behaviour(Behaviour::Image(png_bytes(40, 40)));

        let during = store.lookup(&key, None).await.unwrap();
        assert!(during.pending);
        assert!(Arc::ptr_eq(during.image.as_ref().unwrap(), &first_image));
        assert_eq!(during.state(), EntryState::Ready);

        let refreshed = wait_until_fetched(&store, &key).await;
        assert_eq!(refreshed.image.unwrap().dimensions(), (40, 40));
        assert!(refreshed.fetched_at > first.fetched_at);
        assert!(refreshed.last_modified >= first.last_modified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_entries_are_swept() {
        let store = store(1);
        let idle = Arc::new(StubSource::image("https://example.com/idle.png", 16, 16));
        let busy = Arc::new(StubSource::image("https://example.com/busy.png", 16, 16));
        let idle_key = idle.cache_key();
        let busy_key = busy.cache_key();

        store.lookup(&idle_key, Some(idle.clone())).await;
        let first = wait_until_fetched(&store, &idle_key).await;
        store.lookup(&busy_key, Some(busy.clone())).await;

        tokio::time::advance(UNUSED + Duration::from_secs(1)).await;

        // each lookup of the busy key advances the sweep by one entry
        for _ in 0..3 {
            store.lookup(&busy_key, None).await;
        }
        assert!(!store.contains(&idle_key).await);
        assert!(store.contains(&busy_key).await);
        assert_eq!(store.stats().await.evictions, 1);

        // a fresh lookup rebuilds the entry from scratch
        let submitted = store.pool().submitted();
        let recreated = store.lookup(&idle_key, Some(idle.clone())).await.unwrap();
        assert!(recreated.fetched_at > first.fetched_at);
        assert!(recreated.pending);
        assert_eq!(store.pool().submitted(), submitted + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfetchable_entries_are_swept_too() {
        let store = store(1);
        let orphan = Arc::new(StubSource::unfetchable("about:orphan"));
        let other = Arc::new(StubSource::unfetchable("about:other"));

        store.lookup(&orphan.cache_key(), Some(orphan.clone())).await;
        store.lookup(&other.cache_key(), Some(other.clone())).await;
        tokio::time::advance(UNUSED + Duration::from_secs(1)).await;

        for _ in 0..4 {
            store.lookup(&other.cache_key(), None).await;
        }
        assert!(!store.contains(&orphan.cache_key()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_entry_with_inflight_fetch_is_not_resurrected() {
        let store = store(1);
        let slow = Arc::new(StubSource::image("https://example.com/slow.png", 16, 16).gated());
        let other = Arc::new(StubSource::unfetchable("about:other"));

        store.lookup(&slow.cache_key(), Some(slow.clone())).await;
        tokio::time::advance(UNUSED + Duration::from_secs(1)).await;
        store.lookup(&other.cache_key(), Some(other.clone())).await;
        assert!(!store.contains(&slow.cache_key()).await);

        slow.release();
        settle().await;
        assert!(!store.contains(&slow.cache_key()).await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_reregisters_entry_evicted_mid_lookup() {
        let store = Arc::new(store(1));
        let source = Arc::new(StubSource::unfetchable("about:raced"));
        let key = source.cache_key();
        store.lookup(&key, Some(source.clone())).await;

        // hold the entry so the next lookup stalls after finding it
        let entry = store.entries.read().await.get(&key).cloned().unwrap();
        let guard = entry.lock().await;
        let lookup = tokio::spawn({
            let store = Arc::clone(&store);
            let source: Arc<dyn FetchSource> = source.clone();
            let key = key.clone();
            async move { store.lookup(&key, Some(source)).await }
        });
        settle().await;

        // the sweep evicts the entry while that lookup waits on it
        store.entries.write().await.remove(&key);
        drop(guard);

        let snapshot = lookup.await.unwrap().unwrap();
        assert_eq!(snapshot.state(), EntryState::Unfetchable);
        assert!(store.contains(&key).await);
        let current = store.entries.read().await.get(&key).cloned().unwrap();
        assert!(!Arc::ptr_eq(&current, &entry));
    }

    #[tokio::test]
    async fn test_probe_does_not_reregister_evicted_entry() {
        let store = store(1);
        let source = Arc::new(StubSource::unfetchable("about:gone"));
        let key = source.cache_key();
        store.lookup(&key, Some(source.clone())).await;
        store.entries.write().await.remove(&key);

        assert!(store.lookup(&key, None).await.is_none());
        assert!(!store.contains(&key).await);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store(2);
        let ready = Arc::new(StubSource::image("https://example.com/s.png", 16, 16));
        let blank = Arc::new(StubSource::unfetchable("about:blank"));

        store.lookup(&ready.cache_key(), Some(ready.clone())).await;
        store.lookup(&blank.cache_key(), Some(blank.clone())).await;
        wait_until_fetched(&store, &ready.cache_key()).await;

        let stats = store.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.with_image, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.fetches_submitted, 1);
        assert_eq!(stats.concurrency, 2);
    }
}
