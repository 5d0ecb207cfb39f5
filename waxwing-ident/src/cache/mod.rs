//! Fingerprint cache with in-flight deduplication
//!
//! Maps a content fingerprint to a previously computed resolution. Lookups
//! are memory-only (the persistent store is hydrated at open), so `get`
//! never blocks on I/O. An entry is served only while its adapter-version
//! stamp matches the current configuration; anything else reads as a miss.
//!
//! The reservation mechanism guarantees at most one in-flight resolution per
//! fingerprint across a batch: the first caller becomes the owner, later
//! callers await the owner's result instead of re-querying the sources.

mod store;

pub use store::CacheStore;

use crate::types::ResolvedIdentification;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

/// One cached resolution with its validity metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub resolution: ResolvedIdentification,
    /// Adapter-version stamp the resolution was computed under
    pub adapter_versions: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a reservation attempt
pub enum Reservation {
    /// Caller owns the resolution for this fingerprint
    Owner(ReserveToken),
    /// Another caller is already resolving; await its result
    InFlight(InFlightWait),
}

/// Ownership of an in-flight resolution
///
/// Completing the token wakes every waiter with the final resolution.
/// Dropping it un-completed (cancellation, failure paths) wakes waiters
/// empty-handed so they can proceed on their own.
pub struct ReserveToken {
    fingerprint: String,
    inner: Arc<CacheInner>,
    completed: bool,
}

impl ReserveToken {
    /// Publish the final resolution to all waiters and release the slot
    pub fn complete(mut self, resolution: ResolvedIdentification) {
        self.completed = true;
        if let Some(tx) = self.inner.take_inflight(&self.fingerprint) {
            // Waiters subscribed before this removal still hold receivers;
            // the send reaches them, then the sender drops.
            let _ = tx.send(Some(resolution));
        }
    }
}

impl Drop for ReserveToken {
    fn drop(&mut self) {
        if !self.completed {
            // Abandoned without a result; dropping the sender wakes waiters
            drop(self.inner.take_inflight(&self.fingerprint));
        }
    }
}

/// Waiter side of an in-flight resolution
pub struct InFlightWait {
    rx: watch::Receiver<Option<ResolvedIdentification>>,
}

impl InFlightWait {
    /// Wait for the owner's resolution
    ///
    /// Returns `None` when the owner abandoned the reservation without a
    /// result (e.g. cancellation); the caller then resolves on its own.
    pub async fn wait(mut self) -> Option<ResolvedIdentification> {
        loop {
            if let Some(resolution) = self.rx.borrow().clone() {
                return Some(resolution);
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

struct CacheInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, watch::Sender<Option<ResolvedIdentification>>>>,
    store: Option<CacheStore>,
    adapter_versions: String,
    max_entries: usize,
    max_age: Duration,
}

impl CacheInner {
    fn take_inflight(
        &self,
        fingerprint: &str,
    ) -> Option<watch::Sender<Option<ResolvedIdentification>>> {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        inflight.remove(fingerprint)
    }
}

/// Deep result cache keyed by content fingerprint
#[derive(Clone)]
pub struct FingerprintCache {
    inner: Arc<CacheInner>,
}

impl FingerprintCache {
    /// Memory-only cache (no persistence)
    pub fn in_memory(adapter_versions: impl Into<String>) -> Self {
        Self::build(None, adapter_versions.into(), 50_000, Duration::days(180))
    }

    /// Open a cache backed by a SQLite store
    ///
    /// Store corruption is non-fatal: a failed open or hydrate logs a
    /// warning and the cache runs empty (and, where possible, still
    /// persists new results).
    pub async fn open(
        path: &Path,
        adapter_versions: impl Into<String>,
        max_entries: usize,
        max_age_days: i64,
    ) -> Self {
        let adapter_versions = adapter_versions.into();
        let store = match CacheStore::open(path).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cache store unavailable, continuing with empty cache"
                );
                None
            }
        };

        let cache = Self::build(
            store,
            adapter_versions,
            max_entries.max(1),
            Duration::days(max_age_days.max(1)),
        );
        cache.hydrate().await;
        cache
    }

    fn build(
        store: Option<CacheStore>,
        adapter_versions: String,
        max_entries: usize,
        max_age: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                store,
                adapter_versions,
                max_entries,
                max_age,
            }),
        }
    }

    async fn hydrate(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        match store.load_all().await {
            Ok(rows) => {
                let mut entries = self.inner.entries.write().expect("entries lock poisoned");
                let loaded = rows.len();
                for (fingerprint, entry) in rows {
                    entries.insert(fingerprint, entry);
                }
                debug!(entries = loaded, "fingerprint cache hydrated");
            }
            Err(e) => {
                warn!(error = %e, "cache hydrate failed, continuing with empty cache");
            }
        }
    }

    /// Local lookup; never blocks on I/O
    ///
    /// Entries written under a different adapter-version stamp, or older
    /// than the max age, read as misses. Stale entries are left in place
    /// and overwritten by the next `put` for the same fingerprint.
    pub fn get(&self, fingerprint: &str) -> Option<ResolvedIdentification> {
        let entries = self.inner.entries.read().expect("entries lock poisoned");
        let entry = entries.get(fingerprint)?;
        if entry.adapter_versions != self.inner.adapter_versions {
            debug!(fingerprint, "cache entry has stale adapter versions, miss");
            return None;
        }
        if Utc::now() - entry.created_at > self.inner.max_age {
            debug!(fingerprint, "cache entry past max age, miss");
            return None;
        }
        Some(entry.resolution.clone())
    }

    /// Insert a resolution (idempotent, last write wins)
    ///
    /// Write-through to the persistent store is best-effort; store failures
    /// log a warning and never propagate.
    pub async fn put(&self, fingerprint: &str, resolution: ResolvedIdentification) {
        let entry = CacheEntry {
            resolution,
            adapter_versions: self.inner.adapter_versions.clone(),
            created_at: Utc::now(),
        };

        let evicted = {
            let mut entries = self.inner.entries.write().expect("entries lock poisoned");
            entries.insert(fingerprint.to_string(), entry.clone());
            self.evict_locked(&mut entries)
        };

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.upsert(fingerprint, &entry).await {
                warn!(fingerprint, error = %e, "cache store write failed");
            }
            for stale in evicted {
                if let Err(e) = store.delete(&stale).await {
                    warn!(fingerprint = %stale, error = %e, "cache store evict failed");
                }
            }
        }
    }

    /// Manual eviction (user forces re-analysis)
    pub async fn invalidate(&self, fingerprint: &str) {
        {
            let mut entries = self.inner.entries.write().expect("entries lock poisoned");
            entries.remove(fingerprint);
        }
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.delete(fingerprint).await {
                warn!(fingerprint, error = %e, "cache store delete failed");
            }
        }
    }

    /// Atomically claim the in-flight slot for a fingerprint
    pub fn reserve(&self, fingerprint: &str) -> Reservation {
        let mut inflight = self.inner.inflight.lock().expect("inflight lock poisoned");
        if let Some(tx) = inflight.get(fingerprint) {
            return Reservation::InFlight(InFlightWait {
                rx: tx.subscribe(),
            });
        }
        let (tx, _rx) = watch::channel(None);
        inflight.insert(fingerprint.to_string(), tx);
        Reservation::Owner(ReserveToken {
            fingerprint: fingerprint.to_string(),
            inner: Arc::clone(&self.inner),
            completed: false,
        })
    }

    /// Age- and size-bounded eviction, oldest first; returns evicted keys
    fn evict_locked(&self, entries: &mut HashMap<String, CacheEntry>) -> Vec<String> {
        let mut evicted = Vec::new();
        let cutoff = Utc::now() - self.inner.max_age;

        entries.retain(|fingerprint, entry| {
            if entry.created_at < cutoff {
                evicted.push(fingerprint.clone());
                false
            } else {
                true
            }
        });

        while entries.len() > self.inner.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }

    #[cfg(test)]
    fn with_limits(adapter_versions: &str, max_entries: usize, max_age: Duration) -> Self {
        Self::build(None, adapter_versions.to_string(), max_entries, max_age)
    }
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.inner.entries.read().expect("entries lock poisoned");
        f.debug_struct("FingerprintCache")
            .field("entries", &entries.len())
            .field("adapter_versions", &self.inner.adapter_versions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BypassReason, ResolutionStatus};

    fn resolution(fp: &str) -> ResolvedIdentification {
        ResolvedIdentification::bypassed(fp, BypassReason::Cancelled)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = FingerprintCache::in_memory("v1");
        cache.put("fp-1", resolution("fp-1")).await;

        let hit = cache.get("fp-1").unwrap();
        assert_eq!(hit.fingerprint, "fp-1");
        assert!(cache.get("fp-2").is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_miss() {
        let cache = FingerprintCache::in_memory("v1");
        cache.put("fp-1", resolution("fp-1")).await;

        // Same entries map, different configured stamp
        let reconfigured = FingerprintCache {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(
                    cache.inner.entries.read().unwrap().clone(),
                ),
                inflight: Mutex::new(HashMap::new()),
                store: None,
                adapter_versions: "v2".to_string(),
                max_entries: 100,
                max_age: Duration::days(1),
            }),
        };
        assert!(reconfigured.get("fp-1").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = FingerprintCache::in_memory("v1");
        cache.put("fp-1", resolution("fp-1")).await;
        cache.invalidate("fp-1").await;
        assert!(cache.get("fp-1").is_none());
    }

    #[tokio::test]
    async fn test_size_cap_evicts_oldest() {
        let cache = FingerprintCache::with_limits("v1", 2, Duration::days(1));
        cache.put("fp-a", resolution("fp-a")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.put("fp-b", resolution("fp-b")).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.put("fp-c", resolution("fp-c")).await;

        assert!(cache.get("fp-a").is_none(), "oldest entry should be evicted");
        assert!(cache.get("fp-b").is_some());
        assert!(cache.get("fp-c").is_some());
    }

    #[tokio::test]
    async fn test_reserve_second_caller_waits_for_owner() {
        let cache = FingerprintCache::in_memory("v1");

        let token = match cache.reserve("fp-1") {
            Reservation::Owner(token) => token,
            Reservation::InFlight(_) => panic!("first reserve must own"),
        };
        let wait = match cache.reserve("fp-1") {
            Reservation::InFlight(wait) => wait,
            Reservation::Owner(_) => panic!("second reserve must wait"),
        };

        let waiter = tokio::spawn(wait.wait());
        token.complete(resolution("fp-1"));

        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.fingerprint, "fp-1");
    }

    #[tokio::test]
    async fn test_abandoned_reservation_wakes_waiter_empty() {
        let cache = FingerprintCache::in_memory("v1");

        let token = match cache.reserve("fp-1") {
            Reservation::Owner(token) => token,
            Reservation::InFlight(_) => panic!("first reserve must own"),
        };
        let wait = match cache.reserve("fp-1") {
            Reservation::InFlight(wait) => wait,
            Reservation::Owner(_) => panic!("second reserve must wait"),
        };

        drop(token);
        assert!(wait.wait().await.is_none());

        // Slot is free again
        assert!(matches!(cache.reserve("fp-1"), Reservation::Owner(_)));
    }

    #[tokio::test]
    async fn test_reserve_released_after_complete() {
        let cache = FingerprintCache::in_memory("v1");
        match cache.reserve("fp-1") {
            Reservation::Owner(token) => token.complete(resolution("fp-1")),
            Reservation::InFlight(_) => panic!(),
        }
        assert!(matches!(cache.reserve("fp-1"), Reservation::Owner(_)));
    }

    #[tokio::test]
    async fn test_open_with_unreadable_store_falls_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the store path guarantees the open fails
        let path = dir.path().join("cache.db");
        std::fs::create_dir(&path).unwrap();

        let cache = FingerprintCache::open(&path, "v1", 100, 30).await;
        assert!(cache.get("anything").is_none());
        cache.put("fp-1", resolution("fp-1")).await;
        assert!(cache.get("fp-1").is_some());
    }

    #[tokio::test]
    async fn test_persistent_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = FingerprintCache::open(&path, "v1", 100, 30).await;
            cache.put("fp-1", resolution("fp-1")).await;
        }

        let reopened = FingerprintCache::open(&path, "v1", 100, 30).await;
        let hit = reopened.get("fp-1").unwrap();
        assert!(matches!(
            hit.status,
            ResolutionStatus::Bypassed { .. }
        ));

        // Different adapter versions on reopen: same rows, all misses
        let newer = FingerprintCache::open(&path, "v2", 100, 30).await;
        assert!(newer.get("fp-1").is_none());
    }
}
