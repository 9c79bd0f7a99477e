//! Content-addressed on-disk cache with LRU eviction and single-flight
//! producer registration.
//!
//! One flat directory; filename = `<hex128>.<ext>` where `hex128` is the
//! lower 16 bytes of SHA-256 of the canonical URL, hex-lowercased. No
//! subdirectories, no index file — the directory listing is the index, so a
//! fresh process rebuilds its bookkeeping from disk on [`Cache::open`].

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::CacheError;

/// Derives the cache key for a canonical URL: SHA-256, truncated to the
/// first 16 bytes, lowercased hex (L1: stable across processes).
#[must_use]
pub fn cache_key(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    size_bytes: u64,
    last_access: u64,
}

/// A point-in-time snapshot of cache occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub used_bytes: u64,
    pub max_bytes: u64,
}

/// Content-addressed disk store shared process-wide across all players.
///
/// `entries` provides the bookkeeping (size, last access) that the bare
/// directory listing cannot. `order` is a monotonic logical clock used in
/// place of wall-clock time for `last_access`, so eviction order is
/// deterministic even when two touches land in the same instant.
pub struct Cache {
    root: PathBuf,
    ext: String,
    max_size: u64,
    entries: DashMap<String, Entry>,
    clock: AtomicU64,
    /// Per-key reservation for an in-progress producer. Holding a slot here
    /// is what makes `get_or_create` single-flight: a concurrent caller on
    /// the same key waits on the slot's `Notify` instead of racing the
    /// producer against the leader's.
    in_flight: DashMap<String, Arc<Notify>>,
}

impl Cache {
    /// Scans `root` for files already on disk and adopts them as entries
    /// (failure mode: unreadable files are skipped, not fatal).
    pub async fn open(
        root: impl Into<PathBuf>,
        ext: impl Into<String>,
        max_size: u64,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        let ext = ext.into();
        tokio::fs::create_dir_all(&root).await?;

        let cache = Self {
            root,
            ext,
            max_size,
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
            in_flight: DashMap::new(),
        };
        cache.rescan().await?;
        Ok(cache)
    }

    async fn rescan(&self) -> Result<(), CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => return Err(CacheError::Io(e)),
        };
        while let Some(entry) = dir.next_entry().await.unwrap_or(None) {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            self.entries.insert(
                stem.to_string(),
                Entry {
                    path,
                    size_bytes: metadata.len(),
                    last_access: self.tick(),
                },
            );
        }
        Ok(())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{}", self.ext))
    }

    /// Returns the stored path and touches `last_access` on hit. Silently
    /// evicts the bookkeeping entry if the file has disappeared from disk.
    pub async fn get(&self, key: &str) -> Option<PathBuf> {
        let path = {
            let entry = self.entries.get(key)?;
            entry.path.clone()
        };
        if tokio::fs::metadata(&path).await.is_err() {
            self.entries.remove(key);
            return None;
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.last_access = self.tick();
        }
        Some(path)
    }

    /// Returns the existing path on hit; otherwise runs `producer` exactly
    /// once per key, even when multiple callers race `get_or_create` on a
    /// cold key concurrently. The first caller reserves an in-flight slot
    /// for `key` and becomes the leader; every other concurrent caller waits
    /// on that slot's `Notify` and then re-reads whatever the leader left
    /// behind (a hit, or an error if the leader's producer failed).
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &str,
        producer: F,
    ) -> Result<PathBuf, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), CacheError>>,
    {
        if let Some(path) = self.get(key).await {
            return Ok(path);
        }

        let (is_leader, notify) = match self.in_flight.entry(key.to_string()) {
            DashEntry::Occupied(entry) => (false, Arc::clone(entry.get())),
            DashEntry::Vacant(entry) => {
                let notify = Arc::new(Notify::new());
                entry.insert(Arc::clone(&notify));
                (true, notify)
            }
        };

        if !is_leader {
            // Enlist for the wakeup before checking whether the leader has
            // already finished: `Notified` snapshots Notify's internal
            // generation on creation, so even if `notify_waiters` fires
            // between this check and the `.await` below, the already-built
            // future still observes it instead of waiting for a
            // notification that will never come again.
            let notified = notify.notified();
            if self.in_flight.contains_key(key) {
                notified.await;
            }
            return self.get(key).await.ok_or_else(|| {
                CacheError::Producer(format!("producer for {key} failed upstream"))
            });
        }

        // Re-check: a prior leader may have finished and cleared its slot
        // between our initial miss above and winning the in-flight slot.
        if let Some(path) = self.get(key).await {
            self.in_flight.remove(key);
            notify.notify_waiters();
            return Ok(path);
        }

        let result = self.produce_and_register(key, producer).await;
        self.in_flight.remove(key);
        notify.notify_waiters();
        result
    }

    async fn produce_and_register<F, Fut>(
        &self,
        key: &str,
        producer: F,
    ) -> Result<PathBuf, CacheError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), CacheError>>,
    {
        let reserved = self.path_for(key);
        if let Err(e) = producer(reserved.clone()).await {
            let _ = tokio::fs::remove_file(&reserved).await;
            return Err(e);
        }

        let metadata = match tokio::fs::metadata(&reserved).await {
            Ok(m) => m,
            Err(e) => {
                let _ = tokio::fs::remove_file(&reserved).await;
                return Err(CacheError::Io(e));
            }
        };

        self.entries.insert(
            key.to_string(),
            Entry {
                path: reserved.clone(),
                size_bytes: metadata.len(),
                last_access: self.tick(),
            },
        );
        self.evict_to_fit(key).await;
        Ok(reserved)
    }

    /// Evicts entries in oldest-`last_access`-first order until
    /// `total_size <= max_size`, never evicting `protected_key` (iv).
    async fn evict_to_fit(&self, protected_key: &str) {
        loop {
            let total: u64 = self.entries.iter().map(|e| e.size_bytes).sum();
            if total <= self.max_size {
                return;
            }
            let victim = self
                .entries
                .iter()
                .filter(|e| e.key() != protected_key)
                .min_by_key(|e| e.last_access)
                .map(|e| e.key().clone());
            let Some(victim) = victim else {
                return;
            };
            if let Some((_, entry)) = self.entries.remove(&victim) {
                let _ = tokio::fs::remove_file(&entry.path).await;
            }
        }
    }

    /// Removes every entry and its backing file.
    pub async fn clear(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let _ = tokio::fs::remove_file(&entry.path).await;
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut count = 0usize;
        let mut used_bytes = 0u64;
        for entry in self.entries.iter() {
            count += 1;
            used_bytes += entry.size_bytes;
        }
        CacheStats {
            count,
            used_bytes,
            max_bytes: self.max_size,
        }
    }
}
