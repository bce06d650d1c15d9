//! cache
//!
//! Sharded TTL cache with early refresh and single-flight fetches.
//!
//! # Design
//!
//! One [`Cache`] instance exists per read capability, each with its own
//! TTL and refresh window. Entries are stored in shard-level locked maps
//! keyed by the request fingerprint. Concurrent misses for the same key
//! coalesce into a single upstream fetch whose result fans out to every
//! waiter; a failed fetch is never admitted.
//!
//! A hit inside the early-refresh window serves the cached value and
//! triggers a background refresh. Past the synchronous-refresh threshold
//! the caller waits for a fresh value. Failed background refreshes back
//! off exponentially from the configured retry base.
//!
//! # Modules
//!
//! - `manager`: named-cache registry for explicit invalidation

mod manager;

pub use manager::{ManagedCache, Manager};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::broadcast;

use crate::errors::{GfError, Result};
use crate::models::{
    Branch, Organization, PipelinesResponse, PullRequestsResponse, Repository,
};

/// Tuning knobs for one cache instance.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of entries. Exceeding this triggers eviction.
    pub capacity: usize,
    /// Number of shards. More shards reduce write lock contention.
    pub num_shards: usize,
    /// Time-to-live for cache entries.
    pub ttl: Duration,
    /// Percentage of a shard to evict when it reaches capacity.
    pub eviction_percentage: usize,
    /// Minimum delay before a background refresh is triggered.
    pub min_refresh: Duration,
    /// Maximum delay before a background refresh is triggered.
    pub max_refresh: Duration,
    /// Entries older than this are refreshed synchronously (caller waits).
    pub synchronous_refresh: Duration,
    /// Base delay for exponential backoff when background refreshes fail.
    pub retry_base: Duration,
}

struct Entry<T> {
    value: T,
    fetched_at: Instant,
    last_access: Instant,
    refresh_due: Instant,
    retry_attempts: u32,
    refreshing: bool,
}

enum Lookup<T> {
    Fresh(T),
    /// Serve the value, but kick off a background refresh.
    Refresh(T),
    Miss,
}

struct Inner<T> {
    config: CacheConfig,
    shards: Vec<Mutex<HashMap<String, Entry<T>>>>,
    inflight: Mutex<HashMap<String, broadcast::Sender<Result<T>>>>,
}

/// A sharded TTL cache for one read capability.
pub struct Cache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Removes the in-flight marker if the leading fetch is dropped mid-way,
/// so waiters can retry instead of hanging.
struct InflightGuard<'a, T> {
    inner: &'a Inner<T>,
    key: &'a str,
}

impl<T> Drop for InflightGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inner.inflight.lock() {
            inflight.remove(self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Cache<T> {
    pub fn new(config: CacheConfig) -> Self {
        let shards = (0..config.num_shards)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                shards,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the cached value for `key`, or fetch it.
    ///
    /// Concurrent callers with the same key share one fetch. The fetch
    /// closure may be invoked again later for background refreshes.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        loop {
            match self.inner.lookup(key) {
                Lookup::Fresh(value) => return Ok(value),
                Lookup::Refresh(value) => {
                    self.spawn_refresh(key, fetch());
                    return Ok(value);
                }
                Lookup::Miss => {}
            }

            let role = {
                let mut inflight = self
                    .inner
                    .inflight
                    .lock()
                    .map_err(|_| GfError::Internal("cache lock poisoned".into()))?;

                match inflight.get(key) {
                    Some(tx) => Err(tx.subscribe()),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        inflight.insert(key.to_string(), tx.clone());
                        Ok(tx)
                    }
                }
            };

            match role {
                Err(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // The leader was cancelled before broadcasting; retry.
                    Err(_) => continue,
                },
                Ok(tx) => {
                    let guard = InflightGuard {
                        inner: &self.inner,
                        key,
                    };

                    let result = fetch().await;

                    if let Ok(value) = &result {
                        self.inner.admit(key, value.clone());
                    }

                    drop(guard);
                    let _ = tx.send(result.clone());

                    return result;
                }
            }
        }
    }

    fn spawn_refresh<Fut>(&self, key: &str, fut: Fut)
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();

        tokio::spawn(async move {
            match fut.await {
                Ok(value) => inner.admit(&key, value),
                Err(err) => {
                    tracing::debug!(key = %key, error = %err, "background refresh failed");
                    inner.note_refresh_failure(&key);
                }
            }
        });
    }

    /// All keys currently held, across every shard.
    pub fn scan_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();

        for shard in &self.inner.shards {
            if let Ok(shard) = shard.lock() {
                keys.extend(shard.keys().cloned());
            }
        }

        keys
    }

    pub fn delete(&self, key: &str) {
        if let Ok(mut shard) = self.inner.shard_for(key).lock() {
            shard.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter_map(|s| s.lock().ok())
            .map(|s| s.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Inner<T> {
    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, Entry<T>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);

        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn lock_shard(&self, key: &str) -> Option<MutexGuard<'_, HashMap<String, Entry<T>>>> {
        self.shard_for(key).lock().ok()
    }

    fn lookup(&self, key: &str) -> Lookup<T> {
        let Some(mut shard) = self.lock_shard(key) else {
            return Lookup::Miss;
        };

        let now = Instant::now();

        let Some(entry) = shard.get_mut(key) else {
            return Lookup::Miss;
        };

        let age = now.duration_since(entry.fetched_at);

        if age >= self.config.ttl {
            shard.remove(key);
            return Lookup::Miss;
        }

        if age >= self.config.synchronous_refresh {
            // Too stale to serve; the caller waits for a fresh value.
            return Lookup::Miss;
        }

        entry.last_access = now;

        if now >= entry.refresh_due && !entry.refreshing {
            entry.refreshing = true;
            return Lookup::Refresh(entry.value.clone());
        }

        Lookup::Fresh(entry.value.clone())
    }

    fn admit(&self, key: &str, value: T) {
        let Some(mut shard) = self.lock_shard(key) else {
            return;
        };

        let shard_capacity = (self.config.capacity / self.config.num_shards).max(1);

        if !shard.contains_key(key) && shard.len() >= shard_capacity {
            evict(&mut shard, self.config.eviction_percentage);
        }

        let now = Instant::now();

        shard.insert(
            key.to_string(),
            Entry {
                value,
                fetched_at: now,
                last_access: now,
                refresh_due: now + self.refresh_jitter(),
                retry_attempts: 0,
                refreshing: false,
            },
        );
    }

    fn note_refresh_failure(&self, key: &str) {
        let Some(mut shard) = self.lock_shard(key) else {
            return;
        };

        if let Some(entry) = shard.get_mut(key) {
            entry.refreshing = false;
            entry.retry_attempts = entry.retry_attempts.saturating_add(1);

            let backoff = self
                .config
                .retry_base
                .saturating_mul(1u32 << entry.retry_attempts.min(16));
            entry.refresh_due = Instant::now() + backoff;
        }
    }

    fn refresh_jitter(&self) -> Duration {
        let min = self.config.min_refresh.as_millis() as u64;
        let max = self.config.max_refresh.as_millis() as u64;

        if max <= min {
            return self.config.min_refresh;
        }

        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Drop the least recently accessed share of a full shard.
fn evict<T>(shard: &mut HashMap<String, Entry<T>>, percentage: usize) {
    let count = (shard.len() * percentage / 100).max(1);

    let mut by_access: Vec<(String, Instant)> = shard
        .iter()
        .map(|(k, e)| (k.clone(), e.last_access))
        .collect();
    by_access.sort_by_key(|(_, at)| *at);

    for (key, _) in by_access.into_iter().take(count) {
        shard.remove(&key);
    }
}

/// Cache for repository lists. Short TTL, aggressive refresh.
pub fn repository_cache() -> Cache<Vec<Repository>> {
    Cache::new(CacheConfig {
        capacity: 100,
        num_shards: 8,
        ttl: Duration::from_secs(2 * 60),
        eviction_percentage: 10,
        min_refresh: Duration::from_secs(10),
        max_refresh: Duration::from_secs(30),
        synchronous_refresh: Duration::from_secs(60),
        retry_base: Duration::from_secs(2),
    })
}

/// Cache for organization lists. Organizations change rarely, so the TTL
/// is long and the refresh window generous.
pub fn organization_cache() -> Cache<Vec<Organization>> {
    Cache::new(CacheConfig {
        capacity: 100,
        num_shards: 8,
        ttl: Duration::from_secs(30 * 60),
        eviction_percentage: 10,
        min_refresh: Duration::from_secs(2 * 60),
        max_refresh: Duration::from_secs(5 * 60),
        synchronous_refresh: Duration::from_secs(30 * 60),
        retry_base: Duration::from_secs(30),
    })
}

/// Cache for branch lists.
pub fn branch_cache() -> Cache<Vec<Branch>> {
    Cache::new(CacheConfig {
        capacity: 100,
        num_shards: 8,
        ttl: Duration::from_secs(5 * 60),
        eviction_percentage: 10,
        min_refresh: Duration::from_secs(10),
        max_refresh: Duration::from_secs(30),
        synchronous_refresh: Duration::from_secs(60),
        retry_base: Duration::from_secs(2),
    })
}

/// Cache for pull request pages.
pub fn pull_request_cache() -> Cache<PullRequestsResponse> {
    Cache::new(CacheConfig {
        capacity: 100,
        num_shards: 8,
        ttl: Duration::from_secs(2 * 60),
        eviction_percentage: 10,
        min_refresh: Duration::from_secs(10),
        max_refresh: Duration::from_secs(30),
        synchronous_refresh: Duration::from_secs(60),
        retry_base: Duration::from_secs(2),
    })
}

/// Cache for pipeline pages. Shorter TTL than pull requests because
/// pipeline status is volatile.
pub fn pipeline_cache() -> Cache<PipelinesResponse> {
    Cache::new(CacheConfig {
        capacity: 100,
        num_shards: 8,
        ttl: Duration::from_secs(60),
        eviction_percentage: 10,
        min_refresh: Duration::from_secs(5),
        max_refresh: Duration::from_secs(15),
        synchronous_refresh: Duration::from_secs(30),
        retry_base: Duration::from_secs(2),
    })
}
