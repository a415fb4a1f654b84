//! Single-flight resolution cache.
//!
//! [`ResolutionCache`] memoizes the result of an async computation per key. Concurrent
//! callers for the same key share one in-flight computation; callers for different keys
//! never wait on each other. Failures are handed to every waiter and then forgotten, so
//! the next call recomputes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use crate::error::Result;

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    Ready(V),
    Pending { id: u64, future: SharedResult<V> },
}

struct Inner<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered by a stored value or an in-flight computation
    pub hits: u64,
    /// Calls that started a computation
    pub misses: u64,
    /// Computations that failed
    pub failures: u64,
}

/// Memoizes async computations per key with at most one computation in flight per key.
///
/// Cloning shares the underlying storage.
pub struct ResolutionCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ResolutionCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for ResolutionCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResolutionCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Return the value for `key`, computing it with `compute` if absent.
    ///
    /// `compute` is called at most once per absent key, under the cache lock, and must
    /// only construct its future; the future itself runs outside the lock.
    ///
    /// # Errors
    ///
    /// Returns the computation's error. The failure is not stored.
    pub async fn resolve<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (id, future) = {
            let mut slots = self.lock();
            match slots.get(&key) {
                Some(Slot::Ready(value)) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value.clone());
                }
                Some(Slot::Pending { id, future }) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    trace!("joining in-flight computation");
                    (*id, future.clone())
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = compute().boxed().shared();
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let outcome = future.await;
        self.settle(&key, id, &outcome);
        outcome
    }

    /// Stored value for `key`, without computing.
    #[must_use]
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        match self.lock().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop the entry for `key`. An in-flight computation still completes for its
    /// waiters but is not stored.
    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Number of stored or in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the hit, miss, and failure counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    // First waiter to finish replaces its own pending slot; later waiters find it gone
    // or already settled.
    fn settle(&self, key: &K, id: u64, outcome: &Result<V>) {
        let mut slots = self.lock();
        let current = matches!(
            slots.get(key),
            Some(Slot::Pending { id: pending, .. }) if *pending == id
        );
        if !current {
            return;
        }

        match outcome {
            Ok(value) => {
                slots.insert(key.clone(), Slot::Ready(value.clone()));
            }
            Err(err) => {
                slots.remove(key);
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                debug!(%err, "Computation failed; entry not cached");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Computes the value for a key on a cache miss.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    /// Load the value for `key`.
    async fn load(&self, key: &K) -> Result<V>;
}

/// A [`ResolutionCache`] paired with the [`CacheLoader`] that fills it.
pub struct LoadingCache<K, V> {
    cache: ResolutionCache<K, V>,
    loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache backed by `loader`.
    #[must_use]
    pub fn new(loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        Self {
            cache: ResolutionCache::new(),
            loader,
        }
    }

    /// Value for `key`, loading it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub async fn get(&self, key: K) -> Result<V> {
        let loader = Arc::clone(&self.loader);
        let lookup = key.clone();
        self.cache
            .resolve(key, move || async move { loader.load(&lookup).await })
            .await
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &ResolutionCache<K, V> {
        &self.cache
    }

    /// Drop the entry for `key`.
    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }
}
