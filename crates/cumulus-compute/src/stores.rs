//! Collaborators consulted while resolving credentials.

use crate::models::{Image, KeyPair, LoginCredentials, RegionAndName, RunningInstance};
use crate::Result;
use async_trait::async_trait;
use cumulus_core::cache::{CacheLoader, LoadingCache};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Key pairs known to this process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyPairStore: Send + Sync {
    /// Key pair stored under `key`, if any.
    async fn lookup(&self, key: &RegionAndName) -> Result<Option<KeyPair>>;
}

/// Image metadata lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Image stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the image cannot be found or fetched.
    async fn lookup(&self, key: &RegionAndName) -> Result<Image>;
}

/// Derives credentials for platforms that do not log in with key pairs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformCredentialDeriver: Send + Sync {
    /// Credentials for `instance`, if they can be derived.
    async fn derive(&self, instance: &RunningInstance) -> Result<Option<LoginCredentials>>;
}

/// Concurrent map of key pairs, typically filled as key pairs are created.
#[derive(Debug, Default)]
pub struct InMemoryKeyPairStore {
    key_pairs: RwLock<HashMap<RegionAndName, KeyPair>>,
}

impl InMemoryKeyPairStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key pair under its region and name, replacing any previous entry.
    pub fn insert(&self, key_pair: KeyPair) {
        self.key_pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key_pair.key(), key_pair);
    }

    /// Remove a key pair.
    pub fn remove(&self, key: &RegionAndName) -> Option<KeyPair> {
        self.key_pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Number of stored key pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.key_pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyPairStore for InMemoryKeyPairStore {
    async fn lookup(&self, key: &RegionAndName) -> Result<Option<KeyPair>> {
        Ok(self
            .key_pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

/// Image store that memoizes a loader, so each image is fetched at most once.
#[derive(Clone)]
pub struct LoadingImageStore {
    cache: LoadingCache<RegionAndName, Image>,
}

impl LoadingImageStore {
    /// Wrap an image loader.
    #[must_use]
    pub fn new(loader: Arc<dyn CacheLoader<RegionAndName, Image>>) -> Self {
        Self {
            cache: LoadingCache::new(loader),
        }
    }

    /// Forget a cached image.
    pub fn invalidate(&self, key: &RegionAndName) {
        self.cache.invalidate(key);
    }
}

#[async_trait]
impl ImageStore for LoadingImageStore {
    async fn lookup(&self, key: &RegionAndName) -> Result<Image> {
        self.cache.get(key.clone()).await
    }
}
