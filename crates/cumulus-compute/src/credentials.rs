//! Credential resolution for running instances.

use crate::models::{LoginCredentials, RunningInstance};
use crate::stores::{ImageStore, KeyPairStore, PlatformCredentialDeriver};
use crate::Result;
use async_trait::async_trait;
use cumulus_core::cache::{CacheLoader, CacheStats, LoadingCache};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Platform tag of instances whose credentials come from the platform deriver.
pub const WINDOWS_PLATFORM: &str = "windows";

/// Computes login credentials for a running instance.
///
/// - windows instances are handed to the [`PlatformCredentialDeriver`];
/// - instances launched with a key pair log in as the image's default user, with the
///   key pair's private key when this process knows it;
/// - anything else has no credentials.
pub struct CredentialsForInstance {
    key_pairs: Arc<dyn KeyPairStore>,
    images: Arc<dyn ImageStore>,
    platform: Arc<dyn PlatformCredentialDeriver>,
}

impl CredentialsForInstance {
    /// Create a loader from its collaborators.
    #[must_use]
    pub fn new(
        key_pairs: Arc<dyn KeyPairStore>,
        images: Arc<dyn ImageStore>,
        platform: Arc<dyn PlatformCredentialDeriver>,
    ) -> Self {
        Self {
            key_pairs,
            images,
            platform,
        }
    }

    async fn login_account_for(&self, instance: &RunningInstance) -> Result<String> {
        let image = self.images.lookup(&instance.image_key()).await?;
        Ok(image.default_login_user)
    }

    // A key pair this process never saw is not an error: the user can still log in
    // with a key held elsewhere.
    async fn private_key_or_none(
        &self,
        instance: &RunningInstance,
    ) -> Result<Option<SecretString>> {
        let Some(key) = instance.key_pair_key() else {
            return Ok(None);
        };
        let key_pair = self.key_pairs.lookup(&key).await?;
        if key_pair.is_none() {
            debug!(%key, "No key pair material on record");
        }
        Ok(key_pair.and_then(|key_pair| key_pair.key_material))
    }
}

#[async_trait]
impl CacheLoader<RunningInstance, Option<LoginCredentials>> for CredentialsForInstance {
    #[instrument(skip(self), fields(instance = %instance.id))]
    async fn load(&self, instance: &RunningInstance) -> Result<Option<LoginCredentials>> {
        if instance.platform.as_deref() == Some(WINDOWS_PLATFORM) {
            return self.platform.derive(instance).await;
        }
        if instance.key_pair_key().is_none() {
            return Ok(None);
        }

        let (user, private_key) = futures::try_join!(
            self.login_account_for(instance),
            self.private_key_or_none(instance)
        )?;
        Ok(Some(
            LoginCredentials::for_user(user).with_private_key(private_key),
        ))
    }
}

/// Per-instance credentials, computed at most once per instance.
#[derive(Clone)]
pub struct InstanceCredentials {
    cache: LoadingCache<RunningInstance, Option<LoginCredentials>>,
}

impl InstanceCredentials {
    /// Memoize `loader`.
    #[must_use]
    pub fn new(loader: CredentialsForInstance) -> Self {
        Self {
            cache: LoadingCache::new(Arc::new(loader)),
        }
    }

    /// Credentials for `instance`; concurrent callers share one computation.
    ///
    /// # Errors
    ///
    /// Returns the image or key-pair lookup failure. Failures are not cached.
    pub async fn get(&self, instance: &RunningInstance) -> Result<Option<LoginCredentials>> {
        self.cache.get(instance.clone()).await
    }

    /// Forget the credentials of `instance`.
    pub fn invalidate(&self, instance: &RunningInstance) {
        self.cache.invalidate(instance);
    }

    /// Cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.cache().stats()
    }
}
